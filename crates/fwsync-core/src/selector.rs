//! Integrator selection for a sync run

use std::time::Duration;

use tracing::{debug, info};

use crate::deadline::bounded;
use crate::error::Result;
use crate::model::{Integrator, Priority};
use crate::traits::RegistryClient;

/// Decides which integrators a run processes
///
/// With a test integrator configured, only that integrator is returned, even
/// when it is disabled or belongs to another priority class. This is the
/// diagnostic path for end-to-end checks against one known target.
#[derive(Debug, Clone)]
pub struct IntegratorSelector {
    test_integrator_id: Option<String>,
    timeout: Duration,
}

impl IntegratorSelector {
    pub fn new(test_integrator_id: Option<String>, timeout: Duration) -> Self {
        Self {
            test_integrator_id,
            timeout,
        }
    }

    pub fn is_test_mode(&self) -> bool {
        self.test_integrator_id.is_some()
    }

    /// Select the integrators to process for `priority`
    ///
    /// Registry failures propagate: without a list there is nothing to run.
    pub async fn select(&self, registry: &dyn RegistryClient, priority: Priority) -> Result<Vec<Integrator>> {
        if let Some(id) = &self.test_integrator_id {
            let integrator = bounded("get integrator", self.timeout, registry.get_integrator(id)).await?;
            info!(integrator = %integrator.name, "Test integrator configured, ignoring priority and enabled flag");
            return Ok(vec![integrator]);
        }

        let listed = bounded("list integrators", self.timeout, registry.list_integrators(priority)).await?;
        let total = listed.len();

        let selected: Vec<Integrator> = listed
            .into_iter()
            .filter(|integrator| {
                if !integrator.enabled {
                    debug!(integrator = %integrator.name, "Integrator is disabled, skipping");
                }
                integrator.enabled
            })
            .collect();

        debug!(priority = %priority, total, selected = selected.len(), "Integrators selected");
        Ok(selected)
    }
}
