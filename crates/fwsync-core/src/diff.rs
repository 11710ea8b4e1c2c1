//! Membership diff between desired addresses and an existing address group
//!
//! Comparison is by name only. An address whose subnet changed under an
//! unchanged name is not reported; attribute drift is not corrected.

use std::collections::BTreeSet;

use crate::model::{DesiredAddress, FirewallAddressGroup};

/// Names to add to and remove from a group's membership
///
/// Both lists are sorted and never share a name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl Diff {
    /// Compute the diff of `desired` against `current`
    ///
    /// With no current group every desired name is added and nothing is
    /// removed; the caller is expected to create the group.
    pub fn compute(desired: &[DesiredAddress], current: Option<&FirewallAddressGroup>) -> Self {
        let wanted: BTreeSet<&str> = desired.iter().map(|a| a.name.as_str()).collect();

        let Some(group) = current else {
            return Self {
                added: wanted.into_iter().map(str::to_string).collect(),
                removed: Vec::new(),
            };
        };

        let present: BTreeSet<&str> = group.members.iter().map(String::as_str).collect();

        Self {
            added: wanted.difference(&present).map(|s| s.to_string()).collect(),
            removed: present.difference(&wanted).map(|s| s.to_string()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}
