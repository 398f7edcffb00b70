//! Member scaling for resources that own numbered members.
//!
//! Members are named `<base>-NNN`, 1-based and zero-padded to three
//! digits. Growing fills the lowest free indices; shrinking removes members
//! according to a [`ShrinkPolicy`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Which members go first when a group shrinks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShrinkPolicy {
    /// Remove the members with the highest index.
    #[default]
    HighestIndexFirst,
    /// Remove the listed members first, in order, then the highest index.
    Preferred(Vec<String>),
}

/// Members to add and remove to reach a desired size.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScalePlan {
    /// Members to create, ascending by index.
    pub add: Vec<String>,
    /// Members to remove, in removal order.
    pub remove: Vec<String>,
}

/// Formats the name of member `index`.
#[must_use]
pub fn member_name(base: &str, index: usize) -> String {
    format!("{base}-{index:03}")
}

/// Parses the index of a member of `base`, if `name` is one.
#[must_use]
pub fn member_index(base: &str, name: &str) -> Option<usize> {
    let suffix = name.strip_prefix(base)?.strip_prefix('-')?;
    if suffix.len() < 3 || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok().filter(|&i| i > 0)
}

/// Computes the members to add or remove so that `existing` has `desired` members.
///
/// Names in `existing` that are not members of `base` are ignored.
#[must_use]
pub fn scale(base: &str, existing: &[String], desired: usize, policy: &ShrinkPolicy) -> ScalePlan {
    let mut members: BTreeSet<usize> =
        existing.iter().filter_map(|n| member_index(base, n)).collect();
    let mut plan = ScalePlan::default();

    if members.len() < desired {
        let mut index = 1;
        while members.len() < desired {
            if members.insert(index) {
                plan.add.push(member_name(base, index));
            }
            index += 1;
        }
        return plan;
    }

    let mut excess = members.len() - desired;
    if let ShrinkPolicy::Preferred(preferred) = policy {
        for name in preferred {
            if excess == 0 {
                break;
            }
            if let Some(index) = member_index(base, name)
                && members.remove(&index)
            {
                plan.remove.push(member_name(base, index));
                excess -= 1;
            }
        }
    }

    while excess > 0 {
        let Some(index) = members.pop_last() else { break };
        plan.remove.push(member_name(base, index));
        excess -= 1;
    }
    plan
}
