//! Plan types.
//!
//! A [`Plan`] is the outcome of a diff-only walk: one [`PlanEntry`] per
//! managed resource, in dependency order. Apply produces the same entries
//! with the phase each resource reached.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use crate::graph::NodeKind;

use super::diff::{Action, AttributeChange};

/// Lifecycle phase of one node during a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Not visited yet.
    Unvisited,
    /// Desired and observed attributes compared.
    Diffed,
    /// Nothing had to change.
    NoOp,
    /// The provider mutation is running.
    Applying,
    /// Waiting for the remote object to settle.
    Converging,
    /// Converged and committed to state.
    Done,
    /// Failed; see the walk error.
    Failed,
}

/// One resource in a plan or apply result.
#[derive(Debug, Clone, Serialize)]
pub struct PlanEntry {
    /// Stable node name.
    pub node: String,
    /// Node kind.
    pub kind: NodeKind,
    /// Resource type.
    pub resource_type: Option<String>,
    /// Required action.
    pub action: Action,
    /// Attribute-level changes.
    pub changes: Vec<AttributeChange>,
    /// Phase reached.
    pub phase: Phase,
}

/// Number of resources per action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActionCounts {
    /// Resources to create.
    pub create: usize,
    /// Resources to update in place.
    pub update: usize,
    /// Resources to delete.
    pub delete: usize,
    /// Resources to replace.
    pub replace: usize,
    /// Unchanged resources.
    pub no_op: usize,
}

/// A complete change plan.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    /// Unique plan identifier.
    pub id: Uuid,
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Configuration hash this plan is based on.
    pub config_hash: String,
    /// Entries in dependency order.
    pub entries: Vec<PlanEntry>,
}

impl ActionCounts {
    /// Tallies the actions of `entries`.
    #[must_use]
    pub fn from_entries(entries: &[PlanEntry]) -> Self {
        entries.iter().fold(Self::default(), |mut counts, entry| {
            match entry.action {
                Action::Create => counts.create += 1,
                Action::Update => counts.update += 1,
                Action::Delete => counts.delete += 1,
                Action::Replace => counts.replace += 1,
                Action::NoOp => counts.no_op += 1,
            }
            counts
        })
    }

    /// Returns the number of resources that change.
    #[must_use]
    pub const fn changes(&self) -> usize {
        self.create + self.update + self.delete + self.replace
    }
}

impl Plan {
    /// Creates a plan from entries.
    #[must_use]
    pub fn new(config_hash: impl Into<String>, entries: Vec<PlanEntry>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            config_hash: config_hash.into(),
            entries,
        }
    }

    /// Returns true if no resource changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| e.action == Action::NoOp)
    }

    /// Returns per-action counts.
    #[must_use]
    pub fn counts(&self) -> ActionCounts {
        ActionCounts::from_entries(&self.entries)
    }

    /// Returns the entries that change something.
    pub fn changes(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries.iter().filter(|e| e.action != Action::NoOp)
    }

    /// Looks up the entry for a node.
    #[must_use]
    pub fn entry(&self, node: &str) -> Option<&PlanEntry> {
        self.entries.iter().find(|e| e.node == node)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unvisited => "unvisited",
            Self::Diffed => "diffed",
            Self::NoOp => "no-op",
            Self::Applying => "applying",
            Self::Converging => "converging",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for ActionCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to delete",
            self.create, self.update, self.replace, self.delete
        )
    }
}

impl fmt::Display for PlanEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>3} {} ({})", self.action.symbol(), self.node, self.action)
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Plan {} ({}):", self.id, self.counts())?;
        for entry in self.changes() {
            writeln!(f, "  {entry}")?;
            for change in &entry.changes {
                let (old, new) = change.rendered();
                let marker = if change.requires_replace { " (forces replacement)" } else { "" };
                writeln!(f, "        {}: {old} => {new}{marker}", change.key)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(node: &str, action: Action) -> PlanEntry {
        PlanEntry {
            node: node.to_string(),
            kind: NodeKind::Resource,
            resource_type: Some(String::from("null_resource")),
            action,
            changes: vec![AttributeChange {
                key: String::from("a"),
                old: None,
                new: Some(json!(1)),
                requires_replace: false,
            }],
            phase: Phase::Diffed,
        }
    }

    #[test]
    fn test_counts_and_display() {
        let plan = Plan::new(
            "hash",
            vec![
                entry("null_resource.a", Action::Create),
                entry("null_resource.b", Action::NoOp),
                entry("null_resource.c", Action::Replace),
            ],
        );

        let counts = plan.counts();
        assert_eq!(counts.create, 1);
        assert_eq!(counts.replace, 1);
        assert_eq!(counts.no_op, 1);
        assert_eq!(counts.changes(), 2);
        assert!(!plan.is_empty());

        let text = plan.to_string();
        assert!(text.contains("+ null_resource.a (create)"));
        assert!(text.contains("-/+ null_resource.c (replace)"));
        assert!(!text.contains("null_resource.b"));
    }

    #[test]
    fn test_empty_plan() {
        let plan = Plan::new("hash", vec![entry("null_resource.a", Action::NoOp)]);
        assert!(plan.is_empty());
        assert_eq!(plan.to_string(), "No changes required");
    }
}
