//! Diff engine for comparing desired vs observed attributes.
//!
//! Only keys present in the desired attributes are compared. Attributes the
//! remote service adds on its own (ids, timestamps, computed addresses) are
//! kept in state but never cause a change, so applying a plan and planning
//! again yields no-op.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

use crate::provider::Attributes;
use crate::state::ResourceState;

/// Placeholder for values that are only known after apply.
pub const UNKNOWN: &str = "<computed>";

/// Action required to converge one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Nothing to do.
    NoOp,
    /// Resource needs to be created.
    Create,
    /// Resource needs to be updated in place.
    Update,
    /// Resource needs to be deleted.
    Delete,
    /// Resource needs to be deleted and created again.
    Replace,
}

/// One attribute-level difference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeChange {
    /// Attribute key.
    pub key: String,
    /// Observed value, if any.
    pub old: Option<Value>,
    /// Desired value, if any.
    pub new: Option<Value>,
    /// Whether changing this attribute forces replacement.
    pub requires_replace: bool,
}

impl AttributeChange {
    /// Renders the old and new values, `-` when absent.
    #[must_use]
    pub fn rendered(&self) -> (String, String) {
        let render = |v: Option<&Value>| v.map_or_else(|| String::from("-"), ToString::to_string);
        (render(self.old.as_ref()), render(self.new.as_ref()))
    }
}

/// Everything a provider needs to converge one resource.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeSet {
    /// Stable node name.
    pub node: String,
    /// Resource type.
    pub resource_type: String,
    /// Remote identifier of the existing object.
    pub id: Option<String>,
    /// Required action.
    pub action: Action,
    /// Attribute-level differences.
    pub changes: Vec<AttributeChange>,
    /// Desired attributes; empty for deletions.
    pub desired: Attributes,
    /// Previously observed attributes.
    pub prior: Option<Attributes>,
}

/// Engine for computing attribute diffs.
#[derive(Debug, Clone, Default)]
pub struct DiffEngine {
    /// Keys whose change forces replacement.
    force_new: BTreeSet<String>,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            force_new: BTreeSet::new(),
        }
    }

    /// Marks keys whose change cannot be applied in place.
    #[must_use]
    pub fn with_force_new<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.force_new.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Computes the change set for one resource.
    ///
    /// `desired` is `None` when the resource should not exist (orphans).
    #[must_use]
    pub fn diff(
        &self,
        node: &str,
        resource_type: &str,
        desired: Option<&Attributes>,
        prior: Option<&ResourceState>,
    ) -> ChangeSet {
        let (action, changes) = match (desired, prior) {
            (None, None) => (Action::NoOp, Vec::new()),
            (None, Some(prior)) => {
                debug!("{node} is no longer configured and will be deleted");
                (Action::Delete, Self::removal_changes(&prior.attributes))
            }
            (Some(desired), None) => {
                debug!("{node} needs to be created");
                (Action::Create, Self::creation_changes(desired))
            }
            (Some(desired), Some(prior)) => {
                let changes = self.compare(desired, &prior.attributes);
                let action = if changes.is_empty() {
                    Action::NoOp
                } else if changes.iter().any(|c| c.requires_replace) {
                    Action::Replace
                } else {
                    Action::Update
                };
                debug!("{node}: {action} ({} changed attributes)", changes.len());
                (action, changes)
            }
        };

        ChangeSet {
            node: node.to_string(),
            resource_type: resource_type.to_string(),
            id: prior.map(|p| p.id.clone()),
            action,
            changes,
            desired: desired.cloned().unwrap_or_default(),
            prior: prior.map(|p| p.attributes.clone()),
        }
    }

    fn compare(&self, desired: &Attributes, observed: &Attributes) -> Vec<AttributeChange> {
        desired
            .iter()
            .filter(|(key, value)| observed.get(*key) != Some(*value))
            .map(|(key, value)| AttributeChange {
                key: key.clone(),
                old: observed.get(key).cloned(),
                new: Some(value.clone()),
                requires_replace: self.force_new.contains(key),
            })
            .collect()
    }

    fn creation_changes(desired: &Attributes) -> Vec<AttributeChange> {
        desired
            .iter()
            .map(|(key, value)| AttributeChange {
                key: key.clone(),
                old: None,
                new: Some(value.clone()),
                requires_replace: false,
            })
            .collect()
    }

    fn removal_changes(observed: &Attributes) -> Vec<AttributeChange> {
        observed
            .iter()
            .map(|(key, value)| AttributeChange {
                key: key.clone(),
                old: Some(value.clone()),
                new: None,
                requires_replace: false,
            })
            .collect()
    }
}

impl ChangeSet {
    /// Returns the deletion half of a replacement.
    #[must_use]
    pub fn deletion(&self) -> Self {
        Self {
            action: Action::Delete,
            desired: Attributes::new(),
            ..self.clone()
        }
    }

    /// Returns the creation half of a replacement.
    #[must_use]
    pub fn creation(&self) -> Self {
        Self {
            id: None,
            action: Action::Create,
            prior: None,
            ..self.clone()
        }
    }

    /// Returns true if nothing needs to happen.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.action == Action::NoOp
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoOp => "no-op",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Replace => "replace",
        };
        write!(f, "{s}")
    }
}

impl Action {
    /// Returns the plan symbol for this action.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::NoOp => " ",
            Self::Create => "+",
            Self::Update => "~",
            Self::Delete => "-",
            Self::Replace => "-/+",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ModulePath;
    use serde_json::json;

    fn attrs(value: Value) -> Attributes {
        serde_json::from_value(value).unwrap()
    }

    fn prior(value: Value) -> ResourceState {
        let attributes = attrs(value);
        ResourceState::new("r-1", "null_resource", "provider.null", ModulePath::root(), attributes)
    }

    #[test]
    fn test_create_when_no_prior_state() {
        let desired = attrs(json!({"a": 1, "b": "x"}));
        let cs = DiffEngine::new().diff("null_resource.r", "null_resource", Some(&desired), None);
        assert_eq!(cs.action, Action::Create);
        assert_eq!(cs.changes.len(), 2);
        assert_eq!(cs.id, None);
    }

    #[test]
    fn test_noop_ignores_extra_observed_attributes() {
        let desired = attrs(json!({"a": 1}));
        let observed = prior(json!({"a": 1, "id": "r-1", "created": "now"}));
        let cs = DiffEngine::new().diff(
            "null_resource.r",
            "null_resource",
            Some(&desired),
            Some(&observed),
        );
        assert!(cs.is_noop());
        assert!(cs.changes.is_empty());
    }

    #[test]
    fn test_update_and_replace() {
        let observed = prior(json!({"a": 1, "triggers": {"v": "1"}}));

        let desired = attrs(json!({"a": 2, "triggers": {"v": "1"}}));
        let engine = DiffEngine::new().with_force_new(["triggers"]);
        let cs = engine.diff("null_resource.r", "null_resource", Some(&desired), Some(&observed));
        assert_eq!(cs.action, Action::Update);
        assert_eq!(cs.changes[0].old, Some(json!(1)));
        assert_eq!(cs.changes[0].new, Some(json!(2)));
        assert_eq!(cs.id.as_deref(), Some("r-1"));

        let desired = attrs(json!({"a": 1, "triggers": {"v": "2"}}));
        let cs = engine.diff("null_resource.r", "null_resource", Some(&desired), Some(&observed));
        assert_eq!(cs.action, Action::Replace);
        assert!(cs.changes[0].requires_replace);
    }

    #[test]
    fn test_orphan_is_deleted() {
        let observed = prior(json!({"a": 1}));
        let cs = DiffEngine::new().diff("null_resource.r", "null_resource", None, Some(&observed));
        assert_eq!(cs.action, Action::Delete);
        assert_eq!(cs.changes[0].new, None);

        let cs = DiffEngine::new().diff("null_resource.r", "null_resource", None, None);
        assert!(cs.is_noop());
    }

    #[test]
    fn test_replace_halves() {
        let observed = prior(json!({"a": 1}));
        let desired = attrs(json!({"a": 2}));
        let cs = DiffEngine::new()
            .with_force_new(["a"])
            .diff("null_resource.r", "null_resource", Some(&desired), Some(&observed));

        let delete = cs.deletion();
        assert_eq!(delete.action, Action::Delete);
        assert_eq!(delete.id.as_deref(), Some("r-1"));
        assert!(delete.desired.is_empty());

        let create = cs.creation();
        assert_eq!(create.action, Action::Create);
        assert_eq!(create.id, None);
        assert_eq!(create.desired["a"], json!(2));
    }
}
