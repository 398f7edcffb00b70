//! Built-in `null` provider.
//!
//! Manages objects that exist only in state. Useful for wiring graphs
//! together, for `triggers`-driven replacement, and for exercising the
//! plan/apply cycle end to end without any remote service.
//!
//! Supported types:
//! - `null_resource`: stores its attributes; changing `triggers` replaces it.
//! - `null_group`: owns `size` numbered members named after `base`; shrinks
//!   by `remove_first`, then highest index.
//! - data `null_data_source`: echoes `inputs` back as `outputs`.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ConfigError, ProviderError, Result, TerragraphError};
use crate::planner::{Action, ChangeSet, ShrinkPolicy, scale};

use super::{Attributes, Observation, Provider};

const NULL_RESOURCE: &str = "null_resource";
const NULL_GROUP: &str = "null_group";
const NULL_DATA_SOURCE: &str = "null_data_source";

/// Provider for state-only objects.
#[derive(Debug, Default)]
pub struct NullProvider {
    objects: Mutex<HashMap<String, Attributes>>,
}

impl NullProvider {
    /// Creates a new null provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Attributes>>> {
        self.objects
            .lock()
            .map_err(|_| TerragraphError::internal("null provider lock poisoned"))
    }

    fn check_type(resource_type: &str) -> Result<()> {
        if matches!(resource_type, NULL_RESOURCE | NULL_GROUP) {
            Ok(())
        } else {
            Err(ProviderError::UnsupportedType {
                provider: String::from("null"),
                resource_type: resource_type.to_string(),
            }
            .into())
        }
    }

    /// Computes the member list of a group after scaling.
    fn scale_group(changeset: &ChangeSet) -> Result<Value> {
        let base = changeset
            .desired
            .get("base")
            .and_then(Value::as_str)
            .unwrap_or(&changeset.node)
            .to_string();

        let size = match changeset.desired.get("size") {
            None => 1,
            Some(v) => v
                .as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| {
                    ConfigError::validation(
                        format!("size must be a non-negative integer, got {v}"),
                        "size",
                    )
                })?,
        };

        let existing: Vec<String> = changeset
            .prior
            .as_ref()
            .and_then(|p| p.get("members"))
            .and_then(Value::as_array)
            .map(|members| members.iter().filter_map(Value::as_str).map(String::from).collect())
            .unwrap_or_default();

        let policy = changeset
            .desired
            .get("remove_first")
            .and_then(Value::as_array)
            .map_or(ShrinkPolicy::HighestIndexFirst, |names| {
                ShrinkPolicy::Preferred(
                    names.iter().filter_map(Value::as_str).map(String::from).collect(),
                )
            });

        let plan = scale(&base, &existing, size, &policy);
        if !plan.add.is_empty() || !plan.remove.is_empty() {
            debug!(
                "Scaling {}: adding {:?}, removing {:?}",
                changeset.node, plan.add, plan.remove
            );
        }

        let mut members: Vec<String> = existing
            .into_iter()
            .filter(|m| !plan.remove.contains(m))
            .chain(plan.add)
            .collect();
        members.sort();
        Ok(Value::from(members))
    }
}

#[async_trait]
impl Provider for NullProvider {
    fn name(&self) -> &str {
        "null"
    }

    async fn configure(&self, _config: &Attributes) -> Result<()> {
        Ok(())
    }

    fn force_new(&self, resource_type: &str) -> Vec<String> {
        match resource_type {
            NULL_RESOURCE => vec![String::from("triggers")],
            NULL_GROUP => vec![String::from("base")],
            _ => Vec::new(),
        }
    }

    async fn apply(&self, changeset: &ChangeSet) -> Result<Option<Observation>> {
        Self::check_type(&changeset.resource_type)?;

        match changeset.action {
            Action::NoOp => Ok(None),
            Action::Delete => {
                if let Some(id) = &changeset.id {
                    self.objects()?.remove(id);
                }
                Ok(None)
            }
            Action::Create | Action::Update | Action::Replace => {
                let id = match (&changeset.id, changeset.action) {
                    (Some(id), Action::Update) => id.clone(),
                    _ => Uuid::new_v4().to_string(),
                };

                let mut attributes = changeset.desired.clone();
                if changeset.resource_type == NULL_GROUP {
                    attributes.insert(String::from("members"), Self::scale_group(changeset)?);
                }
                attributes.insert(String::from("id"), Value::String(id.clone()));

                self.objects()?.insert(id.clone(), attributes.clone());
                Ok(Some(Observation::new(id, attributes)))
            }
        }
    }

    async fn refresh(&self, resource_type: &str, id: &str) -> Result<Observation> {
        Self::check_type(resource_type)?;
        let attributes = self
            .objects()?
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::not_found(id))?;
        Ok(Observation::new(id, attributes))
    }

    async fn read(&self, data_type: &str, config: &Attributes) -> Result<Attributes> {
        if data_type != NULL_DATA_SOURCE {
            return Err(ProviderError::UnsupportedType {
                provider: String::from("null"),
                resource_type: data_type.to_string(),
            }
            .into());
        }

        let inputs = config
            .get("inputs")
            .cloned()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        let mut out = config.clone();
        out.insert(String::from("outputs"), inputs);
        out.insert(String::from("id"), Value::String(String::from("static")));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ModulePath;
    use crate::planner::DiffEngine;
    use crate::state::ResourceState;
    use serde_json::json;

    fn attrs(value: Value) -> Attributes {
        serde_json::from_value(value).unwrap()
    }

    fn changeset(
        provider: &NullProvider,
        resource_type: &str,
        desired: Value,
        prior: Option<&ResourceState>,
    ) -> ChangeSet {
        provider.diff("r", resource_type, Some(&attrs(desired)), prior)
    }

    fn recorded(observation: &Observation, resource_type: &str) -> ResourceState {
        ResourceState::new(
            observation.id.clone(),
            resource_type,
            "provider.null",
            ModulePath::root(),
            observation.attributes.clone(),
        )
    }

    #[tokio::test]
    async fn test_create_refresh_delete() {
        let provider = NullProvider::new();
        let cs = changeset(&provider, NULL_RESOURCE, json!({"triggers": {"v": "1"}}), None);
        let obs = provider.apply(&cs).await.unwrap().unwrap();
        assert_eq!(obs.attributes["id"], json!(obs.id));

        let refreshed = provider.refresh(NULL_RESOURCE, &obs.id).await.unwrap();
        assert_eq!(refreshed.attributes, obs.attributes);

        let prior = recorded(&obs, NULL_RESOURCE);
        let delete = DiffEngine::new().diff("r", NULL_RESOURCE, None, Some(&prior));
        assert!(provider.apply(&delete).await.unwrap().is_none());
        assert!(provider.refresh(NULL_RESOURCE, &obs.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_changing_triggers_replaces() {
        let provider = NullProvider::new();
        let cs = changeset(&provider, NULL_RESOURCE, json!({"triggers": {"v": "1"}}), None);
        let obs = provider.apply(&cs).await.unwrap().unwrap();
        let prior = recorded(&obs, NULL_RESOURCE);

        let same = changeset(
            &provider,
            NULL_RESOURCE,
            json!({"triggers": {"v": "1"}}),
            Some(&prior),
        );
        assert!(same.is_noop());

        let changed = changeset(
            &provider,
            NULL_RESOURCE,
            json!({"triggers": {"v": "2"}}),
            Some(&prior),
        );
        assert_eq!(changed.action, Action::Replace);
    }

    #[tokio::test]
    async fn test_group_grows_and_shrinks() {
        let provider = NullProvider::new();
        let cs = changeset(&provider, NULL_GROUP, json!({"base": "web", "size": 3}), None);
        let obs = provider.apply(&cs).await.unwrap().unwrap();
        assert_eq!(obs.attributes["members"], json!(["web-001", "web-002", "web-003"]));

        let prior = recorded(&obs, NULL_GROUP);
        let cs = changeset(
            &provider,
            NULL_GROUP,
            json!({"base": "web", "size": 2, "remove_first": ["web-001"]}),
            Some(&prior),
        );
        assert_eq!(cs.action, Action::Update);
        let obs = provider.apply(&cs).await.unwrap().unwrap();
        assert_eq!(obs.attributes["members"], json!(["web-002", "web-003"]));
        assert_eq!(obs.id, prior.id);
    }

    #[tokio::test]
    async fn test_unsupported_types() {
        let provider = NullProvider::new();
        let cs = changeset(&provider, "null_thing", json!({}), None);
        assert!(provider.apply(&cs).await.is_err());
        assert!(provider.read("null_other", &Attributes::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_data_source_echoes_inputs() {
        let provider = NullProvider::new();
        let out = provider
            .read(NULL_DATA_SOURCE, &attrs(json!({"inputs": {"a": "b"}})))
            .await
            .unwrap();
        assert_eq!(out["outputs"], json!({"a": "b"}));
    }
}
