//! Reconcile recorded state with what the provider reports

use crate::error::StateError;
use crate::provider::Provider;
use crate::retry::{RetryConfig, with_retry};
use crate::state::StateStore;
use crate::types::Attributes;
use serde::Serialize;

/// What refresh did to one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RefreshOutcome {
    /// Outputs match the provider
    InSync,
    /// Outputs were rewritten from the provider
    Updated,
    /// The remote resource is gone; the record was dropped
    Removed,
    /// The provider could not be read; the record was left alone
    Failed { reason: String },
}

/// Re-read every recorded resource
///
/// Only outputs are refreshed. Inputs stay as last applied, so a plan after
/// refresh still diffs against what keel itself wrote.
pub fn refresh(
    state: &dyn StateStore,
    provider: &dyn Provider,
    retry: &RetryConfig,
) -> Result<Vec<(String, RefreshOutcome)>, StateError> {
    let records = state.load()?;
    let mut outcomes = Vec::with_capacity(records.len());

    for (name, mut record) in records {
        let what = format!("read {} '{}'", record.kind, name);
        let outcome = match with_retry(retry, &what, || provider.read(record.kind, &record.id)) {
            Ok(current) => {
                let outputs: Attributes = current
                    .into_iter()
                    .filter(|(attr, _)| record.kind.has_output(attr) || record.outputs.contains_key(attr))
                    .collect();
                if outputs == record.outputs {
                    RefreshOutcome::InSync
                } else {
                    record.outputs = outputs;
                    state.save(&name, &record)?;
                    RefreshOutcome::Updated
                }
            }
            Err(e) if e.is_not_found() => {
                log::info!("{} '{}' no longer exists, dropping it from state", record.kind, name);
                state.remove(&name)?;
                RefreshOutcome::Removed
            }
            Err(e) => RefreshOutcome::Failed {
                reason: e.to_string(),
            },
        };
        log::debug!("Refreshed '{}': {:?}", name, outcome);
        outcomes.push((name, outcome));
    }

    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::provider::ProviderResult;
    use crate::state::MemoryStateStore;
    use crate::types::{ResourceKind, StateRecord};
    use chrono::Utc;
    use serde_json::json;
    use std::collections::BTreeMap;

    struct FixedProvider {
        remote: BTreeMap<String, Attributes>,
    }

    impl Provider for FixedProvider {
        fn create(&self, _kind: ResourceKind, _inputs: &Attributes) -> ProviderResult<Attributes> {
            unreachable!("refresh never creates")
        }

        fn read(&self, kind: ResourceKind, id: &str) -> ProviderResult<Attributes> {
            if id == "flaky" {
                return Err(ProviderError::Permanent {
                    message: "access denied".into(),
                });
            }
            self.remote.get(id).cloned().ok_or_else(|| ProviderError::NotFound {
                kind,
                id: id.to_string(),
            })
        }

        fn update(&self, _kind: ResourceKind, _id: &str, _inputs: &Attributes) -> ProviderResult<Attributes> {
            unreachable!("refresh never updates")
        }

        fn delete(&self, _kind: ResourceKind, _id: &str) -> ProviderResult<()> {
            unreachable!("refresh never deletes")
        }
    }

    fn record(id: &str, dns: &str) -> StateRecord {
        let mut outputs = Attributes::new();
        outputs.insert("id".into(), json!(id));
        outputs.insert("dns_name".into(), json!(dns));
        let mut inputs = Attributes::new();
        inputs.insert("scheme".into(), json!("internet-facing"));
        StateRecord {
            kind: ResourceKind::LoadBalancer,
            id: id.to_string(),
            inputs,
            outputs,
            dependencies: Vec::new(),
            applied_at: Utc::now(),
        }
    }

    #[test]
    fn test_refresh_updates_drops_and_keeps() {
        let mut records = BTreeMap::new();
        records.insert("same".to_string(), record("lb-1", "a.example"));
        records.insert("moved".to_string(), record("lb-2", "old.example"));
        records.insert("gone".to_string(), record("lb-3", "c.example"));
        records.insert("denied".to_string(), record("flaky", "d.example"));
        let state = MemoryStateStore::with_records(records);

        let mut remote = BTreeMap::new();
        // Inputs echoed back by the provider are not outputs and are ignored
        remote.insert(
            "lb-1".to_string(),
            [("id", json!("lb-1")), ("dns_name", json!("a.example")), ("scheme", json!("internal"))]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        );
        remote.insert(
            "lb-2".to_string(),
            [("id", json!("lb-2")), ("dns_name", json!("new.example"))]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        );
        let provider = FixedProvider { remote };

        let outcomes: BTreeMap<_, _> = refresh(&state, &provider, &RetryConfig::no_retry())
            .unwrap()
            .into_iter()
            .collect();

        assert_eq!(outcomes["same"], RefreshOutcome::InSync);
        assert_eq!(outcomes["moved"], RefreshOutcome::Updated);
        assert_eq!(outcomes["gone"], RefreshOutcome::Removed);
        assert!(matches!(outcomes["denied"], RefreshOutcome::Failed { .. }));

        let after = state.snapshot();
        assert!(!after.contains_key("gone"));
        assert!(after.contains_key("denied"));
        assert_eq!(after["moved"].outputs["dns_name"], json!("new.example"));
        assert_eq!(after["same"].inputs["scheme"], json!("internet-facing"));
    }
}
