//! Local simulated provider
//!
//! Keeps an inventory of "remote" resources in `cloud.json` inside the
//! stack directory. Ids are derived from a blake3 hash of the kind, a
//! serial number and the inputs, and every kind gets plausible outputs, so
//! whole stacks can be planned and applied without a cloud account.

use chrono::{DateTime, Utc};
use declarative::{Attributes, Provider, ProviderError, ProviderResult, ResourceKind};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Inventory {
    #[serde(default)]
    next_serial: u64,
    #[serde(default)]
    resources: BTreeMap<String, LocalResource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LocalResource {
    kind: ResourceKind,
    inputs: Attributes,
    outputs: Attributes,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// File-backed provider for local runs
#[derive(Debug)]
pub struct LocalProvider {
    path: PathBuf,
    inventory: Mutex<Inventory>,
}

impl LocalProvider {
    /// Open the inventory at `path`, starting empty if it does not exist
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        use anyhow::Context;

        let path = path.into();
        let inventory = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Could not read {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid local provider inventory: {}", path.display()))?
        } else {
            Inventory::default()
        };
        log::debug!(
            "Local provider holds {} resources ({})",
            inventory.resources.len(),
            path.display()
        );
        Ok(Self {
            path,
            inventory: Mutex::new(inventory),
        })
    }

    /// Number of resources currently "deployed"
    pub fn len(&self) -> usize {
        self.lock().resources.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inventory> {
        match self.inventory.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Write the inventory; called with the lock held
    fn persist(&self, inventory: &Inventory) -> ProviderResult<()> {
        write_atomic(&self.path, inventory).map_err(|e| ProviderError::Transient {
            message: format!("could not write {}: {e}", self.path.display()),
        })
    }
}

fn write_atomic(path: &Path, inventory: &Inventory) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, inventory)?;
    tmp.write_all(b"\n")?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn id_prefix(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Registry => "repo",
        ResourceKind::Image => "img",
        ResourceKind::Role => "role",
        ResourceKind::RolePolicyAttachment => "rpa",
        ResourceKind::SecurityGroup => "sg",
        ResourceKind::LoadBalancer => "lb",
        ResourceKind::TargetGroup => "tg",
        ResourceKind::Listener => "lsn",
        ResourceKind::Cluster => "cls",
        ResourceKind::Service => "svc",
        ResourceKind::TaskDefinition => "td",
    }
}

/// Short hex digest of a value
fn digest(parts: &[&[u8]]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().to_hex().to_string()
}

fn input_str<'a>(inputs: &'a Attributes, key: &str) -> Option<&'a str> {
    inputs.get(key).and_then(Value::as_str)
}

/// Outputs a real provider would report for this kind
fn outputs_for(kind: ResourceKind, id: &str, inputs: &Attributes, revision: u64) -> Attributes {
    let mut outputs = Attributes::new();
    outputs.insert("id".into(), json!(id));
    outputs.insert("arn".into(), json!(format!("arn:local:{kind}:{id}")));

    let name = input_str(inputs, "name").unwrap_or(id).to_string();
    let inputs_json = serde_json::to_vec(inputs).unwrap_or_default();

    match kind {
        ResourceKind::Registry => {
            let registry_id = digest(&[id.as_bytes()])[..12].to_string();
            outputs.insert(
                "repository_url".into(),
                json!(format!("{registry_id}.registry.local/{name}")),
            );
            outputs.insert("registry_id".into(), json!(registry_id));
        }
        ResourceKind::Image => {
            let image_name = input_str(inputs, "image_name").unwrap_or(id);
            outputs.insert("image_name".into(), json!(image_name));
            outputs.insert(
                "digest".into(),
                json!(format!("sha256:{}", digest(&[inputs_json.as_slice()]))),
            );
        }
        ResourceKind::LoadBalancer => {
            outputs.insert("dns_name".into(), json!(format!("{id}.elb.local")));
            outputs.insert(
                "zone_id".into(),
                json!(format!("Z{}", digest(&[b"zone".as_slice(), id.as_bytes()])[..12].to_uppercase())),
            );
        }
        ResourceKind::TaskDefinition => {
            let family = input_str(inputs, "family").unwrap_or(id);
            outputs.insert("family".into(), json!(family));
            outputs.insert("revision".into(), json!(revision));
        }
        ResourceKind::Role
        | ResourceKind::SecurityGroup
        | ResourceKind::TargetGroup
        | ResourceKind::Cluster
        | ResourceKind::Service => {
            outputs.insert("name".into(), json!(name));
        }
        ResourceKind::RolePolicyAttachment | ResourceKind::Listener => {}
    }

    outputs
}

impl Provider for LocalProvider {
    fn create(&self, kind: ResourceKind, inputs: &Attributes) -> ProviderResult<Attributes> {
        let mut inventory = self.lock();
        inventory.next_serial += 1;
        let serial = inventory.next_serial;

        let inputs_json = serde_json::to_vec(inputs).unwrap_or_default();
        let hash = digest(&[
            kind.as_str().as_bytes(),
            serial.to_le_bytes().as_slice(),
            inputs_json.as_slice(),
        ]);
        let id = format!("{}-{}", id_prefix(kind), &hash[..12]);

        let outputs = outputs_for(kind, &id, inputs, 1);
        let now = Utc::now();
        inventory.resources.insert(
            id.clone(),
            LocalResource {
                kind,
                inputs: inputs.clone(),
                outputs: outputs.clone(),
                created_at: now,
                updated_at: now,
            },
        );
        self.persist(&inventory)?;

        log::debug!("Created {} {}", kind, id);
        Ok(outputs)
    }

    fn read(&self, kind: ResourceKind, id: &str) -> ProviderResult<Attributes> {
        let inventory = self.lock();
        match inventory.resources.get(id) {
            Some(resource) if resource.kind == kind => {
                let mut attrs = resource.inputs.clone();
                attrs.extend(resource.outputs.clone());
                Ok(attrs)
            }
            _ => Err(ProviderError::NotFound {
                kind,
                id: id.to_string(),
            }),
        }
    }

    fn update(&self, kind: ResourceKind, id: &str, inputs: &Attributes) -> ProviderResult<Attributes> {
        let mut inventory = self.lock();
        let Some(resource) = inventory.resources.get_mut(id).filter(|r| r.kind == kind) else {
            return Err(ProviderError::NotFound {
                kind,
                id: id.to_string(),
            });
        };

        let revision = resource
            .outputs
            .get("revision")
            .and_then(Value::as_u64)
            .map_or(1, |r| r + 1);
        let outputs = outputs_for(kind, id, inputs, revision);
        resource.inputs = inputs.clone();
        resource.outputs = outputs.clone();
        resource.updated_at = Utc::now();
        self.persist(&inventory)?;

        log::debug!("Updated {} {}", kind, id);
        Ok(outputs)
    }

    fn delete(&self, kind: ResourceKind, id: &str) -> ProviderResult<()> {
        let mut inventory = self.lock();
        if !inventory.resources.get(id).is_some_and(|r| r.kind == kind) {
            return Err(ProviderError::NotFound {
                kind,
                id: id.to_string(),
            });
        }
        inventory.resources.remove(id);
        self.persist(&inventory)?;

        log::debug!("Deleted {} {}", kind, id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(value: Value) -> Attributes {
        match value {
            Value::Object(map) => map.into_iter().collect(),
            _ => Attributes::new(),
        }
    }

    #[test]
    fn test_create_read_update_delete() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProvider::open(dir.path().join("cloud.json")).unwrap();

        let outputs = provider
            .create(ResourceKind::LoadBalancer, &inputs(json!({"internal": false})))
            .unwrap();
        let id = outputs["id"].as_str().unwrap().to_string();
        assert!(id.starts_with("lb-"));
        assert_eq!(outputs["dns_name"], json!(format!("{id}.elb.local")));
        assert_eq!(outputs["arn"], json!(format!("arn:local:load_balancer:{id}")));

        let read = provider.read(ResourceKind::LoadBalancer, &id).unwrap();
        assert_eq!(read["internal"], json!(false));

        let updated = provider
            .update(ResourceKind::LoadBalancer, &id, &inputs(json!({"internal": true})))
            .unwrap();
        assert_eq!(updated["id"], json!(id));
        assert_eq!(provider.read(ResourceKind::LoadBalancer, &id).unwrap()["internal"], json!(true));

        provider.delete(ResourceKind::LoadBalancer, &id).unwrap();
        assert!(provider.read(ResourceKind::LoadBalancer, &id).unwrap_err().is_not_found());
        assert!(provider.delete(ResourceKind::LoadBalancer, &id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_inventory_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack").join("cloud.json");

        let id = {
            let provider = LocalProvider::open(&path).unwrap();
            let outputs = provider.create(ResourceKind::Cluster, &Attributes::new()).unwrap();
            outputs["id"].as_str().unwrap().to_string()
        };

        let reopened = LocalProvider::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert!(reopened.read(ResourceKind::Cluster, &id).is_ok());
    }

    #[test]
    fn test_ids_are_unique_for_identical_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProvider::open(dir.path().join("cloud.json")).unwrap();
        let a = provider.create(ResourceKind::SecurityGroup, &Attributes::new()).unwrap();
        let b = provider.create(ResourceKind::SecurityGroup, &Attributes::new()).unwrap();
        assert_ne!(a["id"], b["id"]);
    }

    #[test]
    fn test_kind_outputs_are_complete() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProvider::open(dir.path().join("cloud.json")).unwrap();
        for kind in ResourceKind::ALL {
            let outputs = provider.create(kind, &Attributes::new()).unwrap();
            for name in kind.outputs() {
                assert!(outputs.contains_key(*name), "{kind} is missing output {name}");
            }
        }
    }

    #[test]
    fn test_task_definition_revision_increments() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProvider::open(dir.path().join("cloud.json")).unwrap();
        let created = provider
            .create(ResourceKind::TaskDefinition, &inputs(json!({"family": "airtek", "cpu": "256"})))
            .unwrap();
        let id = created["id"].as_str().unwrap().to_string();
        assert_eq!(created["revision"], json!(1));
        assert_eq!(created["family"], json!("airtek"));

        let updated = provider
            .update(ResourceKind::TaskDefinition, &id, &inputs(json!({"family": "airtek", "cpu": "512"})))
            .unwrap();
        assert_eq!(updated["revision"], json!(2));
    }

    #[test]
    fn test_wrong_kind_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProvider::open(dir.path().join("cloud.json")).unwrap();
        let outputs = provider.create(ResourceKind::Role, &Attributes::new()).unwrap();
        let id = outputs["id"].as_str().unwrap();
        assert!(provider.read(ResourceKind::Cluster, id).unwrap_err().is_not_found());
    }
}
