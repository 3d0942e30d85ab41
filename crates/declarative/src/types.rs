//! Core types for declarative resource management

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Resolved attribute values, keyed by attribute name
///
/// A `BTreeMap` keeps diffs and serialized state deterministic.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Category of a managed resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Container image registry
    Registry,
    /// Container image built and pushed to a registry
    Image,
    /// Identity role assumed by workloads
    Role,
    /// Attachment of a managed policy to a role
    RolePolicyAttachment,
    /// Network security group
    SecurityGroup,
    /// Application load balancer
    LoadBalancer,
    /// Load balancer target group
    TargetGroup,
    /// Load balancer listener
    Listener,
    /// Container cluster
    Cluster,
    /// Long-running container service
    Service,
    /// Container task definition
    TaskDefinition,
}

impl ResourceKind {
    /// Every kind, in declaration order
    pub const ALL: [Self; 11] = [
        Self::Registry,
        Self::Image,
        Self::Role,
        Self::RolePolicyAttachment,
        Self::SecurityGroup,
        Self::LoadBalancer,
        Self::TargetGroup,
        Self::Listener,
        Self::Cluster,
        Self::Service,
        Self::TaskDefinition,
    ];

    /// Stable snake_case name, as used in resource documents and state files
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registry => "registry",
            Self::Image => "image",
            Self::Role => "role",
            Self::RolePolicyAttachment => "role_policy_attachment",
            Self::SecurityGroup => "security_group",
            Self::LoadBalancer => "load_balancer",
            Self::TargetGroup => "target_group",
            Self::Listener => "listener",
            Self::Cluster => "cluster",
            Self::Service => "service",
            Self::TaskDefinition => "task_definition",
        }
    }

    /// Output attributes a provider returns for this kind
    ///
    /// Every kind exposes `id` and `arn`. References may target any of
    /// these before the resource exists; the values are filled in at apply.
    pub fn outputs(&self) -> &'static [&'static str] {
        match self {
            Self::Registry => &["id", "arn", "registry_id", "repository_url"],
            Self::Image => &["id", "arn", "image_name", "digest"],
            Self::Role => &["id", "arn", "name"],
            Self::RolePolicyAttachment => &["id", "arn"],
            Self::SecurityGroup => &["id", "arn", "name"],
            Self::LoadBalancer => &["id", "arn", "dns_name", "zone_id"],
            Self::TargetGroup => &["id", "arn", "name"],
            Self::Listener => &["id", "arn"],
            Self::Cluster => &["id", "arn", "name"],
            Self::Service => &["id", "arn", "name"],
            Self::TaskDefinition => &["id", "arn", "revision", "family"],
        }
    }

    /// Check whether `attr` is an output of this kind
    pub fn has_output(&self, attr: &str) -> bool {
        self.outputs().contains(&attr)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last-applied snapshot of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Resource kind at the time of apply
    pub kind: ResourceKind,
    /// Provider-assigned identifier
    pub id: String,
    /// Inputs sent to the provider, fully resolved
    #[serde(default)]
    pub inputs: Attributes,
    /// Outputs returned by the provider
    #[serde(default)]
    pub outputs: Attributes,
    /// Logical names this resource depended on when applied
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// When the record was last written
    pub applied_at: DateTime<Utc>,
}

impl StateRecord {
    /// Look up an attribute, preferring outputs over inputs
    pub fn attribute(&self, name: &str) -> Option<&serde_json::Value> {
        self.outputs.get(name).or_else(|| self.inputs.get(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_round_trip_through_serde() {
        for kind in ResourceKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_every_kind_exposes_id_and_arn() {
        for kind in ResourceKind::ALL {
            assert!(kind.has_output("id"), "{kind} lacks id");
            assert!(kind.has_output("arn"), "{kind} lacks arn");
        }
        assert!(ResourceKind::LoadBalancer.has_output("dns_name"));
        assert!(!ResourceKind::Cluster.has_output("dns_name"));
    }

    #[test]
    fn test_record_attribute_prefers_outputs() {
        let mut record = StateRecord {
            kind: ResourceKind::Role,
            id: "role-1".into(),
            inputs: Attributes::new(),
            outputs: Attributes::new(),
            dependencies: Vec::new(),
            applied_at: Utc::now(),
        };
        record.inputs.insert("name".into(), "declared".into());
        assert_eq!(record.attribute("name"), Some(&serde_json::json!("declared")));

        record.outputs.insert("name".into(), "assigned".into());
        assert_eq!(record.attribute("name"), Some(&serde_json::json!("assigned")));
        assert_eq!(record.attribute("missing"), None);
    }
}
