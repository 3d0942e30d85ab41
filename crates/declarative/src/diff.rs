//! Attribute-level diff computation

use crate::types::Attributes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One attribute difference between recorded and desired inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum AttrChange {
    /// Attribute is new
    Added { name: String, value: Value },
    /// Attribute is no longer declared
    Removed { name: String, old: Value },
    /// Attribute value differs
    Changed { name: String, old: Value, new: Value },
    /// Value depends on a producer that is changing; known after apply
    Pending { name: String, old: Option<Value> },
}

impl AttrChange {
    pub fn name(&self) -> &str {
        match self {
            Self::Added { name, .. }
            | Self::Removed { name, .. }
            | Self::Changed { name, .. }
            | Self::Pending { name, .. } => name,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }
}

/// Compare recorded inputs with desired inputs
///
/// `pending` lists desired attributes whose value is not known yet; they
/// are always reported, since they may change. Results are sorted by name.
pub fn diff_attributes(old: &Attributes, new: &Attributes, pending: &[String]) -> Vec<AttrChange> {
    let mut changes = Vec::new();

    for (name, value) in new {
        match old.get(name) {
            None => changes.push(AttrChange::Added {
                name: name.clone(),
                value: value.clone(),
            }),
            Some(previous) if previous != value => changes.push(AttrChange::Changed {
                name: name.clone(),
                old: previous.clone(),
                new: value.clone(),
            }),
            Some(_) => {}
        }
    }

    for name in pending {
        changes.push(AttrChange::Pending {
            name: name.clone(),
            old: old.get(name).cloned(),
        });
    }

    for (name, previous) in old {
        if !new.contains_key(name) && !pending.contains(name) {
            changes.push(AttrChange::Removed {
                name: name.clone(),
                old: previous.clone(),
            });
        }
    }

    changes.sort_by(|a, b| a.name().cmp(b.name()));
    changes
}

/// Changes describing a brand new resource
pub fn creation_changes(new: &Attributes, pending: &[String]) -> Vec<AttrChange> {
    diff_attributes(&Attributes::new(), new, pending)
}

/// Changes describing a resource being torn down
pub fn removal_changes(old: &Attributes) -> Vec<AttrChange> {
    diff_attributes(old, &Attributes::new(), &[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Attributes {
        match value {
            Value::Object(map) => map.into_iter().collect(),
            _ => Attributes::new(),
        }
    }

    #[test]
    fn test_identical_attributes_have_no_changes() {
        let a = attrs(json!({"port": 80, "tags": {"Environment": "Dev"}}));
        assert!(diff_attributes(&a, &a.clone(), &[]).is_empty());
    }

    #[test]
    fn test_tag_change_is_significant() {
        let old = attrs(json!({"tags": {"Environment": "Dev"}}));
        let new = attrs(json!({"tags": {"Environment": "Prod"}}));
        let changes = diff_attributes(&old, &new, &[]);
        assert_eq!(
            changes,
            [AttrChange::Changed {
                name: "tags".into(),
                old: json!({"Environment": "Dev"}),
                new: json!({"Environment": "Prod"}),
            }]
        );
    }

    #[test]
    fn test_added_removed_and_pending_sorted_by_name() {
        let old = attrs(json!({"b": 1, "c": "gone", "image": "old"}));
        let new = attrs(json!({"a": true, "b": 1}));
        let changes = diff_attributes(&old, &new, &["image".to_string()]);

        let names: Vec<_> = changes.iter().map(AttrChange::name).collect();
        assert_eq!(names, ["a", "c", "image"]);
        assert!(matches!(&changes[0], AttrChange::Added { .. }));
        assert!(matches!(&changes[1], AttrChange::Removed { .. }));
        assert_eq!(
            changes[2],
            AttrChange::Pending {
                name: "image".into(),
                old: Some(json!("old"))
            }
        );
    }

    #[test]
    fn test_creation_and_removal_helpers() {
        let a = attrs(json!({"x": 1}));
        assert!(matches!(&creation_changes(&a, &[])[0], AttrChange::Added { .. }));
        assert!(matches!(&removal_changes(&a)[0], AttrChange::Removed { .. }));
    }
}
