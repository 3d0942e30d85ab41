//! Resource document loading
//!
//! A stack document lists resources as `[[resource]]` tables and values to
//! publish after apply under `[exports]`:
//!
//! ```toml
//! [[resource]]
//! name = "frontend-repo"
//! kind = "registry"
//! inputs.tags = { Environment = "Dev", Component = "Frontend" }
//!
//! [[resource]]
//! name = "frontend-image"
//! kind = "image"
//! inputs = { build = "frontend", image_name = "${frontend-repo.repository_url}" }
//!
//! [exports]
//! fe_image_url = "${frontend-image.image_name}"
//! ```
//!
//! Files ending in `.json` are read as JSON with the same shape.

use anyhow::{Context, Result};
use declarative::{Graph, GraphSpec};
use std::fs;
use std::path::Path;

/// Document format, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecFormat {
    Toml,
    Json,
}

impl SpecFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::Json,
            _ => Self::Toml,
        }
    }
}

/// Parse a document in the given format
pub fn parse(content: &str, format: SpecFormat) -> Result<GraphSpec> {
    match format {
        SpecFormat::Toml => toml::from_str(content).context("Invalid TOML format in stack document"),
        SpecFormat::Json => {
            serde_json::from_str(content).context("Invalid JSON format in stack document")
        }
    }
}

/// Read and parse a document
pub fn load(path: &Path) -> Result<GraphSpec> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Could not read stack document: {}", path.display()))?;
    let spec = parse(&content, SpecFormat::from_path(path))
        .with_context(|| format!("Invalid stack document: {}", path.display()))?;
    log::debug!(
        "Loaded {} resources and {} exports from {}",
        spec.resources.len(),
        spec.exports.len(),
        path.display()
    );
    Ok(spec)
}

/// Read a document and build its resource graph
pub fn load_graph(path: &Path) -> Result<Graph> {
    let spec = load(path)?;
    Graph::build(&spec).with_context(|| format!("Invalid resource graph in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::ResourceKind;

    const STACK: &str = r#"
[[resource]]
name = "backend-repo"
kind = "registry"
inputs.tags = { Environment = "Dev", Component = "Backend" }

[[resource]]
name = "backend-image"
kind = "image"
inputs = { build = "backend", image_name = "${backend-repo.repository_url}" }

[[resource]]
name = "task-role-policy"
kind = "role_policy_attachment"
depends_on = ["backend-image"]

[exports]
be_image_url = "${backend-image.image_name}"
"#;

    #[test]
    fn test_parse_toml_document() {
        let spec = parse(STACK, SpecFormat::Toml).unwrap();
        assert_eq!(spec.resources.len(), 3);
        assert_eq!(spec.resources[1].kind, ResourceKind::Image);
        assert_eq!(spec.resources[2].depends_on, ["backend-image"]);
        assert!(spec.resources[2].inputs.is_empty());
        assert!(spec.exports.contains_key("be_image_url"));

        let graph = Graph::build(&spec).unwrap();
        assert_eq!(graph.edges().len(), 2);
    }

    #[test]
    fn test_parse_json_document() {
        let json = r#"{
            "resource": [
                {"name": "lb", "kind": "load_balancer", "inputs": {"internal": false}}
            ],
            "exports": {"external_url": "http://${lb.dns_name}"}
        }"#;
        let spec = parse(json, SpecFormat::Json).unwrap();
        assert_eq!(spec.resources[0].kind, ResourceKind::LoadBalancer);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let doc = "[[resource]]\nname = \"x\"\nkind = \"database\"\n";
        assert!(parse(doc, SpecFormat::Toml).is_err());
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(SpecFormat::from_path(Path::new("stack.json")), SpecFormat::Json);
        assert_eq!(SpecFormat::from_path(Path::new("stack.toml")), SpecFormat::Toml);
        assert_eq!(SpecFormat::from_path(Path::new("stack")), SpecFormat::Toml);
    }

    #[test]
    fn test_load_graph_reports_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.toml");
        fs::write(
            &path,
            "[[resource]]\nname = \"a\"\nkind = \"cluster\"\ndepends_on = [\"b\"]\n\n\
             [[resource]]\nname = \"b\"\nkind = \"cluster\"\ndepends_on = [\"a\"]\n",
        )
        .unwrap();

        let err = load_graph(&path).unwrap_err();
        assert!(format!("{err:#}").contains("dependency cycle"));
    }

    #[test]
    fn test_demo_stack_builds() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/airtek/stack.toml");
        let graph = load_graph(&path).unwrap();

        assert_eq!(graph.len(), 21);
        assert_eq!(graph.exports().len(), 4);
        let order: Vec<&str> = graph
            .topological_order()
            .into_iter()
            .map(|i| graph.nodes()[i].name.as_str())
            .collect();
        let pos = |name: &str| order.iter().position(|n| *n == name).unwrap();
        assert!(pos("frontend_repo") < pos("frontend_image"));
        assert!(pos("fe_listener") < pos("frontend_service"));
        assert!(pos("internal_lb") < pos("frontend_task"));
    }
}
