//! # Declarative
//!
//! A small reconciliation engine: declare resources, diff them against
//! recorded state, and converge by calling a provider.
//!
//! ## Core Concepts
//!
//! - **Graph**: validated DAG of resource nodes, wired by `${node.attr}` references
//! - **ChangeSet**: ordered create/update/replace/delete operations from [`plan`]
//! - **Executor**: applies a change set on a bounded worker pool
//! - **StateStore**: last-applied records, written only after the provider confirms
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{Graph, GraphSpec, MemoryStateStore, ApplyOptions, apply, plan};
//! use std::sync::Arc;
//!
//! let spec: GraphSpec = toml::from_str(&std::fs::read_to_string("stack.toml")?)?;
//! let graph = Graph::build(&spec)?;
//!
//! let state = Arc::new(MemoryStateStore::new());
//! let change_set = plan(&graph, &state.load()?)?;
//! let result = apply(change_set, provider, state, &ApplyOptions::default());
//! assert!(result.is_success());
//! ```
//!
//! ## Provider Traits
//!
//! - [`Provider`]: performs the remote mutations
//! - [`StateStore`]: persists last-applied records
//! - [`ProgressCallback`]: receives progress updates during apply
//!
//! This keeps the engine free of any specific cloud API or UI framework.

pub mod diff;
pub mod error;
pub mod executor;
pub mod expr;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod refresh;
pub mod retry;
pub mod state;
pub mod types;

// Re-export main types at crate root
pub use diff::AttrChange;
pub use error::{GraphError, PlanError, ProviderError, StateError, StateResult};
pub use executor::{
    AbortHandle, ApplyOptions, ApplyResult, ApplySummary, Change, NoProgress, OpStatus,
    OperationResult, ProgressCallback, apply, apply_with_progress,
};
pub use expr::{AttrRef, Expr};
pub use graph::{Edge, Graph, GraphSpec, ResourceNode, ResourceSpec};
pub use planner::{Action, ChangeSet, Operation, PlanSummary, plan, plan_destroy};
pub use provider::{Provider, ProviderResult, output_id};
pub use refresh::{RefreshOutcome, refresh};
pub use retry::{RetryConfig, with_retry};
pub use state::{FileStateStore, MemoryStateStore, StateStore};
pub use types::{Attributes, ResourceKind, StateRecord};
