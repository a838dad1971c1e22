//! Resource-based view of a REST API: resources and their creation chains,
//! name matching against SQL tables, and the relations learned between
//! resources during the search.

pub mod dependency;
pub mod manager;
pub mod model;
pub mod similarity;

pub use dependency::{DependencyEdge, DependencyGraph, Relation, RelationKind};
pub use manager::{bind_call_with_front, ResourceManager, SamplingApplicability};
pub use model::{CallsTemplate, CreationChain, ResourceCluster, RestResource, TableUsage};
