//! Core data model for evorest.
//!
//! This crate defines everything the search mutates and executes, with no
//! knowledge of how the search is driven:
//!
//! - **Genes** ([`gene`]): typed, mutable value trees (scalars, composites,
//!   wrappers, regex-derived strings, SQL keys and pre-existing data)
//! - **Actions** ([`action`], [`path`]): REST and GraphQL calls built from
//!   genes bound to parameters, plus the prototype catalog they are copied from
//! - **SQL** ([`sql`]): table schemas, insertion builders and foreign-key repair
//!   for initialization sequences
//! - **Individuals** ([`individual`]): ordered call blocks with parameter
//!   bindings, DB initialization actions and a bounded provenance log
//! - **Randomness** ([`randomness`], [`adaptive`]): the seeded RNG and the
//!   budget-driven parameter control shared by every operator

pub mod action;
pub mod adaptive;
pub mod error;
pub mod gene;
pub mod id;
pub mod individual;
pub mod path;
pub mod randomness;
pub mod sql;

pub use action::{Action, ActionCatalog, GraphqlAction, HttpVerb, Param, ParamKind, RestCallAction};
pub use adaptive::AdaptiveControl;
pub use error::CoreError;
pub use gene::{Gene, GeneContext, GeneKind, PrintMode};
pub use id::{IndividualId, InsertionId, TargetId};
pub use individual::{GeneFilter, Individual, ResourceCall, ResourceStatus, SampleType};
pub use path::RestPath;
pub use randomness::Randomness;
pub use sql::{DbSchema, SqlAction, SqlInsertBuilder};
