//! Core error types for evorest-core.
//!
//! Every variant here is a broken contract rather than a runtime condition:
//! callers propagate them to the top of the search and abort the run, since
//! an individual in this state would poison the archive.

use thiserror::Error;

use crate::id::InsertionId;

/// Core errors produced by the evorest-core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A gene holding pre-existing data was randomized, mutated or overwritten.
    #[error("gene '{name}' holds immutable data and cannot be modified")]
    ImmutableGene { name: String },

    /// `copy_value_from` between genes of different variants.
    #[error("cannot copy value into gene '{name}': expected {expected}, found {found}")]
    GeneTypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    /// Gene bounds that admit no value.
    #[error("invalid bounds for gene '{name}': {reason}")]
    InvalidBounds { name: String, reason: String },

    /// A regex repetition whose limits make no sense.
    #[error("invalid quantifier {{{min},{max}}}")]
    InvalidQuantifier { min: u32, max: u32 },

    /// A regex pattern outside the supported subset.
    #[error("unsupported regex '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },

    /// A foreign key that still points nowhere after repair.
    #[error("foreign key '{column}' in insertion {insertion} on '{table}' is unresolved")]
    UnresolvedForeignKey {
        table: String,
        column: String,
        insertion: InsertionId,
    },

    /// A table referenced by an action or foreign key is not in the schema.
    #[error("table not found: '{table}'")]
    TableNotFound { table: String },
}
