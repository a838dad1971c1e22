//! Typed, mutable value trees.
//!
//! A [`Gene`] is a named node holding one value of a closed set of
//! [`GeneKind`] variants. Every consumer (mutator, renderer, binder)
//! dispatches with an exhaustive `match`, so adding a variant forces every
//! site to handle it.
//!
//! Genes are exclusively owned by their parent (an action parameter or a
//! composite gene). `Clone` is the deep copy: cloning an individual clones
//! its entire gene forest and shares nothing.

mod collection;
mod number;
pub mod regex;
mod sql;
mod text;
mod wrapper;

pub use collection::{ArrayGene, ObjectGene};
pub use number::{BooleanGene, DoubleGene, IntegerGene};
pub use regex::RegexGene;
pub use sql::{ImmutableDataGene, SqlForeignKeyGene, SqlPrimaryKeyGene, SqlXmlGene};
pub use text::{EnumGene, StringGene};
pub use wrapper::{DisruptiveGene, OptionalGene};

pub(crate) use number::power_of_two_delta;

use serde::{Deserialize, Serialize};

use crate::adaptive::AdaptiveControl;
use crate::error::CoreError;
use crate::id::InsertionId;
use crate::randomness::Randomness;

/// Default upper bound on string gene length.
pub const DEFAULT_MAX_STRING_LENGTH: usize = 200;

/// How a value is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintMode {
    /// Bare text, as used in URL paths, query strings and headers.
    Raw,
    /// JSON literal.
    Json,
    /// XML element content.
    Xml,
    /// SQL literal.
    Sql,
}

/// Read-only view of the rest of the individual, handed to value operators.
///
/// Built once before a round of mutations so genes never need to borrow
/// their siblings.
#[derive(Debug, Clone, Default)]
pub struct GeneContext {
    /// Current values of the other string genes of the individual.
    pub string_pool: Vec<String>,
    /// Primary keys a foreign key may reference, as `(table, insertion)`.
    pub primary_keys: Vec<(String, InsertionId)>,
}

/// A named node in a value tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gene {
    pub name: String,
    pub kind: GeneKind,
}

/// Every gene variant the engine knows how to randomize, mutate and render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GeneKind {
    Integer(IntegerGene),
    Double(DoubleGene),
    Boolean(BooleanGene),
    String(StringGene),
    Enum(EnumGene),
    Object(ObjectGene),
    Array(ArrayGene),
    Optional(OptionalGene),
    Disruptive(DisruptiveGene),
    Regex(RegexGene),
    SqlPrimaryKey(SqlPrimaryKeyGene),
    SqlForeignKey(SqlForeignKeyGene),
    SqlXml(SqlXmlGene),
    ImmutableData(ImmutableDataGene),
}

// ---------------------------------------------------------------------------
// Constructors
// ---------------------------------------------------------------------------

impl Gene {
    pub fn new(name: impl Into<String>, kind: GeneKind) -> Self {
        Gene {
            name: name.into(),
            kind,
        }
    }

    /// Integer gene over `[min, max]`, starting at the in-range value closest to zero.
    pub fn integer(name: impl Into<String>, min: i64, max: i64) -> Result<Self, CoreError> {
        let name = name.into();
        if min > max {
            return Err(CoreError::InvalidBounds {
                name,
                reason: format!("min {} is greater than max {}", min, max),
            });
        }
        Ok(Gene::new(
            name,
            GeneKind::Integer(IntegerGene {
                value: 0i64.clamp(min, max),
                min,
                max,
            }),
        ))
    }

    pub fn int32(name: impl Into<String>) -> Self {
        Gene::new(
            name,
            GeneKind::Integer(IntegerGene {
                value: 0,
                min: i32::MIN as i64,
                max: i32::MAX as i64,
            }),
        )
    }

    pub fn int64(name: impl Into<String>) -> Self {
        Gene::new(
            name,
            GeneKind::Integer(IntegerGene {
                value: 0,
                min: i64::MIN,
                max: i64::MAX,
            }),
        )
    }

    pub fn double(name: impl Into<String>) -> Self {
        Gene::new(
            name,
            GeneKind::Double(DoubleGene {
                value: 0.0,
                min: None,
                max: None,
            }),
        )
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Gene::new(name, GeneKind::Boolean(BooleanGene { value: false }))
    }

    pub fn string(name: impl Into<String>) -> Self {
        Gene::new(
            name,
            GeneKind::String(StringGene {
                value: String::new(),
                min_length: 0,
                max_length: DEFAULT_MAX_STRING_LENGTH,
            }),
        )
    }

    /// String gene whose length must stay within `[min_length, max_length]`.
    pub fn string_bounded(
        name: impl Into<String>,
        min_length: usize,
        max_length: usize,
    ) -> Result<Self, CoreError> {
        let name = name.into();
        if min_length > max_length {
            return Err(CoreError::InvalidBounds {
                name,
                reason: format!(
                    "min length {} is greater than max length {}",
                    min_length, max_length
                ),
            });
        }
        Ok(Gene::new(
            name,
            GeneKind::String(StringGene {
                value: "_".repeat(min_length),
                min_length,
                max_length,
            }),
        ))
    }

    pub fn enumeration(name: impl Into<String>, values: Vec<String>) -> Result<Self, CoreError> {
        let name = name.into();
        if values.is_empty() {
            return Err(CoreError::InvalidBounds {
                name,
                reason: "enum without values".to_string(),
            });
        }
        Ok(Gene::new(name, GeneKind::Enum(EnumGene { values, index: 0 })))
    }

    pub fn object(name: impl Into<String>, fields: Vec<Gene>) -> Self {
        Gene::new(name, GeneKind::Object(ObjectGene { fields }))
    }

    pub fn array(
        name: impl Into<String>,
        template: Gene,
        min_size: usize,
        max_size: usize,
    ) -> Result<Self, CoreError> {
        let name = name.into();
        if min_size > max_size {
            return Err(CoreError::InvalidBounds {
                name,
                reason: format!("min size {} is greater than max size {}", min_size, max_size),
            });
        }
        let elements = vec![template.clone(); min_size];
        Ok(Gene::new(
            name,
            GeneKind::Array(ArrayGene {
                template: Box::new(template),
                elements,
                min_size,
                max_size,
            }),
        ))
    }

    /// Wraps `inner` in an optional gene that starts active.
    pub fn optional(inner: Gene) -> Self {
        let name = inner.name.clone();
        Gene::new(
            name,
            GeneKind::Optional(OptionalGene {
                inner: Box::new(inner),
                active: true,
            }),
        )
    }

    pub fn disruptive(inner: Gene, probability: f64) -> Self {
        let name = inner.name.clone();
        Gene::new(
            name,
            GeneKind::Disruptive(DisruptiveGene {
                inner: Box::new(inner),
                probability: probability.clamp(0.0, 1.0),
            }),
        )
    }

    pub fn regex(name: impl Into<String>, pattern: &str) -> Result<Self, CoreError> {
        Ok(Gene::new(name, GeneKind::Regex(RegexGene::parse(pattern)?)))
    }

    pub fn immutable(name: impl Into<String>, value: impl Into<String>, in_quotes: bool) -> Self {
        Gene::new(
            name,
            GeneKind::ImmutableData(ImmutableDataGene {
                value: value.into(),
                in_quotes,
            }),
        )
    }

    pub fn sql_primary_key(table: impl Into<String>, insertion: InsertionId, inner: Gene) -> Self {
        let name = inner.name.clone();
        Gene::new(
            name,
            GeneKind::SqlPrimaryKey(SqlPrimaryKeyGene {
                table: table.into(),
                insertion,
                inner: Box::new(inner),
            }),
        )
    }

    pub fn sql_foreign_key(
        name: impl Into<String>,
        target_table: impl Into<String>,
        insertion: InsertionId,
        nullable: bool,
    ) -> Self {
        Gene::new(
            name,
            GeneKind::SqlForeignKey(SqlForeignKeyGene {
                target_table: target_table.into(),
                insertion,
                primary_key: None,
                nullable,
            }),
        )
    }

    pub fn sql_xml(name: impl Into<String>, object: Gene) -> Self {
        Gene::new(
            name,
            GeneKind::SqlXml(SqlXmlGene {
                inner: Box::new(object),
            }),
        )
    }
}

// ---------------------------------------------------------------------------
// Read-only accessors
// ---------------------------------------------------------------------------

impl Gene {
    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    /// Whether the search may change this gene's value.
    pub fn is_mutable(&self) -> bool {
        match &self.kind {
            GeneKind::Integer(g) => g.min < g.max,
            GeneKind::Double(_) | GeneKind::Boolean(_) => true,
            GeneKind::String(g) => g.max_length > 0,
            GeneKind::Enum(g) => g.values.len() > 1,
            GeneKind::Object(g) => g.fields.iter().any(Gene::is_mutable),
            GeneKind::Array(g) => {
                g.max_size > g.min_size || g.elements.iter().any(Gene::is_mutable)
            }
            GeneKind::Optional(_) => true,
            GeneKind::Disruptive(g) => g.probability > 0.0 && g.inner.is_mutable(),
            GeneKind::Regex(g) => g.is_mutable(),
            GeneKind::SqlPrimaryKey(g) => g.inner.is_mutable(),
            GeneKind::SqlForeignKey(_) => true,
            GeneKind::SqlXml(g) => g.inner.is_mutable(),
            GeneKind::ImmutableData(_) => false,
        }
    }

    pub fn is_printable(&self) -> bool {
        match &self.kind {
            GeneKind::Object(g) => g.fields.iter().all(Gene::is_printable),
            GeneKind::Optional(g) => g.inner.is_printable(),
            GeneKind::Disruptive(g) => g.inner.is_printable(),
            _ => true,
        }
    }

    /// `false` only for an inactive optional (at any wrapper depth).
    pub fn is_present(&self) -> bool {
        match &self.kind {
            GeneKind::Optional(g) => g.active && g.inner.is_present(),
            GeneKind::Disruptive(g) => g.inner.is_present(),
            _ => true,
        }
    }

    /// The value-carrying gene beneath optional, disruptive and primary-key wrappers.
    pub fn leaf(&self) -> &Gene {
        match &self.kind {
            GeneKind::Optional(g) => g.inner.leaf(),
            GeneKind::Disruptive(g) => g.inner.leaf(),
            GeneKind::SqlPrimaryKey(g) => g.inner.leaf(),
            _ => self,
        }
    }

    pub fn leaf_mut(&mut self) -> &mut Gene {
        match self.kind {
            GeneKind::Optional(ref mut g) => g.inner.leaf_mut(),
            GeneKind::Disruptive(ref mut g) => g.inner.leaf_mut(),
            GeneKind::SqlPrimaryKey(ref mut g) => g.inner.leaf_mut(),
            _ => self,
        }
    }

    /// Named field of an object gene (looking through wrappers).
    pub fn field(&self, name: &str) -> Option<&Gene> {
        match &self.leaf().kind {
            GeneKind::Object(o) => o.fields.iter().find(|f| f.name == name),
            GeneKind::SqlXml(x) => x.inner.field(name),
            _ => None,
        }
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Gene> {
        match self.leaf_mut().kind {
            GeneKind::Object(ref mut o) => o.fields.iter_mut().find(|f| f.name == name),
            GeneKind::SqlXml(ref mut x) => x.inner.field_mut(name),
            _ => None,
        }
    }

    /// This gene followed by all of its descendants, depth first.
    pub fn flat_view(&self) -> Vec<&Gene> {
        let mut out = vec![self];
        match &self.kind {
            GeneKind::Object(g) => g.fields.iter().for_each(|f| out.extend(f.flat_view())),
            GeneKind::Array(g) => g.elements.iter().for_each(|e| out.extend(e.flat_view())),
            GeneKind::Optional(g) => out.extend(g.inner.flat_view()),
            GeneKind::Disruptive(g) => out.extend(g.inner.flat_view()),
            GeneKind::SqlPrimaryKey(g) => out.extend(g.inner.flat_view()),
            GeneKind::SqlXml(g) => out.extend(g.inner.flat_view()),
            _ => {}
        }
        out
    }

    /// Value equality, false for genes of different variants.
    pub fn contains_same_value_as(&self, other: &Gene) -> bool {
        match (&self.kind, &other.kind) {
            (GeneKind::Integer(a), GeneKind::Integer(b)) => a.value == b.value,
            (GeneKind::Double(a), GeneKind::Double(b)) => a.value == b.value,
            (GeneKind::Boolean(a), GeneKind::Boolean(b)) => a.value == b.value,
            (GeneKind::String(a), GeneKind::String(b)) => a.value == b.value,
            (GeneKind::Enum(a), GeneKind::Enum(b)) => a.current() == b.current(),
            (GeneKind::Object(a), GeneKind::Object(b)) => {
                a.fields.len() == b.fields.len()
                    && a.fields
                        .iter()
                        .zip(&b.fields)
                        .all(|(x, y)| x.contains_same_value_as(y))
            }
            (GeneKind::Array(a), GeneKind::Array(b)) => {
                a.elements.len() == b.elements.len()
                    && a.elements
                        .iter()
                        .zip(&b.elements)
                        .all(|(x, y)| x.contains_same_value_as(y))
            }
            (GeneKind::Optional(a), GeneKind::Optional(b)) => {
                a.active == b.active && a.inner.contains_same_value_as(&b.inner)
            }
            (GeneKind::Disruptive(a), GeneKind::Disruptive(b)) => {
                a.inner.contains_same_value_as(&b.inner)
            }
            (GeneKind::Regex(a), GeneKind::Regex(b)) => a.value() == b.value(),
            (GeneKind::SqlPrimaryKey(a), GeneKind::SqlPrimaryKey(b)) => {
                a.inner.contains_same_value_as(&b.inner)
            }
            (GeneKind::SqlForeignKey(a), GeneKind::SqlForeignKey(b)) => {
                a.primary_key == b.primary_key
            }
            (GeneKind::SqlXml(a), GeneKind::SqlXml(b)) => a.inner.contains_same_value_as(&b.inner),
            (GeneKind::ImmutableData(a), GeneKind::ImmutableData(b)) => a.value == b.value,
            _ => false,
        }
    }

    /// Renders the current value in the given mode.
    pub fn printable(&self, mode: PrintMode) -> String {
        match &self.kind {
            GeneKind::Integer(g) => g.value.to_string(),
            GeneKind::Double(g) => number::format_double(g.value),
            GeneKind::Boolean(g) => g.value.to_string(),
            GeneKind::String(g) => quote_text(&g.value, mode),
            GeneKind::Enum(g) => quote_text(g.current(), mode),
            GeneKind::Object(g) => g.printable(&self.name, mode),
            GeneKind::Array(g) => g.printable(mode),
            GeneKind::Optional(g) => {
                if g.active {
                    g.inner.printable(mode)
                } else {
                    null_literal(mode).to_string()
                }
            }
            GeneKind::Disruptive(g) => g.inner.printable(mode),
            GeneKind::Regex(g) => quote_text(&g.value(), mode),
            GeneKind::SqlPrimaryKey(g) => g.inner.printable(mode),
            GeneKind::SqlForeignKey(g) => match g.primary_key {
                Some(id) => id.to_string(),
                None => null_literal(mode).to_string(),
            },
            GeneKind::SqlXml(g) => quote_text(&g.inner.printable(PrintMode::Xml), mode),
            GeneKind::ImmutableData(g) => {
                if g.in_quotes {
                    quote_text(&g.value, mode)
                } else {
                    g.value.clone()
                }
            }
        }
    }

    pub fn raw_value(&self) -> String {
        self.printable(PrintMode::Raw)
    }
}

// ---------------------------------------------------------------------------
// Value operators
// ---------------------------------------------------------------------------

impl Gene {
    /// Replaces the value with a fresh valid one.
    ///
    /// With `force_new`, the new value differs from the current one whenever
    /// the gene's domain allows it.
    pub fn randomize(
        &mut self,
        rng: &mut Randomness,
        force_new: bool,
        ctx: &GeneContext,
    ) -> Result<(), CoreError> {
        match &mut self.kind {
            GeneKind::Integer(g) => g.randomize(rng, force_new),
            GeneKind::Double(g) => g.randomize(rng, force_new),
            GeneKind::Boolean(g) => g.randomize(rng, force_new),
            GeneKind::String(g) => g.randomize(rng, force_new),
            GeneKind::Enum(g) => g.randomize(rng, force_new),
            GeneKind::Object(g) => return g.randomize(rng, force_new, ctx),
            GeneKind::Array(g) => return g.randomize(rng, force_new, ctx),
            GeneKind::Optional(g) => return g.randomize(rng, force_new, ctx),
            GeneKind::Disruptive(g) => return g.inner.randomize(rng, force_new, ctx),
            GeneKind::Regex(g) => g.randomize(rng),
            GeneKind::SqlPrimaryKey(g) => return g.inner.randomize(rng, force_new, ctx),
            GeneKind::SqlForeignKey(g) => g.randomize(rng, force_new, ctx),
            GeneKind::SqlXml(g) => return g.inner.randomize(rng, force_new, ctx),
            GeneKind::ImmutableData(_) => {
                return Err(CoreError::ImmutableGene {
                    name: self.name.clone(),
                })
            }
        }
        Ok(())
    }

    /// Applies one small, type-specific perturbation.
    pub fn standard_mutation(
        &mut self,
        rng: &mut Randomness,
        apc: &AdaptiveControl,
        ctx: &GeneContext,
    ) -> Result<(), CoreError> {
        match &mut self.kind {
            GeneKind::Integer(g) => g.standard_mutation(rng, apc),
            GeneKind::Double(g) => g.standard_mutation(rng, apc),
            GeneKind::Boolean(g) => g.value = !g.value,
            GeneKind::String(g) => g.standard_mutation(rng, apc, ctx),
            GeneKind::Enum(g) => g.randomize(rng, true),
            GeneKind::Object(g) => return g.standard_mutation(rng, apc, ctx),
            GeneKind::Array(g) => return g.standard_mutation(rng, apc, ctx),
            GeneKind::Optional(g) => return g.standard_mutation(rng, apc, ctx),
            GeneKind::Disruptive(g) => return g.inner.standard_mutation(rng, apc, ctx),
            GeneKind::Regex(g) => g.standard_mutation(rng),
            GeneKind::SqlPrimaryKey(g) => return g.inner.standard_mutation(rng, apc, ctx),
            GeneKind::SqlForeignKey(g) => g.randomize(rng, true, ctx),
            GeneKind::SqlXml(g) => return g.inner.standard_mutation(rng, apc, ctx),
            GeneKind::ImmutableData(_) => {
                return Err(CoreError::ImmutableGene {
                    name: self.name.clone(),
                })
            }
        }
        Ok(())
    }

    /// Overwrites this gene's value (never its name or bounds) with `other`'s.
    pub fn copy_value_from(&mut self, other: &Gene) -> Result<(), CoreError> {
        let name = &self.name;
        let expected = self.kind.type_name();
        let mismatch = || CoreError::GeneTypeMismatch {
            name: name.clone(),
            expected,
            found: other.type_name(),
        };
        match (&mut self.kind, &other.kind) {
            (GeneKind::ImmutableData(_), _) => Err(CoreError::ImmutableGene { name: name.clone() }),
            (GeneKind::Integer(a), GeneKind::Integer(b)) => {
                a.value = b.value.clamp(a.min, a.max);
                Ok(())
            }
            (GeneKind::Double(a), GeneKind::Double(b)) => {
                a.value = a.clamp(b.value);
                Ok(())
            }
            (GeneKind::Boolean(a), GeneKind::Boolean(b)) => {
                a.value = b.value;
                Ok(())
            }
            (GeneKind::String(a), GeneKind::String(b)) => {
                a.assign(&b.value);
                Ok(())
            }
            (GeneKind::Enum(a), GeneKind::Enum(b)) => {
                a.select(b.current());
                Ok(())
            }
            (GeneKind::Object(a), GeneKind::Object(b)) => {
                for field in a.fields.iter_mut() {
                    if let Some(source) = b.fields.iter().find(|f| f.name == field.name) {
                        if field.is_mutable() {
                            field.copy_value_from(source)?;
                        }
                    }
                }
                Ok(())
            }
            (GeneKind::Array(a), GeneKind::Array(b)) => {
                a.elements = b.elements.iter().take(a.max_size).cloned().collect();
                while a.elements.len() < a.min_size {
                    a.elements.push((*a.template).clone());
                }
                Ok(())
            }
            (GeneKind::Optional(a), GeneKind::Optional(b)) => {
                a.active = b.active;
                a.inner.copy_value_from(&b.inner)
            }
            (GeneKind::Disruptive(a), GeneKind::Disruptive(b)) => a.inner.copy_value_from(&b.inner),
            (GeneKind::Regex(a), GeneKind::Regex(b)) if a.source == b.source => {
                a.root = b.root.clone();
                Ok(())
            }
            (GeneKind::SqlPrimaryKey(a), GeneKind::SqlPrimaryKey(b)) => {
                a.inner.copy_value_from(&b.inner)
            }
            (GeneKind::SqlForeignKey(a), GeneKind::SqlForeignKey(b)) => {
                a.primary_key = b.primary_key;
                Ok(())
            }
            (GeneKind::SqlXml(a), GeneKind::SqlXml(b)) => a.inner.copy_value_from(&b.inner),
            _ => Err(mismatch()),
        }
    }

    /// Sets a scalar leaf from its textual form. Returns whether the text was accepted.
    pub fn assign_raw(&mut self, raw: &str) -> bool {
        match &mut self.leaf_mut().kind {
            GeneKind::Integer(g) => match raw.trim().parse::<i64>() {
                Ok(v) if (g.min..=g.max).contains(&v) => {
                    g.value = v;
                    true
                }
                _ => false,
            },
            GeneKind::Double(g) => match raw.trim().parse::<f64>() {
                Ok(v) if v.is_finite() => {
                    g.value = g.clamp(v);
                    true
                }
                _ => false,
            },
            GeneKind::Boolean(g) => match raw.trim() {
                "true" => {
                    g.value = true;
                    true
                }
                "false" => {
                    g.value = false;
                    true
                }
                _ => false,
            },
            GeneKind::String(g) => {
                let len = raw.chars().count();
                if len < g.min_length || len > g.max_length {
                    return false;
                }
                g.value = raw.to_string();
                true
            }
            GeneKind::Enum(g) => g.select(raw),
            _ => false,
        }
    }
}

impl GeneKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            GeneKind::Integer(_) => "integer",
            GeneKind::Double(_) => "double",
            GeneKind::Boolean(_) => "boolean",
            GeneKind::String(_) => "string",
            GeneKind::Enum(_) => "enum",
            GeneKind::Object(_) => "object",
            GeneKind::Array(_) => "array",
            GeneKind::Optional(_) => "optional",
            GeneKind::Disruptive(_) => "disruptive",
            GeneKind::Regex(_) => "regex",
            GeneKind::SqlPrimaryKey(_) => "sql_primary_key",
            GeneKind::SqlForeignKey(_) => "sql_foreign_key",
            GeneKind::SqlXml(_) => "sql_xml",
            GeneKind::ImmutableData(_) => "immutable_data",
        }
    }
}

pub(crate) fn quote_text(s: &str, mode: PrintMode) -> String {
    match mode {
        PrintMode::Raw => s.to_string(),
        PrintMode::Json => serde_json::Value::String(s.to_string()).to_string(),
        PrintMode::Xml => s
            .replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;"),
        PrintMode::Sql => format!("'{}'", s.replace('\'', "''")),
    }
}

pub(crate) fn null_literal(mode: PrintMode) -> &'static str {
    match mode {
        PrintMode::Json => "null",
        PrintMode::Sql => "NULL",
        PrintMode::Raw | PrintMode::Xml => "",
    }
}
