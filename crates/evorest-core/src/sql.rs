//! SQL schema, insertion actions and foreign-key repair.
//!
//! Initialization sequences are ordered lists of [`SqlAction`]s executed
//! before an individual's main actions. A sequence is consistent when every
//! foreign key either is `NULL` (if the column allows it) or references a
//! primary key inserted earlier in the same sequence, including rows that
//! represent pre-existing data.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::gene::{Gene, GeneContext, GeneKind, PrintMode, DEFAULT_MAX_STRING_LENGTH};
use crate::id::InsertionId;
use crate::randomness::Randomness;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    BigInt,
    Double,
    Boolean,
    Varchar,
    Text,
    Xml,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub nullable: bool,
    /// Maximum length for character columns.
    #[serde(default)]
    pub size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyDef {
    pub column: String,
    pub target_table: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<Column>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyDef>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn foreign_key_for(&self, column: &str) -> Option<&ForeignKeyDef> {
        self.foreign_keys
            .iter()
            .find(|fk| fk.column.eq_ignore_ascii_case(column))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbSchema {
    pub tables: IndexMap<String, TableSchema>,
}

impl DbSchema {
    pub fn new(tables: Vec<TableSchema>) -> Self {
        DbSchema {
            tables: tables.into_iter().map(|t| (t.name.clone(), t)).collect(),
        }
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables
            .get(name)
            .or_else(|| self.tables.values().find(|t| t.name.eq_ignore_ascii_case(name)))
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// One row inserted into (or already present in) `table`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlAction {
    pub table: String,
    pub insertion: InsertionId,
    /// One gene per column, named after the column.
    pub genes: Vec<Gene>,
    /// The row already exists; it is never sent to the database and its genes are immutable.
    pub represents_existing_data: bool,
}

impl SqlAction {
    pub fn name(&self) -> String {
        format!("SQL_Insert_{}", self.table)
    }

    pub fn column(&self, name: &str) -> Option<&Gene> {
        self.genes.iter().find(|g| g.name.eq_ignore_ascii_case(name))
    }

    pub fn has_primary_key(&self) -> bool {
        self.genes
            .iter()
            .any(|g| matches!(g.kind, GeneKind::SqlPrimaryKey(_)))
    }

    fn primary_key_gene(&self) -> Option<&Gene> {
        self.genes
            .iter()
            .find(|g| matches!(g.kind, GeneKind::SqlPrimaryKey(_)))
    }

    pub fn randomize(&mut self, rng: &mut Randomness, ctx: &GeneContext) -> Result<(), CoreError> {
        if self.represents_existing_data {
            return Ok(());
        }
        for g in self.genes.iter_mut().filter(|g| g.is_mutable()) {
            g.randomize(rng, false, ctx)?;
        }
        Ok(())
    }

    /// `(column, SQL literal)` pairs, with foreign keys rendered as the
    /// value of the primary key they reference in `sequence`.
    pub fn render_values(&self, sequence: &[SqlAction]) -> Vec<(String, String)> {
        self.genes
            .iter()
            .map(|g| {
                let value = match &g.kind {
                    GeneKind::SqlForeignKey(fk) => fk
                        .primary_key
                        .and_then(|id| sequence.iter().find(|a| a.insertion == id))
                        .and_then(SqlAction::primary_key_gene)
                        .map(|pk| pk.printable(PrintMode::Sql))
                        .unwrap_or_else(|| "NULL".to_string()),
                    _ => g.printable(PrintMode::Sql),
                };
                (g.name.clone(), value)
            })
            .collect()
    }
}

/// Builds insertion actions from a schema, handing out insertion ids.
#[derive(Debug, Clone)]
pub struct SqlInsertBuilder {
    schema: DbSchema,
    next_insertion: u64,
}

impl SqlInsertBuilder {
    pub fn new(schema: DbSchema) -> Self {
        SqlInsertBuilder {
            schema,
            next_insertion: 1,
        }
    }

    pub fn schema(&self) -> &DbSchema {
        &self.schema
    }

    fn next_id(&mut self) -> InsertionId {
        let id = InsertionId(self.next_insertion);
        self.next_insertion += 1;
        id
    }

    /// Insertion into `table` setting every column, preceded by insertions
    /// for each table it references. Foreign keys are bound to the fresh rows.
    pub fn create_insertion(&mut self, table: &str) -> Result<Vec<SqlAction>, CoreError> {
        let mut out = Vec::new();
        let mut visiting = Vec::new();
        self.create_recursive(table, &mut visiting, &mut out)?;
        Ok(out)
    }

    fn create_recursive(
        &mut self,
        table: &str,
        visiting: &mut Vec<String>,
        out: &mut Vec<SqlAction>,
    ) -> Result<Option<InsertionId>, CoreError> {
        let schema = self
            .schema
            .table(table)
            .cloned()
            .ok_or_else(|| CoreError::TableNotFound {
                table: table.to_string(),
            })?;
        // cyclic references are left unbound and resolved by repair
        if visiting.contains(&schema.name) {
            return Ok(None);
        }
        visiting.push(schema.name.clone());

        let mut referenced = Vec::new();
        for fk in &schema.foreign_keys {
            let nullable = schema.column(&fk.column).is_some_and(|c| c.nullable);
            let target = if nullable {
                None
            } else {
                self.create_recursive(&fk.target_table, visiting, out)?
            };
            referenced.push((fk.column.clone(), target));
        }

        let id = self.next_id();
        let genes = schema
            .columns
            .iter()
            .map(|column| {
                let bound = referenced
                    .iter()
                    .find(|(c, _)| c.eq_ignore_ascii_case(&column.name))
                    .map(|(_, t)| *t);
                column_gene(&schema, column, id, bound)
            })
            .collect();
        out.push(SqlAction {
            table: schema.name.clone(),
            insertion: id,
            genes,
            represents_existing_data: false,
        });
        visiting.pop();
        Ok(Some(id))
    }

    /// Actions standing for rows that already exist in `table`.
    pub fn extract_existing(
        &mut self,
        table: &str,
        rows: &[IndexMap<String, String>],
    ) -> Result<Vec<SqlAction>, CoreError> {
        let schema = self
            .schema
            .table(table)
            .cloned()
            .ok_or_else(|| CoreError::TableNotFound {
                table: table.to_string(),
            })?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id = self.next_id();
            let genes = schema
                .columns
                .iter()
                .filter_map(|column| {
                    let value = row.get(&column.name)?;
                    let quoted = matches!(
                        column.column_type,
                        ColumnType::Varchar | ColumnType::Text | ColumnType::Xml
                    );
                    let data = Gene::immutable(column.name.clone(), value.clone(), quoted);
                    Some(if column.primary_key {
                        Gene::sql_primary_key(schema.name.clone(), id, data)
                    } else {
                        data
                    })
                })
                .collect();
            out.push(SqlAction {
                table: schema.name.clone(),
                insertion: id,
                genes,
                represents_existing_data: true,
            });
        }
        Ok(out)
    }
}

fn column_gene(
    table: &TableSchema,
    column: &Column,
    insertion: InsertionId,
    bound: Option<Option<InsertionId>>,
) -> Gene {
    if let Some(fk) = table.foreign_key_for(&column.name) {
        let mut gene = Gene::sql_foreign_key(
            column.name.clone(),
            fk.target_table.clone(),
            insertion,
            column.nullable,
        );
        if let GeneKind::SqlForeignKey(g) = &mut gene.kind {
            g.primary_key = bound.flatten();
        }
        return gene;
    }
    let name = column.name.clone();
    let value = match column.column_type {
        ColumnType::Integer => Gene::int32(name),
        ColumnType::BigInt => Gene::int64(name),
        ColumnType::Double => Gene::double(name),
        ColumnType::Boolean => Gene::boolean(name),
        ColumnType::Varchar | ColumnType::Text => {
            let max = column.size.unwrap_or(DEFAULT_MAX_STRING_LENGTH);
            let mut g = Gene::string(name);
            if let GeneKind::String(s) = &mut g.kind {
                s.max_length = max;
            }
            g
        }
        ColumnType::Xml => Gene::sql_xml(
            name.clone(),
            Gene::object(name, vec![Gene::string("content")]),
        ),
    };
    if column.primary_key {
        Gene::sql_primary_key(table.name.clone(), insertion, value)
    } else {
        value
    }
}

/// Primary keys of `actions` as `(table, insertion)`, in sequence order.
pub fn primary_keys(actions: &[SqlAction]) -> Vec<(String, InsertionId)> {
    let mut keys: Vec<(String, InsertionId)> = Vec::new();
    for a in actions.iter().filter(|a| a.has_primary_key()) {
        if !keys.iter().any(|(_, id)| *id == a.insertion) {
            keys.push((a.table.clone(), a.insertion));
        }
    }
    keys
}

/// First foreign key that does not resolve to an earlier primary key.
pub fn first_unresolved_foreign_key(actions: &[SqlAction]) -> Option<CoreError> {
    for (i, action) in actions.iter().enumerate() {
        let earlier = primary_keys(&actions[..i]);
        for g in &action.genes {
            let GeneKind::SqlForeignKey(fk) = &g.kind else {
                continue;
            };
            let ok = match fk.primary_key {
                None => fk.nullable,
                Some(id) => earlier
                    .iter()
                    .any(|(t, pk)| *pk == id && t.eq_ignore_ascii_case(&fk.target_table)),
            };
            if !ok {
                return Some(CoreError::UnresolvedForeignKey {
                    table: action.table.clone(),
                    column: g.name.clone(),
                    insertion: action.insertion,
                });
            }
        }
    }
    None
}

pub fn verify_foreign_keys(actions: &[SqlAction]) -> bool {
    first_unresolved_foreign_key(actions).is_none()
}

/// Restores foreign-key consistency in place.
///
/// Rows representing existing data are moved to the front. Each broken
/// foreign key is rebound to a random earlier primary key of its target
/// table, set to `NULL` if the column allows it, and otherwise its row is
/// dropped. Returns the number of dropped rows.
pub fn repair_foreign_keys(actions: &mut Vec<SqlAction>, rng: &mut Randomness) -> usize {
    let (existing, fresh): (Vec<SqlAction>, Vec<SqlAction>) = std::mem::take(actions)
        .into_iter()
        .partition(|a| a.represents_existing_data);
    *actions = existing;
    actions.extend(fresh);

    let mut removed = 0;
    let mut i = 0;
    while i < actions.len() {
        let earlier = primary_keys(&actions[..i]);
        let mut drop_row = false;
        for g in actions[i].genes.iter_mut() {
            let GeneKind::SqlForeignKey(fk) = &mut g.kind else {
                continue;
            };
            let candidates: Vec<InsertionId> = earlier
                .iter()
                .filter(|(t, _)| t.eq_ignore_ascii_case(&fk.target_table))
                .map(|(_, id)| *id)
                .collect();
            let valid = match fk.primary_key {
                None => fk.nullable,
                Some(id) => candidates.contains(&id),
            };
            if valid {
                continue;
            }
            if let Some(id) = rng.choose(&candidates) {
                fk.primary_key = Some(*id);
            } else if fk.nullable {
                fk.primary_key = None;
            } else {
                drop_row = true;
                break;
            }
        }
        if drop_row {
            actions.remove(i);
            removed += 1;
        } else {
            i += 1;
        }
    }
    removed
}
