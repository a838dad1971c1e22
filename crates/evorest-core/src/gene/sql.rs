//! SQL-specific genes.

use serde::{Deserialize, Serialize};

use super::{Gene, GeneContext};
use crate::id::InsertionId;
use crate::randomness::Randomness;

/// Chance that a nullable foreign key is randomized to `NULL`.
const NULL_FOREIGN_KEY_PROBABILITY: f64 = 0.05;

/// Primary-key column of the insertion `insertion` into `table`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlPrimaryKeyGene {
    pub table: String,
    pub insertion: InsertionId,
    pub inner: Box<Gene>,
}

/// Foreign-key column referencing a primary key by insertion id.
///
/// `insertion` is the owning insertion; `primary_key` is the referenced one,
/// `None` meaning `NULL`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlForeignKeyGene {
    pub target_table: String,
    pub insertion: InsertionId,
    pub primary_key: Option<InsertionId>,
    pub nullable: bool,
}

impl SqlForeignKeyGene {
    /// Rebinds to a random primary key of the target table.
    ///
    /// Leaves the gene unchanged when no candidate exists and the column is
    /// not nullable; initialization repair deals with that case.
    pub(crate) fn randomize(&mut self, rng: &mut Randomness, force_new: bool, ctx: &GeneContext) {
        let candidates: Vec<InsertionId> = ctx
            .primary_keys
            .iter()
            .filter(|(table, id)| table == &self.target_table && *id != self.insertion)
            .map(|(_, id)| *id)
            .collect();

        if self.nullable && (candidates.is_empty() || rng.next_bool(NULL_FOREIGN_KEY_PROBABILITY)) {
            self.primary_key = None;
            return;
        }
        let pool: Vec<InsertionId> = if force_new && candidates.len() > 1 {
            candidates
                .into_iter()
                .filter(|id| Some(*id) != self.primary_key)
                .collect()
        } else {
            candidates
        };
        if let Some(id) = rng.choose(&pool) {
            self.primary_key = Some(*id);
        }
    }

    pub fn is_bound(&self) -> bool {
        self.primary_key.is_some()
    }
}

/// XML column whose content is generated from an object gene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlXmlGene {
    pub inner: Box<Gene>,
}

/// A value that already exists in the database and must never change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImmutableDataGene {
    pub value: String,
    pub in_quotes: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gene::{GeneKind, PrintMode};

    fn ctx() -> GeneContext {
        GeneContext {
            string_pool: vec![],
            primary_keys: vec![
                ("users".to_string(), InsertionId(1)),
                ("users".to_string(), InsertionId(2)),
                ("orders".to_string(), InsertionId(3)),
            ],
        }
    }

    #[test]
    fn foreign_key_binds_to_target_table_only() {
        let mut rng = Randomness::seeded(3);
        let mut fk = SqlForeignKeyGene {
            target_table: "users".into(),
            insertion: InsertionId(3),
            primary_key: None,
            nullable: false,
        };
        for _ in 0..30 {
            fk.randomize(&mut rng, false, &ctx());
            let id = fk.primary_key.unwrap();
            assert!(id == InsertionId(1) || id == InsertionId(2));
        }
    }

    #[test]
    fn force_new_switches_reference() {
        let mut rng = Randomness::seeded(4);
        let mut fk = SqlForeignKeyGene {
            target_table: "users".into(),
            insertion: InsertionId(3),
            primary_key: Some(InsertionId(1)),
            nullable: false,
        };
        fk.randomize(&mut rng, true, &ctx());
        assert_eq!(fk.primary_key, Some(InsertionId(2)));
    }

    #[test]
    fn non_nullable_without_candidates_stays_unbound() {
        let mut rng = Randomness::seeded(5);
        let mut fk = SqlForeignKeyGene {
            target_table: "missing".into(),
            insertion: InsertionId(9),
            primary_key: None,
            nullable: false,
        };
        fk.randomize(&mut rng, true, &ctx());
        assert!(!fk.is_bound());
    }

    #[test]
    fn xml_column_renders_object_as_quoted_xml() {
        let g = Gene::sql_xml("doc", Gene::object("doc", vec![Gene::boolean("ok")]));
        assert!(matches!(g.kind, GeneKind::SqlXml(_)));
        assert_eq!(g.printable(PrintMode::Sql), "'<doc><ok>false</ok></doc>'");
    }
}
