//! Composite genes: objects with a fixed field set and bounded arrays.

use serde::{Deserialize, Serialize};

use super::{null_literal, quote_text, Gene, GeneContext, GeneKind, PrintMode};
use crate::adaptive::AdaptiveControl;
use crate::error::CoreError;
use crate::randomness::Randomness;

/// Arrays are randomized to at most this many elements above their minimum.
const MAX_RANDOMIZED_ELEMENTS: usize = 5;

/// Ordered named fields. The field set is fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectGene {
    pub fields: Vec<Gene>,
}

impl ObjectGene {
    pub(crate) fn randomize(
        &mut self,
        rng: &mut Randomness,
        force_new: bool,
        ctx: &GeneContext,
    ) -> Result<(), CoreError> {
        for field in self.fields.iter_mut().filter(|f| f.is_mutable()) {
            field.randomize(rng, force_new, ctx)?;
        }
        Ok(())
    }

    pub(crate) fn standard_mutation(
        &mut self,
        rng: &mut Randomness,
        apc: &AdaptiveControl,
        ctx: &GeneContext,
    ) -> Result<(), CoreError> {
        let mutable: Vec<usize> = (0..self.fields.len())
            .filter(|i| self.fields[*i].is_mutable())
            .collect();
        match rng.choose(&mutable) {
            Some(&i) => self.fields[i].standard_mutation(rng, apc, ctx),
            None => Ok(()),
        }
    }

    pub(crate) fn printable(&self, name: &str, mode: PrintMode) -> String {
        match mode {
            PrintMode::Json | PrintMode::Raw => {
                let body: Vec<String> = self
                    .fields
                    .iter()
                    .filter(|f| f.is_present())
                    .map(|f| {
                        format!(
                            "{}:{}",
                            quote_text(&f.name, PrintMode::Json),
                            f.printable(PrintMode::Json)
                        )
                    })
                    .collect();
                format!("{{{}}}", body.join(","))
            }
            PrintMode::Xml => {
                let body: String = self
                    .fields
                    .iter()
                    .filter(|f| f.is_present())
                    .map(xml_element)
                    .collect();
                format!("<{}>{}</{}>", name, body, name)
            }
            PrintMode::Sql => quote_text(&self.printable(name, PrintMode::Json), PrintMode::Sql),
        }
    }
}

fn xml_element(gene: &Gene) -> String {
    match &gene.leaf().kind {
        GeneKind::Object(_) => gene.leaf().printable(PrintMode::Xml),
        _ => format!(
            "<{}>{}</{}>",
            gene.name,
            gene.printable(PrintMode::Xml),
            gene.name
        ),
    }
}

/// Homogeneous list whose length stays within `[min_size, max_size]`.
///
/// New elements are copies of `template`. Length bounds are enforced here,
/// never by the elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayGene {
    pub template: Box<Gene>,
    pub elements: Vec<Gene>,
    pub min_size: usize,
    pub max_size: usize,
}

impl ArrayGene {
    fn fresh_element(&self, rng: &mut Randomness, ctx: &GeneContext) -> Result<Gene, CoreError> {
        let mut element = (*self.template).clone();
        if element.is_mutable() {
            element.randomize(rng, false, ctx)?;
        }
        Ok(element)
    }

    pub(crate) fn randomize(
        &mut self,
        rng: &mut Randomness,
        _force_new: bool,
        ctx: &GeneContext,
    ) -> Result<(), CoreError> {
        let upper = self
            .max_size
            .min(self.min_size.saturating_add(MAX_RANDOMIZED_ELEMENTS));
        let n = rng.next_int(self.min_size as i64, upper as i64) as usize;
        let mut elements = Vec::with_capacity(n);
        for _ in 0..n {
            elements.push(self.fresh_element(rng, ctx)?);
        }
        self.elements = elements;
        Ok(())
    }

    pub(crate) fn standard_mutation(
        &mut self,
        rng: &mut Randomness,
        apc: &AdaptiveControl,
        ctx: &GeneContext,
    ) -> Result<(), CoreError> {
        let len = self.elements.len();
        let can_add = len < self.max_size;
        let can_remove = len > self.min_size;
        let mutable: Vec<usize> = (0..len)
            .filter(|i| self.elements[*i].is_mutable())
            .collect();

        if can_add && (len == 0 || rng.next_bool(0.1)) {
            let element = self.fresh_element(rng, ctx)?;
            self.elements.push(element);
        } else if can_remove && rng.next_bool(0.1) {
            let i = rng.next_index(len);
            self.elements.remove(i);
        } else if let Some(&i) = rng.choose(&mutable) {
            self.elements[i].standard_mutation(rng, apc, ctx)?;
        } else if can_add {
            let element = self.fresh_element(rng, ctx)?;
            self.elements.push(element);
        } else if can_remove {
            let i = rng.next_index(len);
            self.elements.remove(i);
        }
        Ok(())
    }

    pub(crate) fn printable(&self, mode: PrintMode) -> String {
        match mode {
            PrintMode::Json => {
                let items: Vec<String> = self
                    .elements
                    .iter()
                    .map(|e| {
                        if e.is_present() {
                            e.printable(PrintMode::Json)
                        } else {
                            null_literal(PrintMode::Json).to_string()
                        }
                    })
                    .collect();
                format!("[{}]", items.join(","))
            }
            PrintMode::Raw => self
                .elements
                .iter()
                .map(|e| e.printable(PrintMode::Raw))
                .collect::<Vec<_>>()
                .join(","),
            PrintMode::Xml => self.elements.iter().map(xml_element).collect(),
            PrintMode::Sql => quote_text(&self.printable(PrintMode::Json), PrintMode::Sql),
        }
    }
}
