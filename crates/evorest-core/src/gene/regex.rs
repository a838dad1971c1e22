//! Genes generated from a regular-expression subset.
//!
//! Supported syntax: literals, escapes (`\d`, `\w`, `\s` and escaped
//! punctuation), character classes with ranges, `.`, groups (capturing or
//! `(?:...)`) with `|` alternatives, and the quantifiers `*`, `+`, `?`,
//! `{n}`, `{n,}` and `{n,m}`. Anchors are accepted and ignored. Negated
//! classes and back-references are rejected.
//!
//! Unbounded repetitions are clamped to `min + QUANTIFIER_LIMIT` so that
//! nested quantifiers cannot explode the generated string.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::randomness::Randomness;

pub const QUANTIFIER_LIMIT: u32 = 2;

const SWITCH_ALTERNATIVE_PROBABILITY: f64 = 0.1;
const RESIZE_PROBABILITY: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegexGene {
    pub source: String,
    pub root: RxDisjunctions,
}

/// `a|b|c` at one nesting level; only the `active` alternative is rendered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RxDisjunctions {
    pub alternatives: Vec<RxSequence>,
    pub active: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RxSequence {
    pub terms: Vec<RxQuantifier>,
}

/// An atom repeated between `min` and `limited_max` times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RxQuantifier {
    pub template: RxAtom,
    pub min: u32,
    pub limited_max: u32,
    pub atoms: Vec<RxAtom>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RxAtom {
    Literal { value: char },
    Class { ranges: Vec<(char, char)>, value: char },
    Any { value: char },
    Group { inner: Box<RxDisjunctions> },
}

impl RegexGene {
    pub fn parse(pattern: &str) -> Result<Self, CoreError> {
        let mut parser = Parser {
            pattern,
            chars: pattern.chars().collect(),
            pos: 0,
        };
        let root = parser.disjunctions()?;
        if parser.pos < parser.chars.len() {
            return Err(parser.error("unbalanced ')'"));
        }
        Ok(RegexGene {
            source: pattern.to_string(),
            root,
        })
    }

    pub fn value(&self) -> String {
        let mut out = String::new();
        self.root.write(&mut out);
        out
    }

    pub(crate) fn is_mutable(&self) -> bool {
        self.root.is_mutable()
    }

    pub(crate) fn randomize(&mut self, rng: &mut Randomness) {
        self.root.randomize(rng);
    }

    pub(crate) fn standard_mutation(&mut self, rng: &mut Randomness) {
        self.root.mutate(rng);
    }
}

impl RxDisjunctions {
    fn write(&self, out: &mut String) {
        if let Some(seq) = self.alternatives.get(self.active) {
            seq.write(out);
        }
    }

    fn is_mutable(&self) -> bool {
        self.alternatives.len() > 1
            || self
                .alternatives
                .get(self.active)
                .is_some_and(RxSequence::is_mutable)
    }

    fn randomize(&mut self, rng: &mut Randomness) {
        self.active = rng.next_index(self.alternatives.len());
        if let Some(seq) = self.alternatives.get_mut(self.active) {
            seq.randomize(rng);
        }
    }

    fn mutate(&mut self, rng: &mut Randomness) {
        let n = self.alternatives.len();
        let current_mutable = self
            .alternatives
            .get(self.active)
            .is_some_and(RxSequence::is_mutable);
        if n > 1 && (!current_mutable || rng.next_bool(SWITCH_ALTERNATIVE_PROBABILITY)) {
            let shift = rng.next_int(1, n as i64 - 1) as usize;
            self.active = (self.active + shift) % n;
            self.alternatives[self.active].randomize(rng);
        } else if let Some(seq) = self.alternatives.get_mut(self.active) {
            seq.mutate(rng);
        }
    }
}

impl RxSequence {
    fn write(&self, out: &mut String) {
        for term in &self.terms {
            term.write(out);
        }
    }

    fn is_mutable(&self) -> bool {
        self.terms.iter().any(RxQuantifier::is_mutable)
    }

    fn randomize(&mut self, rng: &mut Randomness) {
        for term in &mut self.terms {
            term.randomize(rng);
        }
    }

    fn mutate(&mut self, rng: &mut Randomness) {
        let mutable: Vec<usize> = (0..self.terms.len())
            .filter(|i| self.terms[*i].is_mutable())
            .collect();
        if let Some(&i) = rng.choose(&mutable) {
            self.terms[i].mutate(rng);
        }
    }
}

impl RxQuantifier {
    pub fn new(template: RxAtom, min: u32, max: u32) -> Result<Self, CoreError> {
        if max < 1 || min > max {
            return Err(CoreError::InvalidQuantifier { min, max });
        }
        let limited_max = if max - min > QUANTIFIER_LIMIT {
            min + QUANTIFIER_LIMIT
        } else {
            max
        };
        Ok(RxQuantifier {
            atoms: vec![template.clone(); min as usize],
            template,
            min,
            limited_max,
        })
    }

    fn write(&self, out: &mut String) {
        for atom in &self.atoms {
            atom.write(out);
        }
    }

    fn is_mutable(&self) -> bool {
        self.limited_max > self.min || self.atoms.iter().any(RxAtom::is_mutable)
    }

    fn fresh_atom(&self, rng: &mut Randomness) -> RxAtom {
        let mut atom = self.template.clone();
        atom.randomize(rng);
        atom
    }

    fn randomize(&mut self, rng: &mut Randomness) {
        let n = rng.next_int(self.min as i64, self.limited_max as i64) as usize;
        self.atoms = (0..n).map(|_| self.fresh_atom(rng)).collect();
    }

    fn mutate(&mut self, rng: &mut Randomness) {
        let len = self.atoms.len();
        let can_remove = len > self.min as usize;
        let can_add = len < self.limited_max as usize;
        let mutable: Vec<usize> = (0..len).filter(|i| self.atoms[*i].is_mutable()).collect();

        if can_remove && (rng.next_bool(RESIZE_PROBABILITY) || (mutable.is_empty() && !can_add)) {
            let i = rng.next_index(len);
            self.atoms.remove(i);
        } else if can_add && (rng.next_bool(RESIZE_PROBABILITY) || mutable.is_empty()) {
            let atom = self.fresh_atom(rng);
            self.atoms.push(atom);
        } else if let Some(&i) = rng.choose(&mutable) {
            self.atoms[i].mutate(rng);
        }
    }
}

impl RxAtom {
    fn write(&self, out: &mut String) {
        match self {
            RxAtom::Literal { value } | RxAtom::Class { value, .. } | RxAtom::Any { value } => {
                out.push(*value)
            }
            RxAtom::Group { inner } => inner.write(out),
        }
    }

    fn is_mutable(&self) -> bool {
        match self {
            RxAtom::Literal { .. } => false,
            RxAtom::Class { ranges, .. } => {
                ranges.len() > 1 || ranges.iter().any(|(lo, hi)| lo != hi)
            }
            RxAtom::Any { .. } => true,
            RxAtom::Group { inner } => inner.is_mutable(),
        }
    }

    fn randomize(&mut self, rng: &mut Randomness) {
        match self {
            RxAtom::Literal { .. } => {}
            RxAtom::Class { ranges, value } => {
                if let Some((lo, hi)) = rng.choose(ranges) {
                    let code = rng.next_int(*lo as i64, *hi as i64) as u32;
                    *value = char::from_u32(code).unwrap_or(*lo);
                }
            }
            RxAtom::Any { value } => {
                *value = char::from_u32(rng.next_int(0x20, 0x7E) as u32).unwrap_or('a');
            }
            RxAtom::Group { inner } => inner.randomize(rng),
        }
    }

    fn mutate(&mut self, rng: &mut Randomness) {
        match self {
            RxAtom::Group { inner } => inner.mutate(rng),
            RxAtom::Literal { .. } => {}
            RxAtom::Class { value, .. } | RxAtom::Any { value } => {
                let before = *value;
                for _ in 0..10 {
                    self.randomize(rng);
                    if self.current() != Some(before) {
                        break;
                    }
                }
            }
        }
    }

    fn current(&self) -> Option<char> {
        match self {
            RxAtom::Literal { value } | RxAtom::Class { value, .. } | RxAtom::Any { value } => {
                Some(*value)
            }
            RxAtom::Group { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

const DIGITS: &[(char, char)] = &[('0', '9')];
const WORD: &[(char, char)] = &[('a', 'z'), ('A', 'Z'), ('0', '9'), ('_', '_')];
const SPACE: &[(char, char)] = &[(' ', ' '), ('\t', '\t')];

struct Parser<'a> {
    pattern: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, reason: &str) -> CoreError {
        CoreError::InvalidRegex {
            pattern: self.pattern.to_string(),
            reason: format!("{} at position {}", reason, self.pos),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn disjunctions(&mut self) -> Result<RxDisjunctions, CoreError> {
        let mut alternatives = vec![self.sequence()?];
        while self.peek() == Some('|') {
            self.pos += 1;
            alternatives.push(self.sequence()?);
        }
        Ok(RxDisjunctions {
            alternatives,
            active: 0,
        })
    }

    fn sequence(&mut self) -> Result<RxSequence, CoreError> {
        let mut terms = Vec::new();
        while let Some(c) = self.peek() {
            match c {
                '|' | ')' => break,
                '^' | '$' => self.pos += 1,
                _ => {
                    let atom = self.atom()?;
                    let (min, max) = self.quantifier()?;
                    terms.push(RxQuantifier::new(atom, min, max)?);
                }
            }
        }
        Ok(RxSequence { terms })
    }

    fn atom(&mut self) -> Result<RxAtom, CoreError> {
        let c = self.bump().ok_or_else(|| self.error("unexpected end"))?;
        match c {
            '(' => {
                if self.peek() == Some('?') {
                    self.pos += 1;
                    if self.bump() != Some(':') {
                        return Err(self.error("only (?:...) groups are supported"));
                    }
                }
                let inner = self.disjunctions()?;
                if self.bump() != Some(')') {
                    return Err(self.error("missing ')'"));
                }
                Ok(RxAtom::Group {
                    inner: Box::new(inner),
                })
            }
            '[' => self.class(),
            '.' => Ok(RxAtom::Any { value: 'a' }),
            '\\' => match self.escape()? {
                Escaped::Char(value) => Ok(RxAtom::Literal { value }),
                Escaped::Ranges(ranges) => Ok(class_atom(ranges.to_vec())),
            },
            '*' | '+' | '?' | '{' => Err(self.error("nothing to repeat")),
            value => Ok(RxAtom::Literal { value }),
        }
    }

    fn escape(&mut self) -> Result<Escaped, CoreError> {
        let c = self.bump().ok_or_else(|| self.error("dangling escape"))?;
        match c {
            'd' => Ok(Escaped::Ranges(DIGITS)),
            'w' => Ok(Escaped::Ranges(WORD)),
            's' => Ok(Escaped::Ranges(SPACE)),
            't' => Ok(Escaped::Char('\t')),
            'n' => Ok(Escaped::Char('\n')),
            c if c.is_ascii_alphanumeric() => {
                Err(self.error(&format!("unsupported escape '\\{}'", c)))
            }
            c => Ok(Escaped::Char(c)),
        }
    }

    fn class(&mut self) -> Result<RxAtom, CoreError> {
        if self.peek() == Some('^') {
            return Err(self.error("negated classes are not supported"));
        }
        let mut ranges = Vec::new();
        loop {
            let c = self.bump().ok_or_else(|| self.error("unterminated class"))?;
            let start = match c {
                ']' if !ranges.is_empty() => break,
                '\\' => match self.escape()? {
                    Escaped::Char(c) => c,
                    Escaped::Ranges(rs) => {
                        ranges.extend_from_slice(rs);
                        continue;
                    }
                },
                c => c,
            };
            let is_range = self.peek() == Some('-')
                && self.chars.get(self.pos + 1).is_some_and(|n| *n != ']');
            if is_range {
                self.pos += 1;
                let end = match self.bump() {
                    Some('\\') => match self.escape()? {
                        Escaped::Char(c) => c,
                        Escaped::Ranges(_) => return Err(self.error("class shorthand in range")),
                    },
                    Some(c) => c,
                    None => return Err(self.error("unterminated class")),
                };
                if start > end {
                    return Err(self.error("inverted range"));
                }
                ranges.push((start, end));
            } else {
                ranges.push((start, start));
            }
        }
        Ok(class_atom(ranges))
    }

    fn quantifier(&mut self) -> Result<(u32, u32), CoreError> {
        let bounds = match self.peek() {
            Some('*') => (0, u32::MAX),
            Some('+') => (1, u32::MAX),
            Some('?') => (0, 1),
            Some('{') => {
                self.pos += 1;
                let min = self.number()?;
                let max = if self.peek() == Some(',') {
                    self.pos += 1;
                    if self.peek() == Some('}') {
                        u32::MAX
                    } else {
                        self.number()?
                    }
                } else {
                    min
                };
                if self.peek() != Some('}') {
                    return Err(self.error("missing '}'"));
                }
                (min, max)
            }
            _ => return Ok((1, 1)),
        };
        self.pos += 1;
        // lazy and possessive markers change matching, not generation
        if matches!(self.peek(), Some('?') | Some('+')) {
            self.pos += 1;
        }
        Ok(bounds)
    }

    fn number(&mut self) -> Result<u32, CoreError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let digits: String = self.chars[start..self.pos].iter().collect();
        digits
            .parse()
            .map_err(|_| self.error("expected a repetition count"))
    }
}

enum Escaped {
    Char(char),
    Ranges(&'static [(char, char)]),
}

fn class_atom(ranges: Vec<(char, char)>) -> RxAtom {
    let value = ranges.first().map(|(lo, _)| *lo).unwrap_or('a');
    RxAtom::Class { ranges, value }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_shape(v: &str) {
        let chars: Vec<char> = v.chars().collect();
        assert!(chars.len() >= 5, "too short: {}", v);
        assert!(chars[..3].iter().all(|c| c.is_ascii_digit()), "{}", v);
        assert_eq!(chars[3], '-');
        let tail = &chars[4..];
        assert!((1..=3).contains(&tail.len()), "{}", v);
        assert!(tail.iter().all(|c| c.is_ascii_lowercase()), "{}", v);
    }

    #[test]
    fn randomized_values_match_pattern() {
        let mut rng = Randomness::seeded(7);
        let mut g = RegexGene::parse(r"^\d{3}-[a-z]+$").unwrap();
        for _ in 0..100 {
            g.randomize(&mut rng);
            check_shape(&g.value());
        }
    }

    #[test]
    fn mutated_values_match_pattern() {
        let mut rng = Randomness::seeded(8);
        let mut g = RegexGene::parse(r"\d{3}-[a-z]+").unwrap();
        g.randomize(&mut rng);
        for _ in 0..300 {
            g.standard_mutation(&mut rng);
            check_shape(&g.value());
        }
    }

    #[test]
    fn alternatives_render_one_branch() {
        let mut rng = Randomness::seeded(9);
        let mut g = RegexGene::parse("(?:foo|bar)baz").unwrap();
        for _ in 0..50 {
            g.randomize(&mut rng);
            let v = g.value();
            assert!(v == "foobaz" || v == "barbaz", "{}", v);
        }
    }

    #[test]
    fn star_is_clamped() {
        let mut rng = Randomness::seeded(10);
        let mut g = RegexGene::parse("a*").unwrap();
        for _ in 0..100 {
            g.randomize(&mut rng);
            assert!(g.value().len() <= QUANTIFIER_LIMIT as usize);
        }
    }

    #[test]
    fn literal_only_pattern_is_not_mutable() {
        let g = RegexGene::parse("abc").unwrap();
        assert!(!g.is_mutable());
        assert_eq!(g.value(), "abc");
    }

    #[test]
    fn quantifier_validation() {
        let atom = RxAtom::Literal { value: 'x' };
        assert!(RxQuantifier::new(atom.clone(), 2, 1).is_err());
        assert!(RxQuantifier::new(atom.clone(), 0, 0).is_err());
        let q = RxQuantifier::new(atom, 1, 10).unwrap();
        assert_eq!(q.limited_max, 3);
    }

    #[test]
    fn unsupported_syntax_is_rejected() {
        assert!(RegexGene::parse("[^a]").is_err());
        assert!(RegexGene::parse("(ab").is_err());
        assert!(RegexGene::parse("ab)").is_err());
        assert!(RegexGene::parse("*a").is_err());
        assert!(RegexGene::parse(r"\1").is_err());
        assert!(RegexGene::parse("a{0}").is_err());
    }
}
