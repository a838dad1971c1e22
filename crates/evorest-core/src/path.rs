//! REST path templates such as `/orders/{id}/items`.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// One `/`-separated token of a path template.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathElement {
    Literal(String),
    /// `{name}`; only the name is kept.
    Variable(String),
}

impl PathElement {
    fn parse(token: &str) -> Self {
        match (token.find('{'), token.rfind('}')) {
            (Some(open), Some(close)) if open < close => {
                PathElement::Variable(token[open + 1..close].to_string())
            }
            _ => PathElement::Literal(token.to_string()),
        }
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, PathElement::Variable(_))
    }

    /// Literals match by text, variables match any other variable.
    fn is_equivalent(&self, other: &PathElement) -> bool {
        match (self, other) {
            (PathElement::Literal(a), PathElement::Literal(b)) => a == b,
            (PathElement::Variable(_), PathElement::Variable(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathElement::Literal(s) => write!(f, "{}", s),
            PathElement::Variable(s) => write!(f, "{{{}}}", s),
        }
    }
}

/// A parsed path template. Serializes as its string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct RestPath {
    elements: SmallVec<[PathElement; 4]>,
}

impl RestPath {
    pub fn parse(path: &str) -> Self {
        RestPath {
            elements: path
                .split('/')
                .filter(|t| !t.is_empty())
                .map(PathElement::parse)
                .collect(),
        }
    }

    pub fn elements(&self) -> &[PathElement] {
        &self.elements
    }

    pub fn levels(&self) -> usize {
        self.elements.len()
    }

    pub fn is_root(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn is_last_element_a_parameter(&self) -> bool {
        self.elements.last().is_some_and(PathElement::is_variable)
    }

    pub fn has_variable_path_parameters(&self) -> bool {
        self.elements.iter().any(PathElement::is_variable)
    }

    pub fn variable_names(&self) -> Vec<&str> {
        self.elements
            .iter()
            .filter_map(|e| match e {
                PathElement::Variable(name) => Some(name.as_str()),
                PathElement::Literal(_) => None,
            })
            .collect()
    }

    /// Last token as written, e.g. `{id}` or `items`. Empty for the root.
    pub fn last_element(&self) -> String {
        self.elements
            .last()
            .map(ToString::to_string)
            .unwrap_or_default()
    }

    /// Same shape: same length, equal literals, variables in the same places.
    pub fn is_equivalent(&self, other: &RestPath) -> bool {
        self.levels() == other.levels()
            && self
                .elements
                .iter()
                .zip(other.elements.iter())
                .all(|(a, b)| a.is_equivalent(b))
    }

    /// Strict prefix of `other`, up to variable naming.
    pub fn is_ancestor_of(&self, other: &RestPath) -> bool {
        self.levels() < other.levels()
            && self
                .elements
                .iter()
                .zip(other.elements.iter())
                .all(|(a, b)| a.is_equivalent(b))
    }

    pub fn is_direct_child_of(&self, other: &RestPath) -> bool {
        other.is_ancestor_of(self) && self.levels() == other.levels() + 1
    }

    pub fn parent(&self) -> Option<RestPath> {
        if self.is_root() {
            return None;
        }
        Some(RestPath {
            elements: self.elements[..self.elements.len() - 1].iter().cloned().collect(),
        })
    }

    /// Substitutes variables through `lookup`, leaving unresolved ones as written.
    pub fn resolve_with<F>(&self, mut lookup: F) -> String
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut out = String::new();
        for e in &self.elements {
            out.push('/');
            match e {
                PathElement::Literal(s) => out.push_str(s),
                PathElement::Variable(name) => match lookup(name) {
                    Some(v) => out.push_str(&v),
                    None => out.push_str(&e.to_string()),
                },
            }
        }
        if out.is_empty() {
            out.push('/');
        }
        out
    }
}

impl fmt::Display for RestPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.elements.is_empty() {
            return write!(f, "/");
        }
        for e in &self.elements {
            write!(f, "/{}", e)?;
        }
        Ok(())
    }
}

impl From<String> for RestPath {
    fn from(s: String) -> Self {
        RestPath::parse(&s)
    }
}

impl From<RestPath> for String {
    fn from(p: RestPath) -> Self {
        p.to_string()
    }
}
