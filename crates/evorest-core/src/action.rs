//! Actions: the atomic operations an individual executes.
//!
//! REST calls and GraphQL calls are main actions. SQL insertions live in
//! [`crate::sql`] and only ever appear in an individual's initialization
//! sequence.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::gene::{Gene, GeneContext, PrintMode};
use crate::path::RestPath;
use crate::randomness::Randomness;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpVerb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Head,
    Trace,
}

impl HttpVerb {
    pub const ALL: [HttpVerb; 8] = [
        HttpVerb::Get,
        HttpVerb::Post,
        HttpVerb::Put,
        HttpVerb::Patch,
        HttpVerb::Delete,
        HttpVerb::Options,
        HttpVerb::Head,
        HttpVerb::Trace,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HttpVerb::Get => "GET",
            HttpVerb::Post => "POST",
            HttpVerb::Put => "PUT",
            HttpVerb::Patch => "PATCH",
            HttpVerb::Delete => "DELETE",
            HttpVerb::Options => "OPTIONS",
            HttpVerb::Head => "HEAD",
            HttpVerb::Trace => "TRACE",
        }
    }
}

impl fmt::Display for HttpVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpVerb {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HttpVerb::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown HTTP verb '{}'", s))
    }
}

/// Where a parameter goes in the HTTP request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "in", rename_all = "snake_case")]
pub enum ParamKind {
    Path,
    Query,
    Header,
    Body { content_type: String },
    Form,
}

impl ParamKind {
    /// Kinds that bind to each other by name.
    fn binds_with(&self, other: &ParamKind) -> bool {
        matches!(
            (self, other),
            (ParamKind::Path, ParamKind::Path)
                | (ParamKind::Query, ParamKind::Query)
                | (ParamKind::Body { .. }, ParamKind::Body { .. })
                | (ParamKind::Form, ParamKind::Form)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub kind: ParamKind,
    pub gene: Gene,
}

impl Param {
    pub fn new(kind: ParamKind, gene: Gene) -> Self {
        Param { kind, gene }
    }

    pub fn name(&self) -> &str {
        &self.gene.name
    }

    pub fn is_body(&self) -> bool {
        matches!(self.kind, ParamKind::Body { .. })
    }
}

/// Where to find the value a target parameter is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingMatch {
    /// The whole source parameter.
    Param(String),
    /// A field of the source's body object.
    BodyField { param: String, field: String },
}

/// Credentials attached to every call made on behalf of one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthInfo {
    pub name: String,
    pub headers: Vec<(String, String)>,
}

/// One HTTP call against the SUT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestCallAction {
    pub verb: HttpVerb,
    pub path: RestPath,
    pub params: Vec<Param>,
    #[serde(default)]
    pub auth: Option<AuthInfo>,
    #[serde(default)]
    pub produces: Vec<String>,
    /// Store the response `Location` for later calls.
    #[serde(default)]
    pub save_location: bool,
    /// Resolve the URL from the location saved under this id.
    #[serde(default)]
    pub location_id: Option<String>,
}

impl RestCallAction {
    pub fn new(verb: HttpVerb, path: RestPath) -> Self {
        RestCallAction {
            verb,
            path,
            params: Vec::new(),
            auth: None,
            produces: Vec::new(),
            save_location: false,
            location_id: None,
        }
    }

    pub fn with_param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    /// `VERB:/path`, unique within a catalog.
    pub fn name(&self) -> String {
        format!("{}:{}", self.verb, self.path)
    }

    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name() == name)
    }

    pub fn param_mut(&mut self, name: &str) -> Option<&mut Param> {
        self.params.iter_mut().find(|p| p.name() == name)
    }

    pub fn body(&self) -> Option<&Param> {
        self.params.iter().find(|p| p.is_body())
    }

    pub fn genes(&self) -> impl Iterator<Item = &Gene> {
        self.params.iter().map(|p| &p.gene)
    }

    /// The path with every variable replaced by its parameter's raw value.
    pub fn resolved_path(&self) -> String {
        self.path.resolve_with(|name| {
            self.params
                .iter()
                .find(|p| p.kind == ParamKind::Path && p.name() == name)
                .map(|p| percent_encode(&p.gene.raw_value()))
        })
    }

    /// `?a=1&b=x` for every present query parameter, or an empty string.
    pub fn resolved_query(&self) -> String {
        let pairs: Vec<String> = self
            .params
            .iter()
            .filter(|p| p.kind == ParamKind::Query && p.gene.is_present())
            .map(|p| {
                format!(
                    "{}={}",
                    percent_encode(p.name()),
                    percent_encode(&p.gene.raw_value())
                )
            })
            .collect();
        if pairs.is_empty() {
            String::new()
        } else {
            format!("?{}", pairs.join("&"))
        }
    }

    /// Header parameters that are present, as `(name, value)`.
    pub fn header_values(&self) -> Vec<(String, String)> {
        self.params
            .iter()
            .filter(|p| p.kind == ParamKind::Header && p.gene.is_present())
            .map(|p| (p.name().to_string(), p.gene.raw_value()))
            .collect()
    }

    /// Request entity as `(content type, payload)`.
    pub fn entity(&self) -> Option<(String, String)> {
        if let Some(body) = self.body() {
            if !body.gene.is_present() {
                return None;
            }
            let ParamKind::Body { content_type } = &body.kind else {
                return None;
            };
            let mode = if content_type.contains("json") {
                PrintMode::Json
            } else if content_type.contains("xml") {
                PrintMode::Xml
            } else {
                PrintMode::Raw
            };
            return Some((content_type.clone(), body.gene.printable(mode)));
        }
        let form: Vec<String> = self
            .params
            .iter()
            .filter(|p| p.kind == ParamKind::Form && p.gene.is_present())
            .map(|p| {
                format!(
                    "{}={}",
                    percent_encode(p.name()),
                    percent_encode(&p.gene.raw_value())
                )
            })
            .collect();
        if form.is_empty() {
            None
        } else {
            Some((
                "application/x-www-form-urlencoded".to_string(),
                form.join("&"),
            ))
        }
    }

    pub fn randomize(&mut self, rng: &mut Randomness, ctx: &GeneContext) -> Result<(), CoreError> {
        for p in self.params.iter_mut().filter(|p| p.gene.is_mutable()) {
            p.gene.randomize(rng, false, ctx)?;
        }
        Ok(())
    }

    /// Finds the parameter of `self` that `target` should take its value from.
    ///
    /// Same-kind parameters match by name and leaf type. A path parameter
    /// also matches a same-named field of this call's body object.
    pub fn binding_source_for(&self, target: &Param) -> Option<BindingMatch> {
        let target_leaf = target.gene.leaf().type_name();
        if let Some(p) = self.params.iter().find(|p| {
            p.kind.binds_with(&target.kind)
                && p.name() == target.name()
                && p.gene.leaf().type_name() == target_leaf
        }) {
            return Some(BindingMatch::Param(p.name().to_string()));
        }
        if target.kind == ParamKind::Path {
            let body = self.body()?;
            let field = body.gene.field(target.name())?;
            if field.leaf().type_name() == target_leaf {
                return Some(BindingMatch::BodyField {
                    param: body.name().to_string(),
                    field: field.name.clone(),
                });
            }
        }
        None
    }
}

/// One GraphQL operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphqlAction {
    pub operation: String,
    pub operation_type: GraphqlOperationType,
    pub params: Vec<Gene>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphqlOperationType {
    Query,
    Mutation,
}

impl GraphqlAction {
    pub fn name(&self) -> String {
        let kind = match self.operation_type {
            GraphqlOperationType::Query => "query",
            GraphqlOperationType::Mutation => "mutation",
        };
        format!("{}:{}", kind, self.operation)
    }

    /// Query document sent over HTTP, e.g. `query { items(limit: 3) }`.
    pub fn document(&self) -> String {
        let kind = match self.operation_type {
            GraphqlOperationType::Query => "query",
            GraphqlOperationType::Mutation => "mutation",
        };
        let args: Vec<String> = self
            .params
            .iter()
            .filter(|g| g.is_present())
            .map(|g| format!("{}: {}", g.name, g.printable(PrintMode::Json)))
            .collect();
        if args.is_empty() {
            format!("{} {{ {} }}", kind, self.operation)
        } else {
            format!("{} {{ {}({}) }}", kind, self.operation, args.join(", "))
        }
    }
}

/// A main action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Rest(RestCallAction),
    Graphql(GraphqlAction),
}

impl Action {
    pub fn name(&self) -> String {
        match self {
            Action::Rest(a) => a.name(),
            Action::Graphql(a) => a.name(),
        }
    }

    pub fn as_rest(&self) -> Option<&RestCallAction> {
        match self {
            Action::Rest(a) => Some(a),
            Action::Graphql(_) => None,
        }
    }

    pub fn as_rest_mut(&mut self) -> Option<&mut RestCallAction> {
        match self {
            Action::Rest(a) => Some(a),
            Action::Graphql(_) => None,
        }
    }

    /// Top-level genes in declaration order.
    pub fn genes(&self) -> Vec<&Gene> {
        match self {
            Action::Rest(a) => a.genes().collect(),
            Action::Graphql(a) => a.params.iter().collect(),
        }
    }

    pub fn genes_mut(&mut self) -> Vec<&mut Gene> {
        match self {
            Action::Rest(a) => a.params.iter_mut().map(|p| &mut p.gene).collect(),
            Action::Graphql(a) => a.params.iter_mut().collect(),
        }
    }

    pub fn randomize(&mut self, rng: &mut Randomness, ctx: &GeneContext) -> Result<(), CoreError> {
        for g in self.genes_mut().into_iter().filter(|g| g.is_mutable()) {
            g.randomize(rng, false, ctx)?;
        }
        Ok(())
    }
}

/// Prototype actions, one per API operation, keyed by action name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionCatalog {
    actions: IndexMap<String, Action>,
}

impl ActionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, action: Action) {
        self.actions.insert(action.name(), action);
    }

    pub fn get(&self, name: &str) -> Option<&Action> {
        self.actions.get(name)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.actions.values()
    }

    pub fn rest_actions(&self) -> impl Iterator<Item = &RestCallAction> {
        self.actions.values().filter_map(Action::as_rest)
    }

    /// The REST prototype for `verb` on a path equivalent to `path`.
    pub fn find_rest(&self, verb: HttpVerb, path: &RestPath) -> Option<&RestCallAction> {
        self.rest_actions()
            .find(|a| a.verb == verb && a.path.is_equivalent(path))
    }
}

impl FromIterator<Action> for ActionCatalog {
    fn from_iter<T: IntoIterator<Item = Action>>(iter: T) -> Self {
        let mut catalog = ActionCatalog::new();
        for a in iter {
            catalog.insert(a);
        }
        catalog
    }
}

/// Percent-encodes everything but RFC 3986 unreserved characters.
pub fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_item() -> RestCallAction {
        let mut id = Gene::int32("id");
        id.assign_raw("5");
        let mut q = Gene::string("q");
        q.assign_raw("a b");
        RestCallAction::new(HttpVerb::Get, RestPath::parse("/items/{id}"))
            .with_param(Param::new(ParamKind::Path, id))
            .with_param(Param::new(ParamKind::Query, Gene::optional(q)))
    }

    #[test]
    fn graphql_document_lists_arguments() {
        let mut limit = Gene::int32("limit");
        limit.assign_raw("3");
        let mut a = GraphqlAction {
            operation: "items".into(),
            operation_type: GraphqlOperationType::Query,
            params: vec![limit],
        };
        assert_eq!(a.document(), "query { items(limit: 3) }");
        a.params.clear();
        a.operation_type = GraphqlOperationType::Mutation;
        assert_eq!(a.document(), "mutation { items }");
    }

    #[test]
    fn resolves_path_and_query() {
        let a = get_item();
        assert_eq!(a.name(), "GET:/items/{id}");
        assert_eq!(a.resolved_path(), "/items/5");
        assert_eq!(a.resolved_query(), "?q=a%20b");
    }

    #[test]
    fn json_entity_from_body() {
        let mut name = Gene::string("name");
        name.assign_raw("x");
        let a = RestCallAction::new(HttpVerb::Post, RestPath::parse("/items")).with_param(
            Param::new(
                ParamKind::Body {
                    content_type: "application/json".into(),
                },
                Gene::object("body", vec![name]),
            ),
        );
        assert_eq!(
            a.entity(),
            Some(("application/json".to_string(), r#"{"name":"x"}"#.to_string()))
        );
    }

    #[test]
    fn form_entity_when_no_body() {
        let mut f = Gene::string("user");
        f.assign_raw("bob");
        let a = RestCallAction::new(HttpVerb::Post, RestPath::parse("/login"))
            .with_param(Param::new(ParamKind::Form, f));
        let (ct, payload) = a.entity().unwrap();
        assert_eq!(ct, "application/x-www-form-urlencoded");
        assert_eq!(payload, "user=bob");
    }

    #[test]
    fn path_param_binds_to_body_field() {
        let post = RestCallAction::new(HttpVerb::Post, RestPath::parse("/items")).with_param(
            Param::new(
                ParamKind::Body {
                    content_type: "application/json".into(),
                },
                Gene::object("body", vec![Gene::int32("id"), Gene::string("name")]),
            ),
        );
        let get = get_item();
        let target = get.param("id").unwrap();
        assert_eq!(
            post.binding_source_for(target),
            Some(BindingMatch::BodyField {
                param: "body".into(),
                field: "id".into()
            })
        );
        let q = get.param("q").unwrap();
        assert_eq!(post.binding_source_for(q), None);
    }

    #[test]
    fn verb_parsing_is_case_insensitive() {
        assert_eq!("patch".parse::<HttpVerb>(), Ok(HttpVerb::Patch));
        assert!("FETCH".parse::<HttpVerb>().is_err());
    }

    #[test]
    fn catalog_finds_equivalent_paths() {
        let catalog: ActionCatalog = vec![Action::Rest(get_item())].into_iter().collect();
        assert!(catalog
            .find_rest(HttpVerb::Get, &RestPath::parse("/items/{itemId}"))
            .is_some());
        assert!(catalog
            .find_rest(HttpVerb::Delete, &RestPath::parse("/items/{id}"))
            .is_none());
    }
}
