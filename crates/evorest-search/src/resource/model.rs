//! REST resources: the actions of one path, how to create them, and the
//! call templates they can be sampled with.

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use serde::Serialize;

use evorest_core::{
    Action, ActionCatalog, GeneContext, HttpVerb, Randomness, ResourceCall, ResourceStatus,
    RestCallAction, RestPath,
};

use crate::error::SearchError;

/// Probability of repeating a trailing PATCH.
pub const PROB_EXTRA_PATCH: f64 = 0.8;

/// POST calls that must run, in order, before the resource exists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreationChain {
    pub posts: Vec<RestCallAction>,
    /// Every variable of the path can be produced by the chain.
    pub complete: bool,
}

impl CreationChain {
    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }
}

/// A verb sequence, e.g. `POST-GET`, with creation POSTs folded into the
/// leading `POST`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallsTemplate {
    pub template: String,
    pub independent: bool,
    /// Number of actions the template expands to.
    pub size: usize,
}

impl CallsTemplate {
    pub fn verbs(&self) -> Vec<HttpVerb> {
        self.template
            .split('-')
            .filter_map(|v| v.parse().ok())
            .collect()
    }

    pub fn is_multi_verb(&self) -> bool {
        self.template.contains('-')
    }
}

/// Tables touched by one verb of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableUsage {
    pub verb: HttpVerb,
    pub tables: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct RestResource {
    pub path: RestPath,
    actions: Vec<RestCallAction>,
    ancestors: Vec<RestPath>,
    creation: CreationChain,
    templates: IndexMap<String, CallsTemplate>,
    /// Observed through the SQL the SUT executed.
    table_usage: Vec<TableUsage>,
    /// Inferred from names, table name to similarity.
    pub related_tables: BTreeMap<String, f64>,
}

impl RestResource {
    fn new(path: RestPath, actions: Vec<RestCallAction>) -> Self {
        RestResource {
            path,
            actions,
            ancestors: Vec::new(),
            creation: CreationChain::default(),
            templates: IndexMap::new(),
            table_usage: Vec::new(),
            related_tables: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> String {
        self.path.to_string()
    }

    pub fn actions(&self) -> &[RestCallAction] {
        &self.actions
    }

    pub fn action(&self, verb: HttpVerb) -> Option<&RestCallAction> {
        self.actions.iter().find(|a| a.verb == verb)
    }

    pub fn verbs(&self) -> BTreeSet<HttpVerb> {
        self.actions.iter().map(|a| a.verb).collect()
    }

    pub fn ancestors(&self) -> &[RestPath] {
        &self.ancestors
    }

    pub fn creation(&self) -> &CreationChain {
        &self.creation
    }

    pub fn needs_creation(&self) -> bool {
        self.path.has_variable_path_parameters()
    }

    pub fn templates(&self) -> impl Iterator<Item = &CallsTemplate> {
        self.templates.values()
    }

    pub fn template(&self, key: &str) -> Option<&CallsTemplate> {
        self.templates.get(key)
    }

    pub fn independent_templates(&self) -> Vec<&CallsTemplate> {
        self.templates.values().filter(|t| t.independent).collect()
    }

    pub fn dependent_templates(&self) -> Vec<&CallsTemplate> {
        self.templates.values().filter(|t| !t.independent).collect()
    }

    pub fn has_independent_template(&self) -> bool {
        self.templates.values().any(|t| t.independent)
    }

    pub fn has_dependent_template(&self) -> bool {
        self.templates.values().any(|t| !t.independent)
    }

    /// Resources with more levels sort first in ad-hoc sampling.
    pub fn levels(&self) -> usize {
        self.path.levels()
    }

    pub fn table_usage(&self) -> &[TableUsage] {
        &self.table_usage
    }

    /// Every table this resource was seen touching, or named after.
    pub fn tables(&self) -> BTreeSet<String> {
        let mut out: BTreeSet<String> = self
            .table_usage
            .iter()
            .flat_map(|u| u.tables.iter().cloned())
            .collect();
        out.extend(self.related_tables.keys().cloned());
        out
    }

    /// Merges `tables` into the usage of `verb`. Returns whether anything changed.
    pub fn record_tables(&mut self, verb: HttpVerb, tables: BTreeSet<String>) -> bool {
        if tables.is_empty() {
            return false;
        }
        for usage in self.table_usage.iter_mut().filter(|u| u.verb == verb) {
            if usage.tables.is_superset(&tables) {
                return false;
            }
            if usage.tables.is_subset(&tables) {
                usage.tables = tables;
                return true;
            }
        }
        self.table_usage.push(TableUsage { verb, tables });
        true
    }

    fn init_templates(&mut self) {
        let needs_creation = self.needs_creation();
        let creation_len = self.creation.len();
        for verb in self.verbs() {
            let template = if verb == HttpVerb::Post {
                CallsTemplate {
                    template: "POST".to_string(),
                    independent: self.creation.complete && creation_len <= 1,
                    size: creation_len.max(1),
                }
            } else if needs_creation && !self.creation.is_empty() {
                CallsTemplate {
                    template: format!("POST-{}", verb),
                    independent: false,
                    size: creation_len + 1,
                }
            } else {
                CallsTemplate {
                    template: verb.to_string(),
                    independent: !needs_creation,
                    size: 1,
                }
            };
            self.templates.insert(template.template.clone(), template);
        }
    }

    pub fn random_template<'a>(&'a self, rng: &mut Randomness) -> Option<&'a CallsTemplate> {
        let all: Vec<&CallsTemplate> = self.templates.values().collect();
        rng.choose(&all).copied()
    }

    /// A single random action of this path.
    pub fn sample_one_action(
        &self,
        rng: &mut Randomness,
        ctx: &GeneContext,
    ) -> Result<Option<ResourceCall>, SearchError> {
        let Some(verb) = rng.choose(&self.actions).map(|a| a.verb) else {
            return Ok(None);
        };
        self.single_call(verb, rng, ctx)
    }

    /// A block holding only the `verb` action, without its creation chain.
    pub fn single_call(
        &self,
        verb: HttpVerb,
        rng: &mut Randomness,
        ctx: &GeneContext,
    ) -> Result<Option<ResourceCall>, SearchError> {
        let Some(proto) = self.action(verb) else {
            return Ok(None);
        };
        let mut action = proto.clone();
        action.randomize(rng, ctx)?;
        let status = if verb == HttpVerb::Post {
            if self.creation.len() > 1 || !self.creation.complete {
                ResourceStatus::NotFoundDependent
            } else {
                ResourceStatus::Created
            }
        } else {
            ResourceStatus::NotExisting
        };
        let mut call = ResourceCall::single(Action::Rest(action));
        call.resource = self.path.clone();
        call.template = verb.to_string();
        call.independent = !self.needs_creation();
        call.status = status;
        Ok(Some(call))
    }

    /// Expands `template` into a block of randomized calls.
    ///
    /// A leading `POST` becomes the creation chain, wired so each call finds
    /// the location its predecessor saved. A chain that does not fit in
    /// `max_size`, or cannot be completed, is left out and the status says why.
    pub fn gen_calls(
        &self,
        template: &str,
        rng: &mut Randomness,
        max_size: usize,
        ctx: &GeneContext,
    ) -> Result<Option<ResourceCall>, SearchError> {
        let Some(t) = self.templates.get(template) else {
            return Ok(None);
        };
        let verbs = t.verbs();
        let creates = verbs.first() == Some(&HttpVerb::Post);

        let mut targets = Vec::new();
        for verb in verbs.iter().skip(usize::from(creates)) {
            if let Some(proto) = self.action(*verb) {
                targets.push(proto.clone());
            }
        }
        if targets.last().is_some_and(|a| a.verb == HttpVerb::Patch) && rng.next_bool(PROB_EXTRA_PATCH) {
            if let Some(patch) = self.action(HttpVerb::Patch) {
                targets.push(patch.clone());
            }
        }

        let mut status = if creates {
            ResourceStatus::Created
        } else if self.needs_creation() && self.creation.is_empty() {
            ResourceStatus::NotFound
        } else {
            ResourceStatus::NotExisting
        };

        let mut actions = Vec::new();
        if creates {
            if !self.creation.complete || self.creation.is_empty() {
                status = ResourceStatus::NotFoundDependent;
                actions.extend(self.creation.posts.iter().cloned());
            } else if self.creation.len() + targets.len() > max_size {
                status = ResourceStatus::NotEnoughLength;
            } else {
                actions.extend(self.creation.posts.iter().cloned());
            }
        }
        actions.extend(targets);
        if actions.is_empty() {
            return Ok(None);
        }
        for a in actions.iter_mut() {
            a.randomize(rng, ctx)?;
        }
        if status == ResourceStatus::Created {
            link_creation(&mut actions, self.creation.len());
        }

        let mut call = ResourceCall {
            resource: self.path.clone(),
            template: t.template.clone(),
            independent: t.independent,
            status,
            actions: actions.into_iter().map(Action::Rest).collect(),
            bindings: Vec::new(),
        };
        call.bind_by_name();
        Ok(Some(call))
    }
}

/// Wires the location chain: the first `posts` actions create, the rest use.
fn link_creation(actions: &mut [RestCallAction], posts: usize) {
    for i in 1..actions.len() {
        let previous = i.min(posts) - 1;
        let (head, tail) = actions.split_at_mut(i);
        let post = &mut head[previous];
        let current = &mut tail[0];
        if post.path.is_equivalent(&current.path) {
            current.location_id = post.location_id.clone();
        } else {
            post.save_location = true;
            current.location_id = Some(post.path.last_element());
        }
    }
}

/// All resources of a catalog, keyed by path.
#[derive(Debug, Clone, Default)]
pub struct ResourceCluster {
    resources: IndexMap<String, RestResource>,
}

impl ResourceCluster {
    pub fn from_catalog(catalog: &ActionCatalog) -> Self {
        let mut by_path: IndexMap<String, (RestPath, Vec<RestCallAction>)> = IndexMap::new();
        for a in catalog.rest_actions() {
            by_path
                .entry(a.path.to_string())
                .or_insert_with(|| (a.path.clone(), Vec::new()))
                .1
                .push(a.clone());
        }
        let mut resources: IndexMap<String, RestResource> = by_path
            .into_iter()
            .map(|(k, (path, actions))| (k, RestResource::new(path, actions)))
            .collect();

        let paths: Vec<RestPath> = resources.values().map(|r| r.path.clone()).collect();
        let posts: Vec<RestCallAction> = resources
            .values()
            .filter_map(|r| r.action(HttpVerb::Post).cloned())
            .collect();
        for r in resources.values_mut() {
            r.ancestors = paths.iter().filter(|p| p.is_ancestor_of(&r.path)).cloned().collect();
            r.creation = creation_chain(r, &posts);
            r.init_templates();
        }
        ResourceCluster { resources }
    }

    pub fn get(&self, key: &str) -> Option<&RestResource> {
        self.resources.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut RestResource> {
        self.resources.get_mut(key)
    }

    /// The resource whose path is equivalent to `path`.
    pub fn find(&self, path: &RestPath) -> Option<&RestResource> {
        self.resources.values().find(|r| r.path.is_equivalent(path))
    }

    pub fn find_mut(&mut self, path: &RestPath) -> Option<&mut RestResource> {
        self.resources.values_mut().find(|r| r.path.is_equivalent(path))
    }

    pub fn iter(&self) -> impl Iterator<Item = &RestResource> {
        self.resources.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RestResource> {
        self.resources.values_mut()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.resources.keys()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// POST of the deepest strict ancestor of `path` that has one.
fn closest_ancestor_post<'a>(path: &RestPath, posts: &'a [RestCallAction]) -> Option<&'a RestCallAction> {
    posts
        .iter()
        .filter(|p| p.path.is_ancestor_of(path))
        .max_by_key(|p| p.path.levels())
}

fn needs_parent(post: &RestPath) -> bool {
    (post.has_variable_path_parameters() && !post.is_last_element_a_parameter())
        || post.variable_names().len() >= 2
}

fn creation_chain(resource: &RestResource, posts: &[RestCallAction]) -> CreationChain {
    let mut chain = CreationChain::default();
    let own = resource.action(HttpVerb::Post);
    let Some(mut post) = own.or_else(|| closest_ancestor_post(&resource.path, posts)) else {
        chain.complete = !resource.needs_creation();
        return chain;
    };
    loop {
        chain.posts.insert(0, post.clone());
        if !needs_parent(&post.path) {
            chain.complete = true;
            return chain;
        }
        match closest_ancestor_post(&post.path, posts) {
            Some(next) => post = next,
            None => {
                tracing::debug!(path = %resource.path, "incomplete creation chain");
                return chain;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evorest_core::{Gene, Param, ParamKind};

    fn catalog(entries: &[(HttpVerb, &str)]) -> ActionCatalog {
        entries
            .iter()
            .map(|(verb, path)| {
                let path = RestPath::parse(path);
                let mut a = RestCallAction::new(*verb, path.clone());
                for v in path.variable_names() {
                    a.params.push(Param::new(ParamKind::Path, Gene::int64(v)));
                }
                Action::Rest(a)
            })
            .collect()
    }

    #[test]
    fn test_creation_chain_from_ancestor() {
        let cluster = ResourceCluster::from_catalog(&catalog(&[
            (HttpVerb::Post, "/orders"),
            (HttpVerb::Get, "/orders/{id}"),
        ]));
        let r = cluster.get("/orders/{id}").unwrap();
        assert_eq!(r.creation().len(), 1);
        assert!(r.creation().complete);
        assert_eq!(r.ancestors().len(), 1);
        let t = r.template("POST-GET").unwrap();
        assert!(!t.independent);
        assert_eq!(t.size, 2);

        let orders = cluster.get("/orders").unwrap();
        assert!(orders.template("POST").unwrap().independent);
    }

    #[test]
    fn test_nested_creation_chain() {
        let cluster = ResourceCluster::from_catalog(&catalog(&[
            (HttpVerb::Post, "/orders"),
            (HttpVerb::Post, "/orders/{id}/items"),
            (HttpVerb::Get, "/orders/{id}/items/{itemId}"),
        ]));
        let r = cluster.get("/orders/{id}/items/{itemId}").unwrap();
        let chain: Vec<String> = r.creation().posts.iter().map(|p| p.path.to_string()).collect();
        assert_eq!(chain, vec!["/orders", "/orders/{id}/items"]);
        assert!(r.creation().complete);
    }

    #[test]
    fn test_incomplete_chain_without_post() {
        let cluster = ResourceCluster::from_catalog(&catalog(&[(HttpVerb::Get, "/users/{id}")]));
        let r = cluster.get("/users/{id}").unwrap();
        assert!(r.creation().is_empty());
        assert!(!r.creation().complete);
        let mut rng = Randomness::seeded(1);
        let call = r
            .gen_calls("GET", &mut rng, 10, &GeneContext::default())
            .unwrap()
            .unwrap();
        assert_eq!(call.status, ResourceStatus::NotFound);
        assert_eq!(call.actions.len(), 1);
    }

    #[test]
    fn test_gen_calls_links_locations() {
        let cluster = ResourceCluster::from_catalog(&catalog(&[
            (HttpVerb::Post, "/orders"),
            (HttpVerb::Get, "/orders/{id}"),
        ]));
        let r = cluster.get("/orders/{id}").unwrap();
        let mut rng = Randomness::seeded(7);
        let call = r
            .gen_calls("POST-GET", &mut rng, 10, &GeneContext::default())
            .unwrap()
            .unwrap();
        assert_eq!(call.status, ResourceStatus::Created);
        assert!(!call.independent);
        let post = call.actions[0].as_rest().unwrap();
        let get = call.actions[1].as_rest().unwrap();
        assert!(post.save_location);
        assert_eq!(get.location_id.as_deref(), Some("orders"));

        let short = r
            .gen_calls("POST-GET", &mut rng, 1, &GeneContext::default())
            .unwrap()
            .unwrap();
        assert_eq!(short.status, ResourceStatus::NotEnoughLength);
        assert_eq!(short.actions.len(), 1);
    }

    #[test]
    fn test_table_usage_is_merged() {
        let cluster = ResourceCluster::from_catalog(&catalog(&[(HttpVerb::Get, "/orders")]));
        let mut r = cluster.get("/orders").unwrap().clone();
        let set = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>();
        assert!(r.record_tables(HttpVerb::Get, set(&["ORDERS"])));
        assert!(r.record_tables(HttpVerb::Get, set(&["ORDERS", "USERS"])));
        assert_eq!(r.table_usage().len(), 1);
        assert!(!r.record_tables(HttpVerb::Get, set(&["USERS"])));
        assert!(r.record_tables(HttpVerb::Get, set(&["ITEMS"])));
        assert_eq!(r.table_usage().len(), 2);
        assert!(r.record_tables(HttpVerb::Post, set(&["ORDERS"])));
        assert_eq!(r.tables().len(), 3);
    }
}
