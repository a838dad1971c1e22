//! Runs individuals against a REST (or GraphQL-over-HTTP) SUT and scores them.
//!
//! One evaluation resets the SUT, runs the DB initialization, then each main
//! action in order. A call that times out or loops on redirects ends the
//! sequence early; what ran so far is still scored. Coverage comes from the
//! driver, and every executed call adds a local "status reached" target.

use std::collections::{BTreeSet, HashMap};

use evorest_core::gene::GeneKind;
use evorest_core::{
    Action, Gene, GraphqlAction, HttpVerb, Individual, Param, ParamKind, RestCallAction, RestPath,
    TargetId,
};

use crate::config::SearchConfig;
use crate::driver::{AdditionalInfo, DatabaseCommand, SutController, TestResults};
use crate::error::{SearchError, TransportError};
use crate::evaluated::{ActionResult, EvaluatedIndividual, InitializationResult, RestCallResult};
use crate::fitness_value::FitnessValue;
use crate::http::{HttpRequest, HttpResponse, HttpTransport};
use crate::id_mapper::{status_description, IdMapper};

/// Degradations met while evaluating, for the end-of-run summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FitnessStats {
    pub timeouts: u64,
    pub redirect_loops: u64,
    pub failed_db_commands: u64,
    pub large_responses: u64,
}

/// Key under which the location created by a call is kept.
pub fn location_name(id: &str) -> String {
    format!("location_{}", id)
}

/// URL of a call whose resource lives at `location`.
///
/// `template` is the call's own resolved path. When it is deeper than the
/// location (e.g. `/x/{id}/y` after a location `/x/42`) the missing tail is
/// taken from the template. Relative locations are resolved against `base_url`.
pub fn resolve_location(base_url: &str, location: &str, template: &str) -> String {
    let location = location.split(['?', '#']).next().unwrap_or_default();
    let (prefix, path) = match location.find("://") {
        Some(scheme_end) => {
            let after = scheme_end + 3;
            match location[after..].find('/') {
                Some(slash) => location.split_at(after + slash),
                None => (location, ""),
            }
        }
        None => (base_url, location),
    };
    if path.is_empty() {
        return format!("{}{}", prefix, template);
    }
    let location_tokens: Vec<&str> = path.split('/').collect();
    let template_tokens: Vec<&str> = template.split('/').collect();
    let mut target = path.to_string();
    for token in template_tokens.iter().skip(location_tokens.len()) {
        target.push('/');
        target.push_str(token);
    }
    format!("{}{}", prefix, target)
}

pub struct RestFitness {
    driver: Box<dyn SutController>,
    transport: Box<dyn HttpTransport>,
    base_url: String,
    catalog_paths: Vec<RestPath>,
    id_mapper: IdMapper,
    heuristics_for_sql: bool,
    expand_individuals: bool,
    max_response_byte_size: usize,
    targets_per_request: usize,
    coverage_offset: usize,
    stats: FitnessStats,
}

impl RestFitness {
    pub fn new(
        config: &SearchConfig,
        driver: Box<dyn SutController>,
        transport: Box<dyn HttpTransport>,
        base_url: &str,
        catalog_paths: Vec<RestPath>,
    ) -> Self {
        RestFitness {
            driver,
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
            catalog_paths,
            id_mapper: IdMapper::new(),
            heuristics_for_sql: config.heuristics_for_sql,
            expand_individuals: config.expand_rest_individuals,
            max_response_byte_size: config.max_response_byte_size,
            targets_per_request: config.targets_per_coverage_request.max(1),
            coverage_offset: 0,
            stats: FitnessStats::default(),
        }
    }

    pub fn id_mapper(&self) -> &IdMapper {
        &self.id_mapper
    }

    pub fn stats(&self) -> FitnessStats {
        self.stats
    }

    pub fn driver_mut(&mut self) -> &mut dyn SutController {
        self.driver.as_mut()
    }

    /// Evaluates `individual`. `Ok(None)` when the driver could not report
    /// coverage; the individual should then be discarded.
    pub fn evaluate(
        &mut self,
        mut individual: Individual,
        not_covered: &[TargetId],
    ) -> Result<Option<EvaluatedIndividual>, SearchError> {
        self.driver.reset_sut()?;

        let mut fv = FitnessValue::new(individual.size() as f64);
        let initialization = self.do_initialization(&individual)?;
        individual.enforce_coherence()?;

        let mut results = Vec::new();
        let mut chain: HashMap<String, String> = HashMap::new();
        for (i, action) in individual.main_actions().enumerate() {
            self.driver.register_new_action(i)?;
            let (result, go_on) = match action {
                Action::Rest(a) => self.handle_rest_call(a, &mut chain)?,
                Action::Graphql(g) => self.handle_graphql_call(g)?,
            };
            results.push(ActionResult::Rest(result));
            if !go_on {
                tracing::debug!(index = i, "stopping the sequence early");
                break;
            }
        }

        let ids = self.coverage_request(not_covered);
        let Some(dto) = self.driver.test_results(&ids)? else {
            tracing::warn!("cannot retrieve coverage");
            return Ok(None);
        };
        dto.validate()?;

        for t in &dto.targets {
            if let Some(description) = &t.descriptive_id {
                self.id_mapper.add_mapping(TargetId(t.id), description);
            }
            fv.update_target(TargetId(t.id), t.value, t.action_index);
        }

        if self.heuristics_for_sql {
            handle_extra(&dto, &mut fv);
        }
        self.handle_response_targets(&mut fv, &individual, &results);

        if self.expand_individuals {
            expand_individual(&mut individual, &dto.additional_info);
        }

        let mut ei = EvaluatedIndividual::new(individual, fv, results);
        ei.initialization = initialization;
        Ok(Some(ei))
    }

    /// Driver targets asked for in this evaluation, a rotating window over
    /// the open ones.
    fn coverage_request(&mut self, not_covered: &[TargetId]) -> BTreeSet<TargetId> {
        let remote: Vec<TargetId> = not_covered.iter().filter(|t| !t.is_local()).copied().collect();
        if remote.len() <= self.targets_per_request {
            return remote.into_iter().collect();
        }
        let start = self.coverage_offset % remote.len();
        self.coverage_offset = start + self.targets_per_request;
        remote
            .iter()
            .cycle()
            .skip(start)
            .take(self.targets_per_request)
            .copied()
            .collect()
    }

    fn do_initialization(
        &mut self,
        individual: &Individual,
    ) -> Result<Option<InitializationResult>, SearchError> {
        if individual
            .init_actions
            .iter()
            .all(|a| a.represents_existing_data)
        {
            return Ok(None);
        }
        let command = DatabaseCommand::from_actions(&individual.init_actions);
        let success = self.driver.execute_database_command(&command)?;
        if !success {
            self.stats.failed_db_commands += 1;
            tracing::warn!(rows = command.insertions.len(), "failed to execute database command");
        }
        Ok(Some(InitializationResult {
            executed_rows: command.insertions.len(),
            success,
        }))
    }

    /// Makes one REST call. The flag tells whether the sequence may go on.
    fn handle_rest_call(
        &mut self,
        a: &RestCallAction,
        chain: &mut HashMap<String, String>,
    ) -> Result<(RestCallResult, bool), SearchError> {
        let path = a.resolved_path();
        let location = a
            .location_id
            .as_ref()
            .and_then(|id| chain.get(&location_name(id)).filter(|l| !l.is_empty()));
        let url = match location {
            Some(location) => resolve_location(&self.base_url, location, &path),
            None => {
                if let Some(id) = &a.location_id {
                    tracing::debug!(action = %a.name(), location = %id, "no chained location, using the path");
                }
                format!("{}{}", self.base_url, path)
            }
        };
        let url = format!("{}{}", url, a.resolved_query()).replace('"', "");

        let mut request = HttpRequest::new(a.verb, url);
        request.headers = a.auth.as_ref().map(|auth| auth.headers.clone()).unwrap_or_default();
        for (name, value) in a.header_values() {
            if request.header(&name).is_none() {
                request.headers.push((name, value));
            }
        }
        request.accept = a.produces.first().cloned();

        let has_form = a.params.iter().any(|p| p.kind == ParamKind::Form);
        if a.body().is_some() && has_form {
            return Err(SearchError::Invariant(format!(
                "{} has both a body and form parameters",
                a.name()
            )));
        }
        request.entity = a.entity();
        if request.entity.is_none() && matches!(a.verb, HttpVerb::Put | HttpVerb::Patch) {
            request.entity = Some((
                "application/x-www-form-urlencoded".to_string(),
                String::new(),
            ));
        }

        let mut result = RestCallResult::default();
        let response = match self.call(&request, &mut result)? {
            Some(response) => response,
            None => return Ok((result, false)),
        };
        self.record_response(&mut result, response);

        if result.status_code == Some(401) && a.auth.is_some() {
            tracing::warn!(action = %a.name(), "call with authentication rejected with 401");
        }

        if a.save_location && !self.save_location(a, &path, &mut result, chain) {
            return Ok((result, false));
        }
        Ok((result, true))
    }

    fn handle_graphql_call(&mut self, g: &GraphqlAction) -> Result<(RestCallResult, bool), SearchError> {
        let mut request = HttpRequest::new(HttpVerb::Post, format!("{}/graphql", self.base_url));
        request.accept = Some("application/json".to_string());
        request.entity = Some((
            "application/json".to_string(),
            serde_json::json!({ "query": g.document() }).to_string(),
        ));
        let mut result = RestCallResult::default();
        match self.call(&request, &mut result)? {
            Some(response) => {
                self.record_response(&mut result, response);
                Ok((result, true))
            }
            None => Ok((result, false)),
        }
    }

    /// `Ok(None)` when the call hit a timeout or a redirect loop.
    fn call(
        &mut self,
        request: &HttpRequest,
        result: &mut RestCallResult,
    ) -> Result<Option<HttpResponse>, SearchError> {
        match self.transport.execute(request) {
            Ok(response) => Ok(Some(response)),
            Err(err @ TransportError::RedirectLoop { .. }) => {
                self.stats.redirect_loops += 1;
                tracing::warn!(url = %request.url, "infinite redirection loop");
                result.infinite_loop = true;
                result.error_message = Some(err.to_string());
                Ok(None)
            }
            Err(err @ TransportError::Timeout { .. }) => {
                self.stats.timeouts += 1;
                tracing::warn!(url = %request.url, timeouts = self.stats.timeouts, "SUT call timed out");
                result.timed_out = true;
                result.error_message = Some(err.to_string());
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn record_response(&mut self, result: &mut RestCallResult, response: HttpResponse) {
        result.status_code = Some(response.status);
        result.body_type = response.content_type;
        result.location = response.location;
        if response.body.len() <= self.max_response_byte_size {
            result.body = Some(response.body);
        } else {
            self.stats.large_responses += 1;
            tracing::warn!(
                bytes = response.body.len(),
                limit = self.max_response_byte_size,
                "response body too large, dropped"
            );
            result.too_large_body = true;
        }
    }

    /// Stores where the created resource lives. `false` when the creation
    /// failed, so the calls depending on it cannot run.
    fn save_location(
        &self,
        a: &RestCallAction,
        resolved_path: &str,
        result: &mut RestCallResult,
        chain: &mut HashMap<String, String>,
    ) -> bool {
        if !result.is_successful() {
            result.stopping = true;
            return false;
        }
        if result.location.is_none() {
            let child_by_id = self
                .catalog_paths
                .iter()
                .any(|p| p.is_direct_child_of(&a.path) && p.is_last_element_a_parameter());
            if let (true, Some(id)) = (child_by_id, result.resource_id()) {
                result.location = Some(format!("{}/{}", resolved_path, id));
                result.heuristics_for_chained_location = true;
            }
        }
        chain.insert(
            location_name(&a.path.last_element()),
            result.location.clone().unwrap_or_default(),
        );
        true
    }

    fn handle_response_targets(
        &mut self,
        fv: &mut FitnessValue,
        individual: &Individual,
        results: &[ActionResult],
    ) {
        for (i, (action, result)) in individual.main_actions().zip(results).enumerate() {
            let status = result
                .as_rest()
                .and_then(|r| r.status_code)
                .map_or(-1, i32::from);
            let description = status_description(status, &action.name());
            let id = self.id_mapper.handle_local_target(&description);
            fv.update_target(id, 1.0, Some(i));
        }
    }
}

fn handle_extra(dto: &TestResults, fv: &mut FitnessValue) {
    for (i, extra) in dto.extra_heuristics.iter().enumerate() {
        if !extra.to_minimize.is_empty() {
            fv.set_extra_to_minimize(i, extra.to_minimize.clone());
        }
        if let Some(execution) = &extra.database_execution {
            fv.set_database_execution(i, execution.clone());
        }
    }
}

fn inactive_string(name: &str) -> Gene {
    let mut gene = Gene::optional(Gene::string(name));
    if let GeneKind::Optional(g) = &mut gene.kind {
        g.active = false;
    }
    gene
}

/// Adds the headers and query parameters the SUT read but the schema did
/// not declare, as inactive optional strings.
fn expand_individual(individual: &mut Individual, infos: &[AdditionalInfo]) {
    if individual.size() < infos.len() {
        tracing::warn!(
            actions = individual.size(),
            infos = infos.len(),
            "more additional info than actions"
        );
        return;
    }
    for (action, info) in individual.main_actions_mut().zip(infos) {
        let Some(rest) = action.as_rest_mut() else {
            continue;
        };
        let auth: Vec<String> = rest
            .auth
            .as_ref()
            .map(|a| a.headers.iter().map(|(k, _)| k.clone()).collect())
            .unwrap_or_default();
        for (kind, names) in [
            (ParamKind::Header, &info.headers),
            (ParamKind::Query, &info.query_parameters),
        ] {
            for name in names {
                let known = rest
                    .params
                    .iter()
                    .any(|p| p.kind == kind && p.name().eq_ignore_ascii_case(name))
                    || (kind == ParamKind::Header
                        && auth.iter().any(|h| h.eq_ignore_ascii_case(name)));
                if !known {
                    rest.params.push(Param::new(kind.clone(), inactive_string(name)));
                }
            }
        }
    }
}
