//! End-to-end runs against an in-memory SUT.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use evorest_core::{
    Action, ActionCatalog, AdaptiveControl, Gene, GeneContext, HttpVerb, Individual, Param,
    ParamKind, Randomness, ResourceStatus, RestCallAction, RestPath, SampleType, TargetId,
};
use evorest_search::config::{ResourceSamplingStrategy, StoppingCriterion};
use evorest_search::driver::{DatabaseCommand, TargetInfo};
use evorest_search::resource::ResourceCluster;
use evorest_search::rest_fitness::RestFitness;
use evorest_search::{
    run_search, Algorithm, Archive, BlackBoxController, DriverError, EvaluatedIndividual,
    FitnessValue, HttpRequest, HttpResponse, HttpTransport, ProblemType, SearchConfig, SearchError,
    SutController, SutInfo, TestResults, TransportError,
};

/// Orders API: `POST /orders` creates order 7, `GET /orders/7` finds it,
/// everything else is a 404.
#[derive(Default)]
struct OrdersApi {
    calls: Rc<RefCell<Vec<HttpRequest>>>,
    /// Calls from this index on time out.
    time_out_from: Option<usize>,
}

impl HttpTransport for OrdersApi {
    fn execute(&mut self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let index = self.calls.borrow().len();
        self.calls.borrow_mut().push(request.clone());
        if self.time_out_from.is_some_and(|from| index >= from) {
            return Err(TransportError::Timeout {
                url: request.url.clone(),
            });
        }
        let response = match request.verb {
            HttpVerb::Post if request.url == "http://sut/orders" => HttpResponse {
                status: 201,
                location: Some("/orders/7".to_string()),
                ..Default::default()
            },
            HttpVerb::Get if request.url.ends_with("/orders/7") => HttpResponse {
                status: 200,
                body: r#"{"id": 7}"#.to_string(),
                ..Default::default()
            },
            _ => HttpResponse {
                status: 404,
                ..Default::default()
            },
        };
        Ok(response)
    }
}

/// Driver reporting one fully covered line on every evaluation.
#[derive(Default)]
struct StubDriver {
    resets: Rc<RefCell<usize>>,
    stopped: Rc<RefCell<bool>>,
}

impl SutController for StubDriver {
    fn check_connection(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn start_sut(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn stop_sut(&mut self) -> Result<(), DriverError> {
        *self.stopped.borrow_mut() = true;
        Ok(())
    }

    fn reset_sut(&mut self) -> Result<(), DriverError> {
        *self.resets.borrow_mut() += 1;
        Ok(())
    }

    fn sut_info(&mut self) -> Result<SutInfo, DriverError> {
        BlackBoxController::new("http://sut", ProblemType::Rest).sut_info()
    }

    fn register_new_action(&mut self, _index: usize) -> Result<(), DriverError> {
        Ok(())
    }

    fn test_results(&mut self, _ids: &BTreeSet<TargetId>) -> Result<Option<TestResults>, DriverError> {
        Ok(Some(TestResults {
            targets: vec![TargetInfo {
                id: 1,
                descriptive_id: Some("Line_1".to_string()),
                value: 1.0,
                action_index: Some(0),
            }],
            ..Default::default()
        }))
    }

    fn execute_database_command(&mut self, _command: &DatabaseCommand) -> Result<bool, DriverError> {
        Ok(true)
    }
}

fn catalog() -> ActionCatalog {
    [
        RestCallAction::new(HttpVerb::Post, RestPath::parse("/orders")),
        RestCallAction::new(HttpVerb::Get, RestPath::parse("/orders/{id}")),
    ]
    .into_iter()
    .map(Action::Rest)
    .collect()
}

fn budget(actions: u32) -> SearchConfig {
    let mut config = SearchConfig::default();
    config.seed = 42;
    config.stopping_criterion = StoppingCriterion::FitnessEvaluations;
    config.max_action_evaluations = actions;
    config.population_size = 4;
    config.tournament_size = 2;
    config.max_search_suite_size = 3;
    config
}

#[test]
fn test_mio_covers_status_and_driver_targets() {
    let driver = StubDriver::default();
    let (resets, stopped) = (driver.resets.clone(), driver.stopped.clone());
    let outcome = run_search(
        budget(200),
        catalog(),
        None,
        Box::new(driver),
        Box::new(OrdersApi::default()),
    )
    .unwrap();

    let covered = &outcome.report.covered;
    assert!(covered.contains(&"201:POST:/orders".to_string()));
    assert!(covered.contains(&"404:GET:/orders/{id}".to_string()));
    assert!(covered.contains(&"Line_1".to_string()));
    assert!(!outcome.solution.individuals.is_empty());
    assert!(outcome.dependencies.is_none());
    assert!(*resets.borrow() > 0);
    assert!(*stopped.borrow());
}

#[test]
fn test_every_algorithm_stops_on_its_budget() {
    for algorithm in [Algorithm::Mio, Algorithm::Random, Algorithm::Wts, Algorithm::Mosa] {
        let mut config = budget(60);
        config.algorithm = algorithm;
        let api = OrdersApi::default();
        let calls = api.calls.clone();
        let outcome = run_search(config, catalog(), None, Box::new(StubDriver::default()), Box::new(api))
            .unwrap_or_else(|e| panic!("{} failed: {}", algorithm, e));
        assert!(
            outcome.report.covered.contains(&"201:POST:/orders".to_string()),
            "{} missed the creation",
            algorithm
        );
        // the last evaluation may overshoot by at most one test
        assert!(calls.borrow().len() <= 60 + 10, "{} overran its budget", algorithm);
    }
}

#[test]
fn test_timeouts_end_sequences_and_are_counted() {
    let mut config = budget(20);
    config.algorithm = Algorithm::Random;
    let api = OrdersApi {
        time_out_from: Some(0),
        ..Default::default()
    };
    let outcome = run_search(config, catalog(), None, Box::new(StubDriver::default()), Box::new(api)).unwrap();
    assert!(outcome.stats.timeouts > 0);
    assert!(outcome
        .report
        .tests
        .iter()
        .all(|t| t.calls.iter().all(|c| c.status.is_none())));
    assert!(outcome.report.covered.contains(&"-1:POST:/orders".to_string()));
}

#[test]
fn test_unreachable_sut_fails_before_searching() {
    let api = OrdersApi::default();
    let calls = api.calls.clone();
    let err = run_search(
        budget(20),
        catalog(),
        None,
        Box::new(BlackBoxController::new("localhost:1", ProblemType::Rest)),
        Box::new(api),
    )
    .unwrap_err();
    assert!(matches!(err, SearchError::Driver(DriverError::NotReachable { .. })));
    assert!(calls.borrow().is_empty());
}

#[test]
fn test_invalid_config_is_rejected() {
    let mut config = budget(20);
    config.prob_of_random_sampling = 1.5;
    let err = run_search(
        config,
        catalog(),
        None,
        Box::new(StubDriver::default()),
        Box::new(OrdersApi::default()),
    )
    .unwrap_err();
    assert!(matches!(err, SearchError::Config(_)));
    assert!(!err.is_internal());
}

#[test]
fn test_resource_sampling_exports_dependencies() {
    let mut config = budget(100);
    config.resource_sample_strategy = ResourceSamplingStrategy::EqualProbability;
    config.heuristics_for_sql = false;
    config.generate_sql_data_with_search = false;
    config.export_dependencies = true;
    config.prob_of_enabling_resource_dependency_heuristics = 0.5;
    let outcome = run_search(
        config,
        catalog(),
        None,
        Box::new(StubDriver::default()),
        Box::new(OrdersApi::default()),
    )
    .unwrap();
    assert!(outcome.dependencies.is_some());
    assert!(outcome.report.covered.contains(&"201:POST:/orders".to_string()));
}

// ---------------------------------------------------------------------------
// Single evaluations
// ---------------------------------------------------------------------------

/// Catalog whose path variables carry integer genes.
fn typed_catalog() -> ActionCatalog {
    [(HttpVerb::Post, "/orders"), (HttpVerb::Get, "/orders/{id}")]
        .into_iter()
        .map(|(verb, path)| {
            let path = RestPath::parse(path);
            let mut a = RestCallAction::new(verb, path.clone());
            for v in path.variable_names() {
                a.params.push(Param::new(ParamKind::Path, Gene::int64(v)));
            }
            Action::Rest(a)
        })
        .collect()
}

fn evaluator(api: OrdersApi) -> RestFitness {
    RestFitness::new(
        &SearchConfig::default(),
        Box::new(StubDriver::default()),
        Box::new(api),
        "http://sut",
        vec![RestPath::parse("/orders"), RestPath::parse("/orders/{id}")],
    )
}

fn create_then_read(rng: &mut Randomness) -> Individual {
    let cluster = ResourceCluster::from_catalog(&typed_catalog());
    let call = cluster
        .get("/orders/{id}")
        .unwrap()
        .gen_calls("POST-GET", rng, 10, &GeneContext::default())
        .unwrap()
        .unwrap();
    Individual::new(vec![call], SampleType::SmartResource)
}

#[test]
fn test_read_after_create_follows_the_location() {
    let mut rng = Randomness::seeded(11);
    let individual = create_then_read(&mut rng);
    let call = &individual.calls[0];
    assert_eq!(call.actions.len(), 2);
    assert_eq!(call.status, ResourceStatus::Created);
    assert!(!call.independent);
    let post = call.actions[0].as_rest().unwrap();
    assert_eq!(post.verb, HttpVerb::Post);
    assert!(post.save_location);

    let api = OrdersApi::default();
    let calls = api.calls.clone();
    let mut fitness = evaluator(api);
    let ei = fitness.evaluate(individual, &[]).unwrap().unwrap();

    assert_eq!(calls.borrow()[1].url, "http://sut/orders/7");
    for description in ["201:POST:/orders", "200:GET:/orders/{id}"] {
        let id = fitness.id_mapper().id_of(description).unwrap();
        assert!(ei.fitness.does_cover(id), "{} not covered", description);
    }
}

#[test]
fn test_timeout_skips_the_remaining_actions() {
    let mut rng = Randomness::seeded(5);
    let mut individual = create_then_read(&mut rng);
    let extra = create_then_read(&mut rng).calls.remove(0);
    individual.calls.push(extra);
    assert_eq!(individual.size(), 4);

    let mut fitness = evaluator(OrdersApi {
        time_out_from: Some(1),
        ..Default::default()
    });
    let ei = fitness.evaluate(individual, &[]).unwrap().unwrap();

    assert_eq!(ei.executed_actions(), 2);
    assert_eq!(ei.rest_result(0).unwrap().status_code, Some(201));
    assert!(ei.rest_result(1).unwrap().timed_out);
    assert!(ei.rest_result(2).is_none());
    assert_eq!(fitness.stats().timeouts, 1);
}

#[test]
fn test_archive_with_limit_one_keeps_the_better_value() {
    let mut config = SearchConfig::default();
    config.archive_target_limit = 1;
    let mut archive = Archive::new(&config);
    let apc = AdaptiveControl::default();
    let target = TargetId(3);

    let scored = |value: f64| {
        let mut fv = FitnessValue::new(1.0);
        fv.update_target(target, value, Some(0));
        EvaluatedIndividual::new(Individual::new(Vec::new(), SampleType::Random), fv, Vec::new())
    };
    let better = scored(0.9);
    let better_id = better.id();
    archive.add_if_needed(scored(0.5), &apc, 1);
    archive.add_if_needed(better, &apc, 2);
    assert!(!archive.add_if_needed(scored(0.7), &apc, 3));

    let kept = archive.population(target);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].id(), better_id);
}
