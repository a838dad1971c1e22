//! evorest command-line driver.
//!
//! Provides the `evorest` binary, which loads an action catalog (and
//! optionally the SUT's database schema), runs a black-box search against
//! `bbTargetUrl` and prints the resulting test suite as JSON. Search options
//! are set by name with `--set name=value`, using the same names as the
//! option table of `evorest_search::config`.
//!
//! Exit codes: 0 = success, 1 = internal error, 2 = invalid configuration or
//! input, 3 = SUT not reachable, 4 = SUT problem reported by the driver.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use clap::Parser;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use evorest_core::{Action, ActionCatalog, DbSchema};
use evorest_search::{
    run_search, BlackBoxController, ConfigError, DriverError, ReqwestTransport, SearchConfig,
    SearchError,
};

/// Search-based test generation for REST APIs.
#[derive(Parser, Debug)]
#[command(name = "evorest", about = "Search-based test generation for REST APIs")]
struct Cli {
    /// JSON array with one entry per API operation.
    #[arg(short, long)]
    catalog: PathBuf,

    /// JSON database schema of the SUT.
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Search option, e.g. `--set maxTimeInSeconds=120`. Repeatable.
    #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_assignment)]
    set: Vec<(String, String)>,

    /// File receiving the test suite (default: stdout).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Timeout of a single HTTP call, in seconds.
    #[arg(long, default_value_t = 10)]
    call_timeout: u64,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("cannot access '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid JSON in '{}': {source}", .path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("cannot serialize output: {0}")]
    Output(serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Search(#[from] SearchError),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            CliError::Io { .. } | CliError::Json { .. } | CliError::Config(_) => 2,
            CliError::Output(_) => 1,
            CliError::Search(e) => search_exit_code(e),
        }
    }
}

fn search_exit_code(err: &SearchError) -> i32 {
    match err {
        SearchError::Config(_) => 2,
        SearchError::Driver(DriverError::NotReachable { .. }) => 3,
        SearchError::Driver(_) => 4,
        SearchError::Transport(_) | SearchError::Internal(_) | SearchError::Invariant(_) => 1,
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        match &e {
            CliError::Search(err) if err.is_internal() => {
                eprintln!("Error: internal failure, this is a bug in evorest: {}", e)
            }
            CliError::Search(SearchError::Driver(DriverError::NotReachable { .. })) => {
                eprintln!("Error: {}. Is the SUT running?", e)
            }
            _ => eprintln!("Error: {}", e),
        }
        process::exit(e.exit_code());
    }
}

fn run(cli: &Cli) -> Result<(), CliError> {
    let config = build_config(&cli.set)?;
    let catalog = load_catalog(&cli.catalog)?;
    let schema = cli.schema.as_deref().map(load_json::<DbSchema>).transpose()?;

    let driver = BlackBoxController::new(config.bb_target_url.clone(), config.problem_type);
    let transport =
        ReqwestTransport::new(Duration::from_secs(cli.call_timeout)).map_err(SearchError::from)?;
    let dependency_file = PathBuf::from(&config.dependency_file);

    let outcome = run_search(config, catalog, schema, Box::new(driver), Box::new(transport))?;
    tracing::info!(
        tests = outcome.report.tests.len(),
        covered = outcome.report.covered_targets,
        reached = outcome.report.reached_targets,
        "test suite generated"
    );

    write_json(cli.output.as_deref(), &outcome.report)?;
    if let Some(edges) = &outcome.dependencies {
        write_json(Some(&dependency_file), edges)?;
        tracing::info!(edges = edges.len(), file = %dependency_file.display(), "dependencies exported");
    }
    Ok(())
}

/// Parses `name=value`.
fn parse_assignment(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected NAME=VALUE, got '{}'", s)),
    }
}

/// Defaults overridden by `assignments`, in order. Only black-box runs are
/// possible from the command line.
fn build_config(assignments: &[(String, String)]) -> Result<SearchConfig, ConfigError> {
    let mut config = SearchConfig::default();
    for (name, value) in assignments {
        config.set(name, value)?;
    }
    if !config.black_box {
        return Err(ConfigError::Inconsistent(
            "evorest runs in black-box mode only: set blackBox=true and bbTargetUrl".to_string(),
        ));
    }
    config.validate()?;
    Ok(config)
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let text = fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| CliError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn load_catalog(path: &Path) -> Result<ActionCatalog, CliError> {
    let actions: Vec<Action> = load_json(path)?;
    let count = actions.len();
    let catalog: ActionCatalog = actions.into_iter().collect();
    if catalog.len() != count {
        tracing::warn!(
            declared = count,
            distinct = catalog.len(),
            "duplicate operations in the catalog, keeping the last of each"
        );
    }
    if catalog.is_empty() {
        return Err(ConfigError::Inconsistent(format!(
            "catalog '{}' declares no operation",
            path.display()
        ))
        .into());
    }
    Ok(catalog)
}

fn write_json<T: Serialize>(path: Option<&Path>, value: &T) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(value).map_err(CliError::Output)?;
    match path {
        Some(path) => fs::write(path, json).map_err(|source| CliError::Io {
            path: path.to_path_buf(),
            source,
        }),
        None => {
            println!("{}", json);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use evorest_core::{CoreError, HttpVerb, RestCallAction, RestPath};

    fn assignments(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_assignment() {
        assert_eq!(
            parse_assignment("maxTimeInSeconds = 30"),
            Ok(("maxTimeInSeconds".to_string(), "30".to_string()))
        );
        assert_eq!(
            parse_assignment("bbTargetUrl=http://h/?a=b"),
            Ok(("bbTargetUrl".to_string(), "http://h/?a=b".to_string()))
        );
        assert!(parse_assignment("seed").is_err());
        assert!(parse_assignment("=3").is_err());
    }

    #[test]
    fn test_cli_collects_repeated_sets() {
        let cli = Cli::try_parse_from([
            "evorest",
            "--catalog",
            "api.json",
            "--set",
            "seed=3",
            "--set",
            "algorithm=WTS",
        ])
        .unwrap();
        assert_eq!(cli.set.len(), 2);
        assert_eq!(cli.call_timeout, 10);
        assert!(Cli::try_parse_from(["evorest", "--catalog", "a.json", "--set", "seed"]).is_err());
    }

    #[test]
    fn test_build_config() {
        let config = build_config(&assignments(&[
            ("blackBox", "true"),
            ("bbTargetUrl", "http://localhost:8080"),
            ("seed", "7"),
        ]))
        .unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.bb_target_url, "http://localhost:8080");

        let err = build_config(&assignments(&[("seed", "1")])).unwrap_err();
        assert!(matches!(err, ConfigError::Inconsistent(_)));
        let err = build_config(&assignments(&[("noSuchOption", "1")])).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownOption { .. }));
        assert_eq!(CliError::from(err).exit_code(), 2);
    }

    #[test]
    fn test_exit_codes() {
        let unreachable = SearchError::Driver(DriverError::NotReachable {
            url: "http://sut".into(),
            reason: "refused".into(),
        });
        assert_eq!(search_exit_code(&unreachable), 3);
        let sut = SearchError::Driver(DriverError::SutProblem("db down".into()));
        assert_eq!(search_exit_code(&sut), 4);
        let bug = SearchError::Internal(CoreError::ImmutableGene { name: "id".into() });
        assert_eq!(search_exit_code(&bug), 1);
        assert_eq!(search_exit_code(&SearchError::Invariant("x".into())), 1);
    }

    #[test]
    fn test_load_catalog() {
        let actions = vec![
            Action::Rest(RestCallAction::new(HttpVerb::Post, RestPath::parse("/orders"))),
            Action::Rest(RestCallAction::new(HttpVerb::Get, RestPath::parse("/orders/{id}"))),
        ];
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string(&actions).unwrap().as_bytes())
            .unwrap();
        let catalog = load_catalog(file.path()).unwrap();
        assert_eq!(catalog.len(), 2);
        assert!(catalog.get("GET:/orders/{id}").is_some());
    }

    #[test]
    fn test_bad_inputs_are_configuration_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[]").unwrap();
        let err = load_catalog(file.path()).unwrap_err();
        assert_eq!(err.exit_code(), 2);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        let err = load_json::<DbSchema>(file.path()).unwrap_err();
        assert!(matches!(err, CliError::Json { .. }));
        assert_eq!(err.exit_code(), 2);

        let err = load_json::<DbSchema>(Path::new("/no/such/schema.json")).unwrap_err();
        assert!(matches!(err, CliError::Io { .. }));
    }

    #[test]
    fn test_write_json_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        write_json(Some(&path), &vec![1, 2, 3]).unwrap();
        let back: Vec<i32> = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, vec![1, 2, 3]);
    }
}
