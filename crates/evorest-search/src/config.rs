//! Search configuration.
//!
//! [`SearchConfig`] is a flat set of typed settings consumed read-only by the
//! engine. Every setting is also described by an entry of [`OPTIONS`], which
//! drives the generic string setter used by the binary and the min/max checks
//! in [`SearchConfig::validate`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_MAX_ACTION_EVALUATIONS: u32 = 1000;
pub const DEFAULT_MAX_TIME_IN_SECONDS: u32 = 60;

// ---------------------------------------------------------------------------
// Enumerated settings
// ---------------------------------------------------------------------------

macro_rules! config_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const NAMES: &'static [&'static str] = &[$($text),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $(
                    if s.eq_ignore_ascii_case($text) {
                        return Ok($name::$variant);
                    }
                )+
                Err(format!("expected one of {}", Self::NAMES.join(", ")))
            }
        }
    };
}

config_enum! {
    /// Search algorithm driving the generation loop.
    Algorithm {
        Mio => "MIO",
        Random => "RANDOM",
        Wts => "WTS",
        Mosa => "MOSA",
    }
}

config_enum! {
    ProblemType {
        Rest => "REST",
        Graphql => "GRAPHQL",
    }
}

config_enum! {
    StoppingCriterion {
        Time => "TIME",
        FitnessEvaluations => "FITNESS_EVALUATIONS",
    }
}

config_enum! {
    /// How extra heuristics break ties between equally-covering individuals.
    SecondaryObjectiveStrategy {
        AvgDistance => "AVG_DISTANCE",
        AvgDistanceSameNActions => "AVG_DISTANCE_SAME_N_ACTIONS",
        BestMin => "BEST_MIN",
    }
}

config_enum! {
    GeneMutationStrategy {
        OneOverN => "ONE_OVER_N",
        OneOverNBiasedSql => "ONE_OVER_N_BIASED_SQL",
    }
}

config_enum! {
    FeedbackDirectedSampling {
        None => "NONE",
        Last => "LAST",
        FocusedQuickest => "FOCUSED_QUICKEST",
    }
}

config_enum! {
    /// How the resource sampler picks among S1iR, S1dR, S2dR and SMdR.
    ResourceSamplingStrategy {
        None => "NONE",
        Customized => "Customized",
        EqualProbability => "EqualProbability",
        Actions => "Actions",
        TimeBudgets => "TimeBudgets",
        Archive => "Archive",
        ConArchive => "ConArchive",
    }
}

impl ResourceSamplingStrategy {
    /// Strategies whose probabilities adapt to archive performance.
    pub fn requires_archive(self) -> bool {
        matches!(
            self,
            ResourceSamplingStrategy::Archive | ResourceSamplingStrategy::ConArchive
        )
    }
}

config_enum! {
    ArchiveGeneSelectionMethod {
        None => "NONE",
        AwayBad => "AWAY_BAD",
        ApproachGood => "APPROACH_GOOD",
        FeedBack => "FEED_BACK",
    }
}

// ---------------------------------------------------------------------------
// Option table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OptionKind {
    Bool,
    Integer,
    Double,
    Text,
    Enum(&'static [&'static str]),
}

/// Declarative description of one setting.
#[derive(Debug, Clone, Copy)]
pub struct OptionSpec {
    pub name: &'static str,
    pub kind: OptionKind,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub experimental: bool,
    pub description: &'static str,
}

/// Conversion between a field and its textual option value.
trait OptionValue: Sized {
    fn parse_option(raw: &str) -> Result<Self, String>;
    fn render_option(&self) -> String;
    fn numeric(&self) -> Option<f64> {
        None
    }
}

impl OptionValue for bool {
    fn parse_option(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" => Ok(false),
            _ => Err("expected true or false".to_string()),
        }
    }

    fn render_option(&self) -> String {
        self.to_string()
    }
}

macro_rules! numeric_option_value {
    ($($ty:ty),+) => {
        $(
            impl OptionValue for $ty {
                fn parse_option(raw: &str) -> Result<Self, String> {
                    raw.trim().parse::<$ty>().map_err(|e| e.to_string())
                }

                fn render_option(&self) -> String {
                    self.to_string()
                }

                fn numeric(&self) -> Option<f64> {
                    Some(*self as f64)
                }
            }
        )+
    };
}

numeric_option_value!(u32, i64, usize, f64);

impl OptionValue for String {
    fn parse_option(raw: &str) -> Result<Self, String> {
        Ok(raw.to_string())
    }

    fn render_option(&self) -> String {
        self.clone()
    }
}

macro_rules! enum_option_value {
    ($($ty:ty),+) => {
        $(
            impl OptionValue for $ty {
                fn parse_option(raw: &str) -> Result<Self, String> {
                    raw.trim().parse()
                }

                fn render_option(&self) -> String {
                    self.as_str().to_string()
                }
            }
        )+
    };
}

enum_option_value!(
    Algorithm,
    ProblemType,
    StoppingCriterion,
    SecondaryObjectiveStrategy,
    GeneMutationStrategy,
    FeedbackDirectedSampling,
    ResourceSamplingStrategy,
    ArchiveGeneSelectionMethod
);

macro_rules! search_options {
    (
        $(
            $(#[doc = $doc:literal])*
            $field:ident: $ty:ty = $default:expr,
                $name:literal, $kind:expr, min: $min:expr, max: $max:expr, experimental: $exp:literal;
        )+
    ) => {
        /// Every setting the engine reads. Defaults match [`OPTIONS`].
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(default)]
        pub struct SearchConfig {
            $(
                $(#[doc = $doc])*
                pub $field: $ty,
            )+
        }

        impl Default for SearchConfig {
            fn default() -> Self {
                SearchConfig {
                    $($field: $default,)+
                }
            }
        }

        /// One entry per field of [`SearchConfig`], in declaration order.
        pub static OPTIONS: &[OptionSpec] = &[
            $(
                OptionSpec {
                    name: $name,
                    kind: $kind,
                    min: $min,
                    max: $max,
                    experimental: $exp,
                    description: concat!($($doc),*),
                },
            )+
        ];

        impl SearchConfig {
            /// Parses `value` into the option called `name`.
            pub fn set(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
                match name {
                    $(
                        $name => {
                            self.$field = OptionValue::parse_option(value).map_err(|reason| {
                                ConfigError::InvalidValue {
                                    option: name.to_string(),
                                    value: value.to_string(),
                                    reason,
                                }
                            })?;
                        }
                    )+
                    _ => {
                        return Err(ConfigError::UnknownOption {
                            name: name.to_string(),
                        })
                    }
                }
                Ok(())
            }

            /// Current value of the option called `name`, as text.
            pub fn get(&self, name: &str) -> Option<String> {
                match name {
                    $($name => Some(self.$field.render_option()),)+
                    _ => None,
                }
            }

            fn numeric(&self, name: &str) -> Option<f64> {
                match name {
                    $($name => self.$field.numeric(),)+
                    _ => None,
                }
            }
        }
    };
}

const PROBABILITY_MIN: Option<f64> = Some(0.0);
const PROBABILITY_MAX: Option<f64> = Some(1.0);

search_options! {
    /// The algorithm used to generate test cases.
    algorithm: Algorithm = Algorithm::Mio,
        "algorithm", OptionKind::Enum(Algorithm::NAMES), min: None, max: None, experimental: false;
    /// The type of API the tests are generated for.
    problem_type: ProblemType = ProblemType::Rest,
        "problemType", OptionKind::Enum(ProblemType::NAMES), min: None, max: None, experimental: false;
    /// Seed of the random generator. A negative value seeds from entropy.
    seed: i64 = -1,
        "seed", OptionKind::Integer, min: None, max: None, experimental: false;
    /// Limit of individuals kept per target in the archive.
    archive_target_limit: usize = 10,
        "archiveTargetLimit", OptionKind::Integer, min: Some(1.0), max: None, experimental: false;
    /// Probability of sampling a new individual at random.
    prob_of_random_sampling: f64 = 0.5,
        "probOfRandomSampling", OptionKind::Double, min: PROBABILITY_MIN, max: PROBABILITY_MAX, experimental: false;
    /// Fraction of the budget after which the search becomes focused.
    focused_search_activation_time: f64 = 0.5,
        "focusedSearchActivationTime", OptionKind::Double, min: PROBABILITY_MIN, max: PROBABILITY_MAX, experimental: false;
    /// Mutations applied to a sampled individual at the start of the search.
    start_number_of_mutations: u32 = 1,
        "startNumberOfMutations", OptionKind::Integer, min: Some(0.0), max: None, experimental: false;
    /// Mutations applied to a sampled individual by the end of the search.
    end_number_of_mutations: u32 = 10,
        "endNumberOfMutations", OptionKind::Integer, min: Some(0.0), max: None, experimental: false;
    /// Stopping criterion for the search.
    stopping_criterion: StoppingCriterion = StoppingCriterion::Time,
        "stoppingCriterion", OptionKind::Enum(StoppingCriterion::NAMES), min: None, max: None, experimental: false;
    /// Maximum number of action evaluations, used with FITNESS_EVALUATIONS.
    max_action_evaluations: u32 = DEFAULT_MAX_ACTION_EVALUATIONS,
        "maxActionEvaluations", OptionKind::Integer, min: Some(1.0), max: None, experimental: false;
    /// Maximum number of seconds, used with TIME.
    max_time_in_seconds: u32 = DEFAULT_MAX_TIME_IN_SECONDS,
        "maxTimeInSeconds", OptionKind::Integer, min: Some(1.0), max: None, experimental: false;
    /// Strategy used to handle the extra heuristics in the secondary objectives.
    secondary_objective_strategy: SecondaryObjectiveStrategy = SecondaryObjectiveStrategy::AvgDistanceSameNActions,
        "secondaryObjectiveStrategy", OptionKind::Enum(SecondaryObjectiveStrategy::NAMES), min: None, max: None, experimental: false;
    /// Whether secondary objectives are less important than test bloat control.
    bloat_control_for_secondary_objective: bool = false,
        "bloatControlForSecondaryObjective", OptionKind::Bool, min: None, max: None, experimental: false;
    /// Probability of a mutation that changes the structure of a test.
    structure_mutation_probability: f64 = 0.5,
        "structureMutationProbability", OptionKind::Double, min: PROBABILITY_MIN, max: PROBABILITY_MAX, experimental: false;
    /// Strategy used to define the mutation probability.
    gene_mutation_strategy: GeneMutationStrategy = GeneMutationStrategy::OneOverNBiasedSql,
        "geneMutationStrategy", OptionKind::Enum(GeneMutationStrategy::NAMES), min: None, max: None, experimental: false;
    /// Which targets to favour when sampling from the archive.
    feedback_directed_sampling: FeedbackDirectedSampling = FeedbackDirectedSampling::Last,
        "feedbackDirectedSampling", OptionKind::Enum(FeedbackDirectedSampling::NAMES), min: None, max: None, experimental: false;
    /// Population size of population-based algorithms.
    population_size: usize = 30,
        "populationSize", OptionKind::Integer, min: Some(1.0), max: None, experimental: false;
    /// Maximum number of tests in a suite evolved by WTS.
    max_search_suite_size: usize = 50,
        "maxSearchSuiteSize", OptionKind::Integer, min: Some(1.0), max: None, experimental: false;
    /// Probability of applying crossover.
    xover_probability: f64 = 0.7,
        "xoverProbability", OptionKind::Double, min: PROBABILITY_MIN, max: PROBABILITY_MAX, experimental: false;
    /// Number of elements considered by tournament selection.
    tournament_size: usize = 10,
        "tournamentSize", OptionKind::Integer, min: Some(1.0), max: None, experimental: false;
    /// Probability of smart (template-based) sampling instead of plain random.
    prob_of_smart_sampling: f64 = 0.5,
        "probOfSmartSampling", OptionKind::Double, min: PROBABILITY_MIN, max: PROBABILITY_MAX, experimental: false;
    /// Max number of main actions in a single test.
    max_test_size: usize = 10,
        "maxTestSize", OptionKind::Integer, min: Some(1.0), max: None, experimental: false;
    /// Use SQL execution heuristics reported by the driver.
    heuristics_for_sql: bool = true,
        "heuristicsForSQL", OptionKind::Bool, min: None, max: None, experimental: false;
    /// Ask the driver to extract SQL execution info.
    extract_sql_execution_info: bool = true,
        "extractSqlExecutionInfo", OptionKind::Bool, min: None, max: None, experimental: false;
    /// Generate SQL data with symbolic execution.
    generate_sql_data_with_dse: bool = false,
        "generateSqlDataWithDSE", OptionKind::Bool, min: None, max: None, experimental: true;
    /// Generate SQL data with the search itself.
    generate_sql_data_with_search: bool = true,
        "generateSqlDataWithSearch", OptionKind::Bool, min: None, max: None, experimental: false;
    /// Max rows generated for each SQL select missing data.
    max_sql_init_actions_per_missing_data: usize = 5,
        "maxSqlInitActionsPerMissingData", OptionKind::Integer, min: Some(1.0), max: None, experimental: false;
    /// Response bodies at least this large are not stored.
    max_response_byte_size: usize = 1_000_000,
        "maxResponseByteSize", OptionKind::Integer, min: Some(0.0), max: None, experimental: false;
    /// Track the history of modifications of individuals.
    enable_track_individual: bool = false,
        "enableTrackIndividual", OptionKind::Bool, min: None, max: None, experimental: true;
    /// Track the history of evaluated individuals.
    enable_track_evaluated_individual: bool = false,
        "enableTrackEvaluatedIndividual", OptionKind::Bool, min: None, max: None, experimental: true;
    /// Steps kept in a tracked provenance log.
    max_lineage_depth: usize = 10,
        "maxLineageDepth", OptionKind::Integer, min: Some(1.0), max: None, experimental: true;
    /// Add genes for headers and query parameters the SUT reads but the catalog lacks.
    expand_rest_individuals: bool = true,
        "expandRestIndividuals", OptionKind::Bool, min: None, max: None, experimental: false;
    /// Resource-based sampling strategy.
    resource_sample_strategy: ResourceSamplingStrategy = ResourceSamplingStrategy::None,
        "resourceSampleStrategy", OptionKind::Enum(ResourceSamplingStrategy::NAMES), min: None, max: None, experimental: true;
    /// Probability of using resource dependency heuristics when sampling and mutating.
    prob_of_enabling_resource_dependency_heuristics: f64 = 0.0,
        "probOfEnablingResourceDependencyHeuristics", OptionKind::Double, min: PROBABILITY_MIN, max: PROBABILITY_MAX, experimental: true;
    /// Export derived dependencies among resources.
    export_dependencies: bool = false,
        "exportDependencies", OptionKind::Bool, min: None, max: None, experimental: true;
    /// File receiving exported dependencies.
    dependency_file: String = "dependencies.json".to_string(),
        "dependencyFile", OptionKind::Text, min: None, max: None, experimental: true;
    /// Probability of preparing resources with SQL actions.
    prob_of_apply_sql_action_to_create_resources: f64 = 0.0,
        "probOfApplySQLActionToCreateResources", OptionKind::Double, min: PROBABILITY_MIN, max: PROBABILITY_MAX, experimental: true;
    /// Below this many rows a table is always inserted into rather than selected from.
    min_row_of_table: usize = 10,
        "minRowOfTable", OptionKind::Integer, min: Some(0.0), max: None, experimental: true;
    /// Probability of selecting existing rows instead of inserting new ones.
    prob_of_select_from_database: f64 = 0.1,
        "probOfSelectFromDatabase", OptionKind::Double, min: PROBABILITY_MIN, max: PROBABILITY_MAX, experimental: true;
    /// Derive parameter-to-table relations by name matching.
    does_apply_name_matching: bool = false,
        "doesApplyNameMatching", OptionKind::Bool, min: None, max: None, experimental: true;
    /// Probability of S1iR with the Customized strategy.
    s1ir: f64 = 0.25,
        "S1iR", OptionKind::Double, min: PROBABILITY_MIN, max: PROBABILITY_MAX, experimental: true;
    /// Probability of S1dR with the Customized strategy.
    s1dr: f64 = 0.25,
        "S1dR", OptionKind::Double, min: PROBABILITY_MIN, max: PROBABILITY_MAX, experimental: true;
    /// Probability of S2dR with the Customized strategy.
    s2dr: f64 = 0.25,
        "S2dR", OptionKind::Double, min: PROBABILITY_MIN, max: PROBABILITY_MAX, experimental: true;
    /// Probability of SMdR with the Customized strategy.
    smdr: f64 = 0.25,
        "SMdR", OptionKind::Double, min: PROBABILITY_MIN, max: PROBABILITY_MAX, experimental: true;
    /// Probability of archive-based gene selection.
    prob_of_archive_mutation: f64 = 0.0,
        "probOfArchiveMutation", OptionKind::Double, min: PROBABILITY_MIN, max: PROBABILITY_MAX, experimental: true;
    /// Share of genes kept as candidates by archive-based selection.
    per_of_candidate_genes_to_mutate: f64 = 0.1,
        "perOfCandidateGenesToMutate", OptionKind::Double, min: PROBABILITY_MIN, max: PROBABILITY_MAX, experimental: true;
    /// Archive-based gene selection method.
    gene_selection_method: ArchiveGeneSelectionMethod = ArchiveGeneSelectionMethod::None,
        "geneSelectionMethod", OptionKind::Enum(ArchiveGeneSelectionMethod::NAMES), min: None, max: None, experimental: true;
    /// Run without a driver, against a SUT reachable at `bbTargetUrl`.
    black_box: bool = false,
        "blackBox", OptionKind::Bool, min: None, max: None, experimental: true;
    /// URL of the SUT in black-box mode.
    bb_target_url: String = String::new(),
        "bbTargetUrl", OptionKind::Text, min: None, max: None, experimental: true;
    /// Black-box experiments where a driver can still reset state.
    bb_experiments: bool = false,
        "bbExperiments", OptionKind::Bool, min: None, max: None, experimental: true;
    /// Not-covered targets requested from the driver after each evaluation.
    targets_per_coverage_request: usize = 100,
        "targetsPerCoverageRequest", OptionKind::Integer, min: Some(1.0), max: None, experimental: false;
}

// ---------------------------------------------------------------------------
// Validation and derived settings
// ---------------------------------------------------------------------------

impl SearchConfig {
    /// Checks every bound of [`OPTIONS`] and the cross-field rules.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for spec in OPTIONS {
            let Some(value) = self.numeric(spec.name) else {
                continue;
            };
            if let Some(min) = spec.min {
                if value < min {
                    return Err(ConfigError::BelowMinimum {
                        option: spec.name,
                        value,
                        min,
                    });
                }
            }
            if let Some(max) = spec.max {
                if value > max {
                    return Err(ConfigError::AboveMaximum {
                        option: spec.name,
                        value,
                        max,
                    });
                }
            }
        }
        self.check_cross_field_rules()
    }

    fn check_cross_field_rules(&self) -> Result<(), ConfigError> {
        let fail = |msg: String| Err(ConfigError::Inconsistent(msg));

        match self.stopping_criterion {
            StoppingCriterion::Time
                if self.max_action_evaluations != DEFAULT_MAX_ACTION_EVALUATIONS =>
            {
                return fail(
                    "Changing number of max actions, but stopping criterion is time".to_string(),
                );
            }
            StoppingCriterion::FitnessEvaluations
                if self.max_time_in_seconds != DEFAULT_MAX_TIME_IN_SECONDS =>
            {
                return fail(
                    "Changing number of max seconds, but stopping criterion is based on fitness evaluations"
                        .to_string(),
                );
            }
            _ => {}
        }

        if self.should_generate_sql_data() && !self.heuristics_for_sql {
            return fail(
                "Cannot generate SQL data without enabling 'heuristicsForSQL'".to_string(),
            );
        }
        if self.heuristics_for_sql && !self.extract_sql_execution_info {
            return fail(
                "Cannot collect SQL heuristics without enabling 'extractSqlExecutionInfo'"
                    .to_string(),
            );
        }
        if self.enable_track_evaluated_individual && self.enable_track_individual {
            return fail(
                "When tracking EvaluatedIndividual, it is not necessary to track individual"
                    .to_string(),
            );
        }

        let resource_options: Vec<&str> = [
            (
                "resourceSampleStrategy",
                self.resource_sample_strategy != ResourceSamplingStrategy::None,
            ),
            (
                "probOfApplySQLActionToCreateResources",
                self.prob_of_apply_sql_action_to_create_resources > 0.0,
            ),
            ("doesApplyNameMatching", self.does_apply_name_matching),
            (
                "probOfEnablingResourceDependencyHeuristics",
                self.prob_of_enabling_resource_dependency_heuristics > 0.0,
            ),
            ("exportDependencies", self.export_dependencies),
        ]
        .into_iter()
        .filter(|(_, enabled)| *enabled)
        .map(|(name, _)| name)
        .collect();
        if !resource_options.is_empty()
            && (self.problem_type != ProblemType::Rest || self.algorithm != Algorithm::Mio)
        {
            return fail(format!(
                "Parameters ({}) are only applicable on REST problem (but current is {}) with MIO algorithm (but current is {})",
                resource_options.join(" and "),
                self.problem_type,
                self.algorithm
            ));
        }

        if self.resource_sample_strategy != ResourceSamplingStrategy::None
            && (self.heuristics_for_sql
                || self.generate_sql_data_with_search
                || self.generate_sql_data_with_dse
                || self.gene_mutation_strategy == GeneMutationStrategy::OneOverN)
        {
            return fail("Resource sampling does not support SQL strategies".to_string());
        }

        if self.resource_sample_strategy == ResourceSamplingStrategy::Customized {
            let sum = self.s1ir + self.s1dr + self.s2dr + self.smdr;
            if (sum - 1.0).abs() > 1e-6 {
                return fail(format!(
                    "With Customized resource sampling, S1iR + S1dR + S2dR + SMdR must be 1 (but is {})",
                    sum
                ));
            }
        }

        if self.gene_selection_method != ArchiveGeneSelectionMethod::None
            && self.algorithm != Algorithm::Mio
        {
            return fail(format!(
                "ArchiveGeneSelectionMethod is only applicable with MIO algorithm (but current is {})",
                self.algorithm
            ));
        }

        if self.black_box && !self.bb_experiments && self.bb_target_url.trim().is_empty() {
            return fail("In black-box mode, you need to set the bbTargetUrl option".to_string());
        }
        if !self.black_box && self.bb_experiments {
            return fail("Cannot setup bbExperiments without black-box mode".to_string());
        }

        Ok(())
    }

    pub fn should_generate_sql_data(&self) -> bool {
        self.generate_sql_data_with_dse || self.generate_sql_data_with_search
    }

    pub fn is_lineage_tracked(&self) -> bool {
        self.enable_track_individual || self.enable_track_evaluated_individual
    }

    pub fn uses_resource_sampling(&self) -> bool {
        self.resource_sample_strategy != ResourceSamplingStrategy::None
    }

    /// Names of experimental options whose value differs from the default.
    pub fn experimental_features(&self) -> Vec<&'static str> {
        let defaults = SearchConfig::default();
        OPTIONS
            .iter()
            .filter(|spec| spec.experimental && self.get(spec.name) != defaults.get(spec.name))
            .map(|spec| spec.name)
            .collect()
    }

    pub fn option(name: &str) -> Option<&'static OptionSpec> {
        OPTIONS.iter().find(|spec| spec.name == name)
    }
}
