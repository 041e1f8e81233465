use crate::executor::{CommandExecutorConfig, InputDelivery};
use crate::grammar::DEFAULT_START_SYMBOL;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("'{field}' must be at least 1")]
    Zero { field: &'static str },
    #[error("'{field}' must be a probability in [0, 1], got {value}")]
    NotAProbability { field: &'static str, value: f64 },
    #[error("'probability-smoothing' must be finite and non-negative, got {0}")]
    InvalidSmoothing(f64),
    #[error("Executor command is empty")]
    EmptyCommand,
    #[error("No grammar file configured")]
    MissingGrammarPath,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionKind {
    #[default]
    Tournament,
    FitnessProportional,
    Truncation,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FitnessKind {
    /// 1.0 for failing inputs, 0.0 otherwise.
    #[default]
    Failure,
    /// Input length plus a bonus for failing inputs.
    Length,
}

/// What happens to a seed the grammar cannot parse.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidSeedPolicy {
    /// Drop the seed and log a warning.
    #[default]
    Skip,
    /// Fail engine construction.
    Reject,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FuzzerSettings {
    #[serde(default = "default_iterations")]
    pub iterations: usize,
    #[serde(default = "default_population_size")]
    pub population_size: usize,
    /// Number of parents selected per generation.
    #[serde(default = "default_parent_count")]
    pub parent_count: usize,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default)]
    pub selection: SelectionKind,
    #[serde(default = "default_tournament_size")]
    pub tournament_size: usize,
    #[serde(default = "default_crossover_probability")]
    pub crossover_probability: f64,
    #[serde(default = "default_mutation_probability")]
    pub mutation_probability: f64,
    /// Share of each generation sampled fresh from the learned grammar.
    #[serde(default = "default_generation_ratio")]
    pub generation_ratio: f64,
    #[serde(default = "default_probability_smoothing")]
    pub probability_smoothing: f64,
    #[serde(default)]
    pub seed: u64,
    /// Stop as soon as this many distinct failing inputs were found.
    #[serde(default)]
    pub max_failing: Option<usize>,
    #[serde(default)]
    pub invalid_seed_policy: InvalidSeedPolicy,
    #[serde(default)]
    pub fitness: FitnessKind,
    /// Wall-clock budget for one in-process oracle call.
    #[serde(default)]
    pub oracle_timeout_ms: Option<u64>,
}

pub fn default_iterations() -> usize {
    10
}
pub fn default_population_size() -> usize {
    100
}
pub fn default_parent_count() -> usize {
    10
}
pub fn default_max_depth() -> usize {
    crate::generator::DEFAULT_MAX_DEPTH
}
pub fn default_tournament_size() -> usize {
    3
}
pub fn default_crossover_probability() -> f64 {
    0.5
}
pub fn default_mutation_probability() -> f64 {
    0.9
}
pub fn default_generation_ratio() -> f64 {
    0.2
}
pub fn default_probability_smoothing() -> f64 {
    0.1
}

impl Default for FuzzerSettings {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            population_size: default_population_size(),
            parent_count: default_parent_count(),
            max_depth: default_max_depth(),
            selection: SelectionKind::default(),
            tournament_size: default_tournament_size(),
            crossover_probability: default_crossover_probability(),
            mutation_probability: default_mutation_probability(),
            generation_ratio: default_generation_ratio(),
            probability_smoothing: default_probability_smoothing(),
            seed: 0,
            max_failing: None,
            invalid_seed_policy: InvalidSeedPolicy::default(),
            fitness: FitnessKind::default(),
            oracle_timeout_ms: None,
        }
    }
}

impl FuzzerSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("population-size", self.population_size),
            ("parent-count", self.parent_count),
            ("tournament-size", self.tournament_size),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }
        if self.max_failing == Some(0) {
            return Err(ConfigError::Zero { field: "max-failing" });
        }
        for (field, value) in [
            ("crossover-probability", self.crossover_probability),
            ("mutation-probability", self.mutation_probability),
            ("generation-ratio", self.generation_ratio),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::NotAProbability { field, value });
            }
        }
        if !self.probability_smoothing.is_finite() || self.probability_smoothing < 0.0 {
            return Err(ConfigError::InvalidSmoothing(self.probability_smoothing));
        }
        Ok(())
    }

    pub fn oracle_timeout(&self) -> Option<Duration> {
        self.oracle_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct GrammarSettings {
    /// JSON grammar file.
    pub path: Option<PathBuf>,
    #[serde(default = "default_start_symbol")]
    pub start_symbol: String,
}

fn default_start_symbol() -> String {
    DEFAULT_START_SYMBOL.to_string()
}

impl Default for GrammarSettings {
    fn default() -> Self {
        Self {
            path: None,
            start_symbol: default_start_symbol(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SeedSettings {
    /// Seed strings given inline.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Seed files or directories, one seed per file.
    #[serde(default)]
    pub paths: Vec<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigInputDelivery {
    #[default]
    StdIn,
    File {
        template: String,
    },
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CommandExecutorSettings {
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub input_delivery: ConfigInputDelivery,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    pub working_dir: Option<PathBuf>,
    /// Exit codes counted as failing; every nonzero code when unset.
    pub failing_exit_codes: Option<Vec<i32>>,
}

fn default_timeout_ms() -> u64 {
    2000
}

impl Default for CommandExecutorSettings {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            input_delivery: ConfigInputDelivery::default(),
            timeout_ms: default_timeout_ms(),
            working_dir: None,
            failing_exit_codes: None,
        }
    }
}

impl CommandExecutorSettings {
    pub fn to_executor_config(&self) -> Result<CommandExecutorConfig, ConfigError> {
        if self.command.is_empty() {
            return Err(ConfigError::EmptyCommand);
        }
        let input_delivery = match &self.input_delivery {
            ConfigInputDelivery::StdIn => InputDelivery::StdIn,
            ConfigInputDelivery::File { template } => InputDelivery::File(template.clone()),
        };
        Ok(CommandExecutorConfig {
            command: self.command.clone(),
            input_delivery,
            timeout: Duration::from_millis(self.timeout_ms),
            working_dir: self.working_dir.clone(),
            failing_exit_codes: self.failing_exit_codes.clone(),
        })
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct OutputSettings {
    /// Where the corpus, failing inputs and learned grammar are exported.
    pub dir: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct EvoGFuzzConfig {
    #[serde(default)]
    pub fuzzer: FuzzerSettings,
    #[serde(default)]
    pub grammar: GrammarSettings,
    #[serde(default)]
    pub seeds: SeedSettings,
    #[serde(default)]
    pub executor: CommandExecutorSettings,
    #[serde(default)]
    pub output: OutputSettings,
}

impl EvoGFuzzConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: EvoGFuzzConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;
        config
            .fuzzer
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid settings in {:?}: {}", path, e))?;

        Ok(config)
    }
}
