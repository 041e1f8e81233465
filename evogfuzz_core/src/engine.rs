//! The evolutionary fuzzing loop.
//!
//! An [`EvoGFuzz`] engine cycles through `Evaluate → Select → Evolve` once per
//! iteration. Evaluation runs each new input through the [`Executor`] and the
//! fitness function and records it in the corpus; selection picks the parents;
//! evolution learns a probabilistic grammar from the parents and breeds the
//! next population from it by generation, crossover and subtree mutation.

use crate::config::{
    ConfigError, EvoGFuzzConfig, FitnessKind, FuzzerSettings, InvalidSeedPolicy, SelectionKind,
};
use crate::corpus::{Corpus, CorpusError, InMemoryCorpus, load_seed_files};
use crate::executor::{ExecutionStatus, Executor, InProcessExecutor};
use crate::fitness::{FailureFitness, FitnessFunction, LengthFitness};
use crate::generator::GrammarGenerator;
use crate::grammar::{Grammar, GrammarError};
use crate::input::{Input, Origin};
use crate::mutator::{Crossover, Mutator, SubtreeCrossover, SubtreeMutator};
use crate::oracle::{BugReport, Oracle, OracleResult};
use crate::parser::{EarleyParser, ParseError};
use crate::probabilistic::ProbabilisticGrammar;
use crate::selection::{
    FitnessProportionalSelection, Selection, SelectionError, TournamentSelection,
    TruncationSelection,
};
use rand::Rng;
use rand::seq::IndexedRandom;
use rand_chacha::ChaCha8Rng;
use rand_core::{RngCore, SeedableRng};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid grammar: {0}")]
    Grammar(#[from] GrammarError),
    #[error("Seed rejected: {0}")]
    Seed(#[from] ParseError),
    #[error("None of the seed inputs conforms to the grammar")]
    NoValidSeeds,
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Selection failed: {0}")]
    Selection(#[from] SelectionError),
    #[error("Corpus operation failed: {0}")]
    Corpus(#[from] CorpusError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationReason {
    /// All configured iterations ran and the final population was evaluated.
    IterationsExhausted,
    /// `max-failing` distinct failing inputs were found.
    FailureBudgetReached,
    /// The caller's stop condition returned true.
    StopConditionMet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Initialized,
    Evaluate,
    Select,
    Evolve,
    Terminated(TerminationReason),
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Initialized => f.write_str("INITIALIZED"),
            EngineState::Evaluate => f.write_str("EVALUATE"),
            EngineState::Select => f.write_str("SELECT"),
            EngineState::Evolve => f.write_str("EVOLVE"),
            EngineState::Terminated(reason) => write!(f, "TERMINATED ({reason:?})"),
        }
    }
}

/// Counters describing the run so far, refreshed after every evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FuzzStats {
    /// Index of the generation evaluated last; seeds are generation 0.
    pub generation: usize,
    /// Executor invocations.
    pub executions: usize,
    /// Inputs whose verdict was reused from the corpus.
    pub cache_hits: usize,
    pub corpus_size: usize,
    pub failing: usize,
    pub undefined: usize,
    pub population_size: usize,
    pub best_fitness: f64,
    pub mean_fitness: f64,
}

type StopCondition = Box<dyn FnMut(&FuzzStats) -> bool + Send>;

/// Evolutionary grammar-based fuzzer.
///
/// ```no_run
/// use evogfuzz_core::{EvoGFuzz, Grammar, OracleResult};
///
/// let grammar = Grammar::new(
///     "<start>",
///     vec![("<start>", vec!["<digit>", "-<digit>"]), ("<digit>", vec!["1", "2"])],
/// )?;
/// let oracle = |input: &str| {
///     if input.starts_with('-') { OracleResult::Failing } else { OracleResult::Passing }
/// };
/// let mut fuzzer = EvoGFuzz::new(grammar, oracle, ["1"])?;
/// let failing = fuzzer.fuzz()?;
/// println!("{} failing of {} inputs", failing.len(), fuzzer.get_all_inputs().len());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct EvoGFuzz<R: RngCore = ChaCha8Rng> {
    grammar: Grammar,
    settings: FuzzerSettings,
    executor: Box<dyn Executor>,
    fitness: Box<dyn FitnessFunction>,
    selection: Box<dyn Selection>,
    mutator: Box<dyn Mutator>,
    crossover: Box<dyn Crossover>,
    stop_condition: Option<StopCondition>,
    rng: R,

    state: EngineState,
    iteration: usize,
    population: Vec<Input>,
    parents: Vec<usize>,
    corpus: InMemoryCorpus,
    failing: Vec<usize>,
    bug_reports: Vec<BugReport>,
    learned: ProbabilisticGrammar,
    stats: FuzzStats,
}

impl EvoGFuzz<ChaCha8Rng> {
    /// Creates an engine with default settings that runs `oracle` in process.
    pub fn new<O, I, S>(grammar: Grammar, oracle: O, inputs: I) -> Result<Self, EngineError>
    where
        O: Oracle + 'static,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::with_config(grammar, oracle, inputs, FuzzerSettings::default())
    }

    pub fn with_config<O, I, S>(
        grammar: Grammar,
        oracle: O,
        inputs: I,
        settings: FuzzerSettings,
    ) -> Result<Self, EngineError>
    where
        O: Oracle + 'static,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut executor = InProcessExecutor::new(oracle);
        if let Some(timeout) = settings.oracle_timeout() {
            executor = executor.with_timeout(timeout);
        }
        Self::from_executor(grammar, executor, inputs, settings)
    }

    /// Creates an engine around an arbitrary execution boundary, such as a
    /// [`crate::CommandExecutor`] driving an external program.
    pub fn from_executor<E, I, S>(
        grammar: Grammar,
        executor: E,
        inputs: I,
        settings: FuzzerSettings,
    ) -> Result<Self, EngineError>
    where
        E: Executor + 'static,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        settings.validate()?;
        let population = parse_seeds(&grammar, inputs, settings.invalid_seed_policy)?;
        let rng = ChaCha8Rng::seed_from_u64(settings.seed);
        let learned = ProbabilisticGrammar::uniform(&grammar);

        let fitness: Box<dyn FitnessFunction> = match settings.fitness {
            FitnessKind::Failure => Box::new(FailureFitness),
            FitnessKind::Length => Box::new(LengthFitness::default()),
        };
        let selection: Box<dyn Selection> = match settings.selection {
            SelectionKind::Tournament => Box::new(TournamentSelection::new(settings.tournament_size)),
            SelectionKind::FitnessProportional => Box::new(FitnessProportionalSelection),
            SelectionKind::Truncation => Box::new(TruncationSelection),
        };

        Ok(Self {
            grammar,
            settings,
            executor: Box::new(executor),
            fitness,
            selection,
            mutator: Box::new(SubtreeMutator::new()),
            crossover: Box::new(SubtreeCrossover::new()),
            stop_condition: None,
            rng,
            state: EngineState::Initialized,
            iteration: 0,
            population,
            parents: Vec::new(),
            corpus: InMemoryCorpus::new(),
            failing: Vec::new(),
            bug_reports: Vec::new(),
            learned,
            stats: FuzzStats::default(),
        })
    }

    /// Builds an engine from a loaded configuration file: the grammar is read
    /// from `grammar.path`, seeds from `seeds.inputs` followed by the files
    /// under `seeds.paths`, and `extra_seeds` are appended last.
    pub fn from_config<E: Executor + 'static>(
        config: &EvoGFuzzConfig,
        executor: E,
        extra_seeds: &[String],
    ) -> Result<Self, EngineError> {
        let path = config
            .grammar
            .path
            .as_deref()
            .ok_or(ConfigError::MissingGrammarPath)?;
        let grammar = Grammar::load_from_file(path, &config.grammar.start_symbol)?;

        let mut seeds = config.seeds.inputs.clone();
        seeds.extend(load_seed_files(&config.seeds.paths)?);
        seeds.extend_from_slice(extra_seeds);

        Self::from_executor(grammar, executor, seeds, config.fuzzer.clone())
    }
}

impl<R: RngCore> EvoGFuzz<R> {
    pub fn with_fitness_function<F: FitnessFunction + 'static>(mut self, fitness: F) -> Self {
        self.fitness = Box::new(fitness);
        self
    }

    pub fn with_executor<E: Executor + 'static>(mut self, executor: E) -> Self {
        self.executor = Box::new(executor);
        self
    }

    pub fn with_selection<S: Selection + 'static>(mut self, selection: S) -> Self {
        self.selection = Box::new(selection);
        self
    }

    pub fn with_mutator<M: Mutator + 'static>(mut self, mutator: M) -> Self {
        self.mutator = Box::new(mutator);
        self
    }

    pub fn with_crossover<C: Crossover + 'static>(mut self, crossover: C) -> Self {
        self.crossover = Box::new(crossover);
        self
    }

    /// Stops the run early once `condition` returns true. It is consulted
    /// after every evaluation.
    pub fn with_stop_condition<F>(mut self, condition: F) -> Self
    where
        F: FnMut(&FuzzStats) -> bool + Send + 'static,
    {
        self.stop_condition = Some(Box::new(condition));
        self
    }

    /// Replaces the random source. Must be called before the first step.
    pub fn with_rng<R2: RngCore>(self, rng: R2) -> EvoGFuzz<R2> {
        EvoGFuzz {
            grammar: self.grammar,
            settings: self.settings,
            executor: self.executor,
            fitness: self.fitness,
            selection: self.selection,
            mutator: self.mutator,
            crossover: self.crossover,
            stop_condition: self.stop_condition,
            rng,
            state: self.state,
            iteration: self.iteration,
            population: self.population,
            parents: self.parents,
            corpus: self.corpus,
            failing: self.failing,
            bug_reports: self.bug_reports,
            learned: self.learned,
            stats: self.stats,
        }
    }

    /// Runs the loop to termination and returns the distinct failing inputs
    /// in discovery order. Once terminated, further calls return the same
    /// inputs without running again.
    pub fn fuzz(&mut self) -> Result<Vec<Input>, EngineError> {
        if !self.is_terminated() {
            info!(
                iterations = self.settings.iterations,
                population_size = self.settings.population_size,
                seeds = self.population.len(),
                selection = self.selection.name(),
                "Starting evolutionary grammar fuzzing"
            );
            while !self.is_terminated() {
                self.step()?;
            }
            info!(
                state = %self.state,
                inputs = self.corpus.len(),
                failing = self.failing.len(),
                executions = self.stats.executions,
                "Fuzzing finished"
            );
        }
        Ok(self.failing_inputs())
    }

    /// Performs one state transition and returns the new state.
    pub fn step(&mut self) -> Result<EngineState, EngineError> {
        let next = match self.state {
            EngineState::Initialized => EngineState::Evaluate,
            EngineState::Evaluate => {
                self.evaluate()?;
                match self.termination_reason() {
                    Some(reason) => EngineState::Terminated(reason),
                    None => EngineState::Select,
                }
            }
            EngineState::Select => {
                self.parents = self.selection.select(
                    &self.population,
                    self.settings.parent_count,
                    &mut self.rng,
                )?;
                EngineState::Evolve
            }
            EngineState::Evolve => {
                self.evolve();
                self.iteration += 1;
                EngineState::Evaluate
            }
            EngineState::Terminated(reason) => EngineState::Terminated(reason),
        };
        debug!(from = %self.state, to = %next, iteration = self.iteration, "State transition");
        self.state = next;
        Ok(next)
    }

    fn is_terminated(&self) -> bool {
        matches!(self.state, EngineState::Terminated(_))
    }

    fn evaluate(&mut self) -> Result<(), EngineError> {
        let generation = self.iteration;
        let mut population = std::mem::take(&mut self.population);

        for input in population.iter_mut() {
            if let Some(known) = self.corpus.find(input.as_str()).and_then(|id| self.corpus.get(id)) {
                input.set_oracle(known.oracle().unwrap_or(OracleResult::Undefined));
                input.set_fitness(known.fitness());
                self.stats.cache_hits += 1;
                continue;
            }

            let status = self.executor.execute(input.as_str());
            self.stats.executions += 1;
            let verdict = status.verdict();
            match &status {
                ExecutionStatus::Completed(_) => {}
                ExecutionStatus::Timeout => warn!(input = input.as_str(), "Execution timed out"),
                ExecutionStatus::Crash(msg) | ExecutionStatus::Other(msg) => {
                    warn!(input = input.as_str(), reason = %msg, "Execution did not complete")
                }
            }
            if verdict == OracleResult::Undefined {
                self.stats.undefined += 1;
            }
            input.set_oracle(verdict);

            let fitness = self.fitness.evaluate(input);
            let fitness = if fitness.is_finite() {
                fitness
            } else {
                warn!(input = input.as_str(), fitness, "Non-finite fitness recorded as 0.0");
                0.0
            };
            input.set_fitness(fitness);

            let (id, inserted) = self.corpus.add(input.clone())?;
            if inserted && verdict == OracleResult::Failing {
                debug!(input = input.as_str(), generation, "New failing input");
                self.failing.push(id);
                self.bug_reports.push(BugReport::new(
                    input.as_str(),
                    format!("{status:?}"),
                    generation,
                ));
            }
        }

        self.population = population;
        self.refresh_stats(generation);
        debug!(stats = ?self.stats, "Generation evaluated");
        Ok(())
    }

    fn refresh_stats(&mut self, generation: usize) {
        let fitness: Vec<f64> = self.population.iter().map(Input::fitness).collect();
        self.stats.generation = generation;
        self.stats.corpus_size = self.corpus.len();
        self.stats.failing = self.failing.len();
        self.stats.population_size = self.population.len();
        self.stats.best_fitness = fitness.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        self.stats.mean_fitness = if fitness.is_empty() {
            0.0
        } else {
            fitness.iter().sum::<f64>() / fitness.len() as f64
        };
    }

    fn termination_reason(&mut self) -> Option<TerminationReason> {
        if self
            .settings
            .max_failing
            .is_some_and(|budget| self.failing.len() >= budget)
        {
            return Some(TerminationReason::FailureBudgetReached);
        }
        if let Some(condition) = self.stop_condition.as_mut() {
            if condition(&self.stats) {
                return Some(TerminationReason::StopConditionMet);
            }
        }
        (self.iteration >= self.settings.iterations).then_some(TerminationReason::IterationsExhausted)
    }

    fn evolve(&mut self) {
        let Self {
            grammar,
            settings,
            mutator,
            crossover,
            rng,
            population,
            parents,
            learned,
            iteration,
            ..
        } = self;
        let (grammar, settings) = (&*grammar, &*settings);

        let parent_inputs: Vec<&Input> = parents.iter().filter_map(|&i| population.get(i)).collect();
        *learned = ProbabilisticGrammar::mine(
            grammar,
            parent_inputs.iter().map(|input| input.tree()),
            settings.probability_smoothing,
        );
        let generator = GrammarGenerator::new(grammar, settings.max_depth).with_probabilities(learned);
        let generation = *iteration + 1;

        let children: Vec<Input> = (0..settings.population_size)
            .map(|_| {
                breed(
                    &generator,
                    &parent_inputs,
                    settings,
                    mutator.as_mut(),
                    crossover.as_mut(),
                    &mut *rng,
                    generation,
                )
            })
            .collect();

        debug!(
            generation,
            parents = parent_inputs.len(),
            children = children.len(),
            "Bred next generation"
        );
        *population = children;
        parents.clear();
    }

    /// Distinct failing inputs in discovery order.
    pub fn failing_inputs(&self) -> Vec<Input> {
        self.failing
            .iter()
            .filter_map(|&id| self.corpus.get(id))
            .cloned()
            .collect()
    }

    /// Every evaluated input in discovery order, deduplicated by rendering.
    pub fn get_all_inputs(&self) -> &[Input] {
        self.corpus.inputs()
    }

    pub fn corpus(&self) -> &InMemoryCorpus {
        &self.corpus
    }

    /// Corpus indices of the failing inputs.
    pub fn failing_ids(&self) -> &[usize] {
        &self.failing
    }

    pub fn bug_reports(&self) -> &[BugReport] {
        &self.bug_reports
    }

    pub fn stats(&self) -> &FuzzStats {
        &self.stats
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// The current population, evaluated or freshly bred depending on state.
    pub fn population(&self) -> &[Input] {
        &self.population
    }

    /// The probabilistic grammar mined from the most recent parents.
    pub fn learned_grammar(&self) -> &ProbabilisticGrammar {
        &self.learned
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    pub fn settings(&self) -> &FuzzerSettings {
        &self.settings
    }
}

fn parse_seeds<I, S>(
    grammar: &Grammar,
    inputs: I,
    policy: InvalidSeedPolicy,
) -> Result<Vec<Input>, EngineError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let parser = EarleyParser::new(grammar);
    let mut seeds = Vec::new();
    for raw in inputs {
        match parser.parse(raw.as_ref()) {
            Ok(tree) => seeds.push(Input::new(tree, Origin::Seed, 0)),
            Err(e) => match policy {
                InvalidSeedPolicy::Skip => warn!(error = %e, "Skipping seed"),
                InvalidSeedPolicy::Reject => return Err(EngineError::Seed(e)),
            },
        }
    }
    if seeds.is_empty() {
        return Err(EngineError::NoValidSeeds);
    }
    Ok(seeds)
}

fn breed(
    generator: &GrammarGenerator<'_>,
    parents: &[&Input],
    settings: &FuzzerSettings,
    mutator: &mut dyn Mutator,
    crossover: &mut dyn Crossover,
    rng: &mut dyn RngCore,
    generation: usize,
) -> Input {
    let first = match parents.choose(&mut *rng) {
        Some(parent) if !rng.random_bool(settings.generation_ratio) => *parent,
        _ => return Input::new(generator.generate(&mut *rng), Origin::Generated, generation),
    };

    let mut tree = None;
    if rng.random_bool(settings.crossover_probability) {
        if let Some(&second) = parents.choose(&mut *rng) {
            tree = crossover.crossover(first.tree(), second.tree(), &mut *rng);
        }
    }
    let crossed = tree.is_some();

    if !crossed || rng.random_bool(settings.mutation_probability) {
        let base = tree.as_ref().unwrap_or(first.tree());
        if let Some(mutated) = mutator.mutate(base, generator, &mut *rng) {
            tree = Some(mutated);
        }
    }

    let origin = if crossed { Origin::Crossover } else { Origin::Mutation };
    let tree = tree.unwrap_or_else(|| first.tree().clone());
    Input::new(tree, origin, generation)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign_grammar() -> Grammar {
        Grammar::new(
            "<start>",
            vec![
                ("<start>", vec!["<sign><digit>"]),
                ("<sign>", vec!["", "-", "+"]),
                ("<digit>", vec!["0", "1", "2", "3"]),
            ],
        )
        .unwrap()
    }

    fn negative_is_failing(input: &str) -> OracleResult {
        if input.starts_with('-') {
            OracleResult::Failing
        } else {
            OracleResult::Passing
        }
    }

    fn small_settings() -> FuzzerSettings {
        FuzzerSettings {
            iterations: 3,
            population_size: 20,
            parent_count: 5,
            ..FuzzerSettings::default()
        }
    }

    #[test]
    fn construction_rejects_when_no_seed_parses() {
        let result = EvoGFuzz::new(sign_grammar(), negative_is_failing, ["x", "12"]);
        assert!(matches!(result, Err(EngineError::NoValidSeeds)));
    }

    #[test]
    fn reject_policy_surfaces_parse_error() {
        let settings = FuzzerSettings {
            invalid_seed_policy: InvalidSeedPolicy::Reject,
            ..small_settings()
        };
        let result = EvoGFuzz::with_config(sign_grammar(), negative_is_failing, ["1", "x"], settings);
        assert!(matches!(result, Err(EngineError::Seed(_))));
    }

    #[test]
    fn long_right_recursive_seed_is_accepted() {
        let grammar = Grammar::new(
            "<start>",
            vec![
                ("<start>", vec!["<digits>"]),
                ("<digits>", vec!["<digit><digits>", "<digit>"]),
                ("<digit>", vec!["0", "1"]),
            ],
        )
        .unwrap();
        let seed = "1".repeat(3000);
        let settings = FuzzerSettings {
            iterations: 1,
            population_size: 5,
            parent_count: 2,
            ..FuzzerSettings::default()
        };
        let mut fuzzer = EvoGFuzz::with_config(
            grammar,
            |input: &str| {
                if input.contains('0') {
                    OracleResult::Failing
                } else {
                    OracleResult::Passing
                }
            },
            [seed.as_str()],
            settings,
        )
        .unwrap();
        assert_eq!(fuzzer.population()[0].as_str(), seed);

        fuzzer.fuzz().unwrap();
        assert_eq!(fuzzer.get_all_inputs()[0].as_str(), seed);
        assert_eq!(fuzzer.get_all_inputs()[0].oracle(), Some(OracleResult::Passing));
    }

    #[test]
    fn skip_policy_keeps_valid_seeds() {
        let fuzzer =
            EvoGFuzz::with_config(sign_grammar(), negative_is_failing, ["1", "x", "+2"], small_settings()).unwrap();
        assert_eq!(fuzzer.population().len(), 2);
        assert_eq!(fuzzer.state(), EngineState::Initialized);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let settings = FuzzerSettings {
            generation_ratio: -0.1,
            ..small_settings()
        };
        let result = EvoGFuzz::with_config(sign_grammar(), negative_is_failing, ["1"], settings);
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn state_machine_visits_states_in_order() {
        let mut fuzzer =
            EvoGFuzz::with_config(sign_grammar(), negative_is_failing, ["1"], FuzzerSettings {
                iterations: 1,
                ..small_settings()
            })
            .unwrap();

        let mut states = Vec::new();
        while !matches!(fuzzer.state(), EngineState::Terminated(_)) {
            states.push(fuzzer.step().unwrap());
        }
        assert_eq!(
            states,
            vec![
                EngineState::Evaluate,
                EngineState::Select,
                EngineState::Evolve,
                EngineState::Evaluate,
                EngineState::Terminated(TerminationReason::IterationsExhausted),
            ]
        );
        assert_eq!(fuzzer.stats().generation, 1);
    }

    #[test]
    fn fuzz_finds_negative_numbers_and_is_idempotent() {
        let mut fuzzer =
            EvoGFuzz::with_config(sign_grammar(), negative_is_failing, ["1"], small_settings()).unwrap();
        let failing = fuzzer.fuzz().unwrap();
        assert!(!failing.is_empty());
        assert!(failing.iter().all(|input| input.as_str().starts_with('-')));
        assert!(failing.iter().all(|input| input.fitness() == 1.0));
        assert_eq!(fuzzer.bug_reports().len(), failing.len());

        let executions = fuzzer.stats().executions;
        let again = fuzzer.fuzz().unwrap();
        assert_eq!(
            again.iter().map(Input::as_str).collect::<Vec<_>>(),
            failing.iter().map(Input::as_str).collect::<Vec<_>>()
        );
        assert_eq!(fuzzer.stats().executions, executions);
    }

    #[test]
    fn known_inputs_are_not_executed_twice() {
        let mut fuzzer =
            EvoGFuzz::with_config(sign_grammar(), negative_is_failing, ["1"], small_settings()).unwrap();
        fuzzer.fuzz().unwrap();
        let stats = fuzzer.stats();
        // The grammar only has 12 distinct sentences.
        assert!(fuzzer.get_all_inputs().len() <= 12);
        assert_eq!(stats.executions, fuzzer.get_all_inputs().len());
        assert!(stats.cache_hits > 0);
    }

    #[test]
    fn failure_budget_stops_early() {
        let settings = FuzzerSettings {
            iterations: 50,
            max_failing: Some(1),
            ..small_settings()
        };
        let mut fuzzer = EvoGFuzz::with_config(sign_grammar(), negative_is_failing, ["-1"], settings).unwrap();
        let failing = fuzzer.fuzz().unwrap();
        assert_eq!(failing.len(), 1);
        assert_eq!(
            fuzzer.state(),
            EngineState::Terminated(TerminationReason::FailureBudgetReached)
        );
        assert_eq!(fuzzer.stats().generation, 0);
    }

    #[test]
    fn stop_condition_is_honored() {
        let mut fuzzer = EvoGFuzz::with_config(sign_grammar(), negative_is_failing, ["1"], small_settings())
            .unwrap()
            .with_stop_condition(|stats: &FuzzStats| stats.generation >= 1);
        fuzzer.fuzz().unwrap();
        assert_eq!(
            fuzzer.state(),
            EngineState::Terminated(TerminationReason::StopConditionMet)
        );
        assert_eq!(fuzzer.stats().generation, 1);
    }

    #[test]
    fn panicking_oracle_yields_undefined() {
        let oracle = |input: &str| -> OracleResult {
            if input.starts_with('+') {
                panic!("cannot handle plus");
            }
            OracleResult::Passing
        };
        let mut fuzzer = EvoGFuzz::with_config(sign_grammar(), oracle, ["+1", "2"], small_settings()).unwrap();
        let failing = fuzzer.fuzz().unwrap();
        assert!(failing.is_empty());
        let plus = fuzzer
            .get_all_inputs()
            .iter()
            .find(|input| input.as_str() == "+1")
            .unwrap();
        assert_eq!(plus.oracle(), Some(OracleResult::Undefined));
        assert!(fuzzer.stats().undefined >= 1);
    }

    #[test]
    fn non_finite_fitness_is_sanitized() {
        let mut fuzzer = EvoGFuzz::with_config(sign_grammar(), negative_is_failing, ["1"], small_settings())
            .unwrap()
            .with_fitness_function(|_: &Input| f64::NAN);
        fuzzer.fuzz().unwrap();
        assert!(fuzzer.get_all_inputs().iter().all(|input| input.fitness() == 0.0));
    }

    #[test]
    fn custom_rng_is_used() {
        let mut a = EvoGFuzz::with_config(sign_grammar(), negative_is_failing, ["1"], small_settings())
            .unwrap()
            .with_rng(ChaCha8Rng::seed_from_u64(99));
        let mut b = EvoGFuzz::with_config(sign_grammar(), negative_is_failing, ["1"], small_settings())
            .unwrap()
            .with_rng(ChaCha8Rng::seed_from_u64(99));
        a.fuzz().unwrap();
        b.fuzz().unwrap();
        let render = |inputs: &[Input]| inputs.iter().map(|i| i.to_string()).collect::<Vec<_>>();
        assert_eq!(render(a.get_all_inputs()), render(b.get_all_inputs()));
    }
}
