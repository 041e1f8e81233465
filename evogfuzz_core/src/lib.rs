pub mod config;
pub mod corpus;
pub mod engine;
pub mod executor;
pub mod fitness;
pub mod generator;
pub mod grammar;
pub mod input;
pub mod mutator;
pub mod oracle;
pub mod parser;
pub mod probabilistic;
pub mod selection;
pub mod tree;

pub use config::{ConfigError, EvoGFuzzConfig, FuzzerSettings, InvalidSeedPolicy};
pub use corpus::{Corpus, CorpusError, InMemoryCorpus, export_corpus, load_seed_files};
pub use engine::{EngineError, EngineState, EvoGFuzz, FuzzStats, TerminationReason};
pub use executor::{
    CommandExecutor, CommandExecutorConfig, ExecutionStatus, Executor, InProcessExecutor,
    InputDelivery,
};
pub use fitness::{FailureFitness, FitnessFunction, LengthFitness};
pub use generator::GrammarGenerator;
pub use grammar::{Expansion, Grammar, GrammarError, Symbol};
pub use input::{Input, Origin};
pub use mutator::{Crossover, Mutator, SubtreeCrossover, SubtreeMutator};
pub use oracle::{BugReport, ErrorOracle, Oracle, OracleResult};
pub use parser::{EarleyParser, ParseError};
pub use probabilistic::ProbabilisticGrammar;
pub use selection::{
    FitnessProportionalSelection, Selection, SelectionError, TournamentSelection,
    TruncationSelection,
};
pub use tree::{DerivationTree, NodeId, TreeError};
