use crate::oracle::OracleResult;
use crate::tree::DerivationTree;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How an input came into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Origin {
    Seed,
    Mutation,
    Crossover,
    Generated,
}

/// A fuzzing input backed by a derivation tree.
///
/// The rendered string is computed once on construction; the tree is never
/// mutated in place afterwards, evolution always produces new inputs.
#[derive(Debug, Clone)]
pub struct Input {
    tree: DerivationTree,
    rendered: String,
    fitness: f64,
    oracle: Option<OracleResult>,
    origin: Origin,
    generation: usize,
}

impl Input {
    pub fn new(tree: DerivationTree, origin: Origin, generation: usize) -> Self {
        let rendered = tree.render();
        Self {
            tree,
            rendered,
            fitness: 0.0,
            oracle: None,
            origin,
            generation,
        }
    }

    pub fn tree(&self) -> &DerivationTree {
        &self.tree
    }

    pub fn as_str(&self) -> &str {
        &self.rendered
    }

    pub fn len(&self) -> usize {
        self.rendered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rendered.is_empty()
    }

    pub fn fitness(&self) -> f64 {
        self.fitness
    }

    pub fn set_fitness(&mut self, fitness: f64) {
        self.fitness = fitness;
    }

    /// The verdict of the last evaluation, `None` until evaluated.
    pub fn oracle(&self) -> Option<OracleResult> {
        self.oracle
    }

    pub fn set_oracle(&mut self, verdict: OracleResult) {
        self.oracle = Some(verdict);
    }

    pub fn is_failing(&self) -> bool {
        self.oracle == Some(OracleResult::Failing)
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn generation(&self) -> usize {
        self.generation
    }
}

impl fmt::Display for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

impl AsRef<str> for Input {
    fn as_ref(&self) -> &str {
        &self.rendered
    }
}

impl From<&Input> for String {
    fn from(input: &Input) -> Self {
        input.rendered.clone()
    }
}
