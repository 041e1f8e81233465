use crate::corpus::input_hash;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;

/// Classification of one execution of the program under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OracleResult {
    /// The program behaved as expected.
    Passing,
    /// The input triggered the behavior the oracle is looking for.
    Failing,
    /// The oracle could not classify the run: it panicked, timed out, or the
    /// program failed in a way the oracle does not count as the target bug.
    Undefined,
}

impl fmt::Display for OracleResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OracleResult::Passing => "PASSING",
            OracleResult::Failing => "FAILING",
            OracleResult::Undefined => "UNDEFINED",
        };
        f.write_str(label)
    }
}

/// An `Oracle` runs the program under test on a rendered input and decides
/// whether the input exposes a bug.
///
/// Any `Fn(&str) -> OracleResult` closure is an oracle.
pub trait Oracle: Send + Sync {
    fn examine(&self, input: &str) -> OracleResult;
}

impl<F> Oracle for F
where
    F: Fn(&str) -> OracleResult + Send + Sync,
{
    fn examine(&self, input: &str) -> OracleResult {
        self(input)
    }
}

/// Oracle over a fallible harness.
///
/// `Ok` is passing. An error is failing when `is_bug` accepts it and
/// undefined otherwise, so unrelated errors never pollute the failing set.
pub struct ErrorOracle<H, P, T, E> {
    harness: H,
    is_bug: P,
    _marker: PhantomData<fn() -> (T, E)>,
}

impl<H, P, T, E> ErrorOracle<H, P, T, E>
where
    H: Fn(&str) -> Result<T, E>,
    P: Fn(&E) -> bool,
{
    pub fn new(harness: H, is_bug: P) -> Self {
        Self {
            harness,
            is_bug,
            _marker: PhantomData,
        }
    }
}

impl<H, P, T, E> Oracle for ErrorOracle<H, P, T, E>
where
    H: Fn(&str) -> Result<T, E> + Send + Sync,
    P: Fn(&E) -> bool + Send + Sync,
{
    fn examine(&self, input: &str) -> OracleResult {
        match (self.harness)(input) {
            Ok(_) => OracleResult::Passing,
            Err(e) if (self.is_bug)(&e) => OracleResult::Failing,
            Err(_) => OracleResult::Undefined,
        }
    }
}

/// A failing input as reported at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BugReport {
    /// The rendered input that triggered the failure.
    pub input: String,
    pub description: String,
    /// MD5 hex digest of the input, used for deduplication and file names.
    pub input_hash: String,
    /// Iteration in which the input was first evaluated.
    pub iteration: usize,
}

impl BugReport {
    pub fn new(input: &str, description: String, iteration: usize) -> Self {
        Self {
            input: input.to_string(),
            description,
            input_hash: input_hash(input),
            iteration,
        }
    }
}
