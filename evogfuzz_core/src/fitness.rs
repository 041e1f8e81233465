use crate::input::Input;
use crate::oracle::OracleResult;

/// Scores an evaluated input. Higher is fitter.
///
/// Called after the oracle verdict has been recorded on the input, so
/// implementations may inspect [`Input::oracle`]. Any `Fn(&Input) -> f64`
/// closure is a fitness function.
pub trait FitnessFunction: Send + Sync {
    fn evaluate(&self, input: &Input) -> f64;
}

impl<F> FitnessFunction for F
where
    F: Fn(&Input) -> f64 + Send + Sync,
{
    fn evaluate(&self, input: &Input) -> f64 {
        self(input)
    }
}

/// 1.0 for failing inputs, 0.0 for everything else.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailureFitness;

impl FitnessFunction for FailureFitness {
    fn evaluate(&self, input: &Input) -> f64 {
        match input.oracle() {
            Some(OracleResult::Failing) => 1.0,
            _ => 0.0,
        }
    }
}

/// Rewards long inputs, with a bonus of `failing_bonus` for failing ones.
#[derive(Debug, Clone, Copy)]
pub struct LengthFitness {
    pub failing_bonus: f64,
}

impl Default for LengthFitness {
    fn default() -> Self {
        Self {
            failing_bonus: 100.0,
        }
    }
}

impl FitnessFunction for LengthFitness {
    fn evaluate(&self, input: &Input) -> f64 {
        let bonus = if input.is_failing() { self.failing_bonus } else { 0.0 };
        input.len() as f64 + bonus
    }
}
