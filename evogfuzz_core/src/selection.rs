use crate::input::Input;
use rand::Rng;
use rand::seq::IndexedRandom;
use rand_core::RngCore;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    /// There is nothing to select from.
    #[error("Population is empty, cannot select parents")]
    PopulationEmpty,
}

/// A `Selection` strategy picks the parents of the next generation from the
/// evaluated population.
///
/// Implementations return indices into `population`; the same index may be
/// returned more than once. Fitter inputs should be favored, but the exact
/// pressure is up to the strategy.
pub trait Selection: Send {
    fn name(&self) -> &'static str;

    /// Selects `count` parent indices.
    ///
    /// Returns `Err(SelectionError::PopulationEmpty)` if `population` is empty.
    fn select(
        &mut self,
        population: &[Input],
        count: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<usize>, SelectionError>;
}

/// Draws `size` contestants uniformly (with replacement) and keeps the fittest.
/// Ties go to the contestant with the lower index.
#[derive(Debug, Clone, Copy)]
pub struct TournamentSelection {
    size: usize,
}

impl TournamentSelection {
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl Default for TournamentSelection {
    fn default() -> Self {
        Self::new(3)
    }
}

impl Selection for TournamentSelection {
    fn name(&self) -> &'static str {
        "TournamentSelection"
    }

    fn select(
        &mut self,
        population: &[Input],
        count: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<usize>, SelectionError> {
        if population.is_empty() {
            return Err(SelectionError::PopulationEmpty);
        }
        let winners = (0..count)
            .map(|_| {
                let mut best = rng.random_range(0..population.len());
                for _ in 1..self.size {
                    let contender = rng.random_range(0..population.len());
                    let (b, c) = (population[best].fitness(), population[contender].fitness());
                    if c > b || (c == b && contender < best) {
                        best = contender;
                    }
                }
                best
            })
            .collect();
        Ok(winners)
    }
}

/// Roulette-wheel selection. Fitness values are shifted so the least fit
/// input has weight zero; a population of equal fitness is sampled uniformly.
#[derive(Debug, Default, Clone, Copy)]
pub struct FitnessProportionalSelection;

impl Selection for FitnessProportionalSelection {
    fn name(&self) -> &'static str {
        "FitnessProportionalSelection"
    }

    fn select(
        &mut self,
        population: &[Input],
        count: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<usize>, SelectionError> {
        if population.is_empty() {
            return Err(SelectionError::PopulationEmpty);
        }
        let min = population
            .iter()
            .map(Input::fitness)
            .fold(f64::INFINITY, f64::min);
        let indices: Vec<usize> = (0..population.len()).collect();

        let selected = (0..count)
            .map(|_| {
                indices
                    .choose_weighted(&mut *rng, |&i| population[i].fitness() - min)
                    .ok()
                    .copied()
                    .unwrap_or_else(|| rng.random_range(0..population.len()))
            })
            .collect();
        Ok(selected)
    }
}

/// Deterministically keeps the `count` fittest inputs, cycling through them
/// when `count` exceeds the population size.
#[derive(Debug, Default, Clone, Copy)]
pub struct TruncationSelection;

impl Selection for TruncationSelection {
    fn name(&self) -> &'static str {
        "TruncationSelection"
    }

    fn select(
        &mut self,
        population: &[Input],
        count: usize,
        _rng: &mut dyn RngCore,
    ) -> Result<Vec<usize>, SelectionError> {
        if population.is_empty() {
            return Err(SelectionError::PopulationEmpty);
        }
        let mut ranked: Vec<usize> = (0..population.len()).collect();
        // Stable sort keeps discovery order among equally fit inputs.
        ranked.sort_by(|&a, &b| population[b].fitness().total_cmp(&population[a].fitness()));
        Ok(ranked.into_iter().cycle().take(count).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::Grammar;
    use crate::input::Origin;
    use crate::parser::EarleyParser;
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;
    use std::collections::HashSet;

    fn population(fitness: &[f64]) -> Vec<Input> {
        let grammar = Grammar::new("<start>", vec![("<start>", vec!["x"])]).unwrap();
        let parser = EarleyParser::new(&grammar);
        fitness
            .iter()
            .map(|&f| {
                let mut input = Input::new(parser.parse("x").unwrap(), Origin::Seed, 0);
                input.set_fitness(f);
                input
            })
            .collect()
    }

    #[test]
    fn every_strategy_rejects_empty_population() {
        let mut rng = ChaCha8Rng::from_seed([0; 32]);
        let strategies: Vec<Box<dyn Selection>> = vec![
            Box::new(TournamentSelection::default()),
            Box::new(FitnessProportionalSelection),
            Box::new(TruncationSelection),
        ];
        for mut strategy in strategies {
            assert_eq!(
                strategy.select(&[], 3, &mut rng),
                Err(SelectionError::PopulationEmpty),
                "{}",
                strategy.name()
            );
        }
    }

    #[test]
    fn tournament_favors_fitter_inputs() {
        let pop = population(&[0.0, 0.0, 0.0, 1.0]);
        let mut rng = ChaCha8Rng::from_seed([1; 32]);
        let mut selection = TournamentSelection::new(3);
        let picked = selection.select(&pop, 400, &mut rng).unwrap();
        let fittest = picked.iter().filter(|&&i| i == 3).count();
        // Probability of index 3 winning a 3-way tournament is 1 - (3/4)^3 ≈ 0.58.
        assert!(fittest > 160, "fittest picked only {fittest} times");
        assert!(picked.iter().all(|&i| i < pop.len()));
    }

    #[test]
    fn tournament_of_size_one_is_uniform() {
        let pop = population(&[5.0, 0.0, 0.0, 0.0]);
        let mut rng = ChaCha8Rng::from_seed([2; 32]);
        let mut selection = TournamentSelection::new(1);
        let picked: HashSet<usize> = selection.select(&pop, 200, &mut rng).unwrap().into_iter().collect();
        assert_eq!(picked.len(), 4);
    }

    #[test]
    fn fitness_proportional_never_picks_the_minimum_when_others_are_fitter() {
        let pop = population(&[-1.0, 2.0, 4.0]);
        let mut rng = ChaCha8Rng::from_seed([3; 32]);
        let mut selection = FitnessProportionalSelection;
        let picked = selection.select(&pop, 200, &mut rng).unwrap();
        assert!(!picked.contains(&0));
        assert!(picked.contains(&1) && picked.contains(&2));
    }

    #[test]
    fn fitness_proportional_with_equal_fitness_still_selects() {
        let pop = population(&[0.0, 0.0]);
        let mut rng = ChaCha8Rng::from_seed([4; 32]);
        let picked = FitnessProportionalSelection.select(&pop, 10, &mut rng).unwrap();
        assert_eq!(picked.len(), 10);
    }

    #[test]
    fn truncation_keeps_the_fittest_in_order() {
        let pop = population(&[0.5, 3.0, 1.0, 3.0]);
        let mut rng = ChaCha8Rng::from_seed([5; 32]);
        let picked = TruncationSelection.select(&pop, 5, &mut rng).unwrap();
        assert_eq!(picked, vec![1, 3, 2, 0, 1]);
    }
}
