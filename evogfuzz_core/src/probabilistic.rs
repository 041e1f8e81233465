use crate::grammar::{Grammar, Symbol};
use crate::tree::DerivationTree;
use serde::Serialize;
use std::collections::BTreeMap;

/// Per-alternative expansion probabilities for every nonterminal of a grammar.
///
/// The engine mines one of these from the fittest inputs of each generation
/// and samples part of the next generation from it, which shifts the search
/// towards the shapes that scored well.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbabilisticGrammar {
    probabilities: BTreeMap<String, Vec<f64>>,
}

impl ProbabilisticGrammar {
    pub fn uniform(grammar: &Grammar) -> Self {
        let probabilities = grammar
            .rules()
            .iter()
            .map(|(name, alternatives)| {
                let n = alternatives.len();
                (name.clone(), vec![1.0 / n as f64; n])
            })
            .collect();
        Self { probabilities }
    }

    /// Counts how often each alternative was used in `trees` and normalizes
    /// the counts per nonterminal.
    ///
    /// `smoothing` is added to every count so that alternatives absent from
    /// the sample keep a nonzero probability. Nonterminals that never occur
    /// (with zero smoothing) fall back to a uniform distribution.
    pub fn mine<'a, I>(grammar: &Grammar, trees: I, smoothing: f64) -> Self
    where
        I: IntoIterator<Item = &'a DerivationTree>,
    {
        let smoothing = if smoothing.is_finite() { smoothing.max(0.0) } else { 0.0 };
        let mut counts: BTreeMap<&str, Vec<f64>> = grammar
            .rules()
            .iter()
            .map(|(name, alternatives)| (name.as_str(), vec![smoothing; alternatives.len()]))
            .collect();

        for tree in trees {
            for id in tree.nonterminal_nodes() {
                let Some(node) = tree.node(id) else { continue };
                let (Symbol::Nonterminal(name), Some(alt)) = (&node.symbol, node.expansion) else {
                    continue;
                };
                if let Some(slot) = counts.get_mut(name.as_str()).and_then(|c| c.get_mut(alt)) {
                    *slot += 1.0;
                }
            }
        }

        let probabilities = counts
            .into_iter()
            .map(|(name, counts)| {
                let total: f64 = counts.iter().sum();
                let probs = if total > 0.0 {
                    counts.iter().map(|c| c / total).collect()
                } else {
                    vec![1.0 / counts.len() as f64; counts.len()]
                };
                (name.to_string(), probs)
            })
            .collect();
        Self { probabilities }
    }

    pub fn probabilities(&self, nonterminal: &str) -> Option<&[f64]> {
        self.probabilities.get(nonterminal).map(Vec::as_slice)
    }

    pub fn probability(&self, nonterminal: &str, alternative: usize) -> f64 {
        self.probabilities(nonterminal)
            .and_then(|p| p.get(alternative))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.probabilities
            .iter()
            .map(|(name, probs)| (name.as_str(), probs.as_slice()))
    }
}
