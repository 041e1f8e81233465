use crate::grammar::{Grammar, Symbol};
use crate::probabilistic::ProbabilisticGrammar;
use crate::tree::{DerivationTree, NodeId};
use rand::Rng;
use rand::seq::IndexedRandom;

/// Default depth after which expansion switches to the cheapest alternatives.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Produces random derivation trees from a grammar.
///
/// Below `max_depth` an alternative is drawn according to the attached
/// [`ProbabilisticGrammar`] (uniformly if none is attached). From `max_depth`
/// on, only alternatives of minimal cost are eligible; each of those strictly
/// lowers the remaining minimum depth, so every expansion terminates.
#[derive(Debug, Clone, Copy)]
pub struct GrammarGenerator<'g> {
    grammar: &'g Grammar,
    probabilities: Option<&'g ProbabilisticGrammar>,
    max_depth: usize,
}

impl<'g> GrammarGenerator<'g> {
    pub fn new(grammar: &'g Grammar, max_depth: usize) -> Self {
        Self {
            grammar,
            probabilities: None,
            max_depth,
        }
    }

    pub fn with_probabilities(mut self, probabilities: &'g ProbabilisticGrammar) -> Self {
        self.probabilities = Some(probabilities);
        self
    }

    pub fn grammar(&self) -> &'g Grammar {
        self.grammar
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Generates a complete tree from the start symbol.
    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> DerivationTree {
        self.generate_from(self.grammar.start_symbol(), rng)
    }

    /// Generates a complete tree rooted at `nonterminal`.
    pub fn generate_from<R: Rng + ?Sized>(&self, nonterminal: &str, rng: &mut R) -> DerivationTree {
        let mut tree = DerivationTree::new(Symbol::Nonterminal(nonterminal.to_string()));
        let root = tree.root();
        self.expand(&mut tree, root, rng);
        tree
    }

    fn expand<R: Rng + ?Sized>(&self, tree: &mut DerivationTree, root: NodeId, rng: &mut R) {
        let mut pending = vec![(root, 0usize)];
        while let Some((id, depth)) = pending.pop() {
            let name = match tree.node(id).map(|node| &node.symbol) {
                Some(Symbol::Nonterminal(name)) => name.clone(),
                _ => continue,
            };
            let Some(alternatives) = self.grammar.alternatives(&name) else {
                continue;
            };
            let alt = self.choose_alternative(&name, depth, rng);
            tree.set_expansion(id, alt);
            for symbol in alternatives[alt].symbols() {
                let child = tree.add_child(id, symbol.clone());
                if symbol.is_nonterminal() {
                    pending.push((child, depth + 1));
                }
            }
        }
    }

    fn choose_alternative<R: Rng + ?Sized>(&self, nonterminal: &str, depth: usize, rng: &mut R) -> usize {
        let alternatives = self.grammar.alternatives(nonterminal).unwrap_or_default();
        let indices: Vec<usize> = (0..alternatives.len()).collect();

        if depth >= self.max_depth {
            let cheapest = alternatives
                .iter()
                .map(|alt| self.grammar.expansion_cost(alt))
                .min()
                .unwrap_or(0);
            let eligible: Vec<usize> = indices
                .into_iter()
                .filter(|&i| self.grammar.expansion_cost(&alternatives[i]) == cheapest)
                .collect();
            return eligible.choose(rng).copied().unwrap_or(0);
        }

        let weights = self.probabilities.and_then(|p| p.probabilities(nonterminal));
        match weights {
            Some(weights) if weights.len() == indices.len() => indices
                .choose_weighted(rng, |&i| weights[i])
                .ok()
                .copied()
                .unwrap_or_else(|| rng.random_range(0..alternatives.len())),
            _ => indices.choose(rng).copied().unwrap_or(0),
        }
    }
}
