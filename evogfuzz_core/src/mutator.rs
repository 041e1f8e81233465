use crate::generator::GrammarGenerator;
use crate::grammar::Symbol;
use crate::tree::{DerivationTree, NodeId};
use rand::Rng;
use rand::seq::IndexedRandom;
use rand_core::RngCore;

/// Number of regeneration attempts before `SubtreeMutator` gives up on
/// producing a rendering that differs from the original.
const DEFAULT_MUTATION_ATTEMPTS: usize = 8;

/// A `Mutator` derives a new tree from an existing one.
///
/// Implementations never touch the input tree; they return a modified copy,
/// or `None` if no applicable change exists. Every returned tree must still
/// be a valid derivation under the generator's grammar.
pub trait Mutator: Send {
    fn name(&self) -> &'static str;

    fn mutate(
        &mut self,
        tree: &DerivationTree,
        generator: &GrammarGenerator<'_>,
        rng: &mut dyn RngCore,
    ) -> Option<DerivationTree>;
}

/// Recombines two parent trees into one child.
pub trait Crossover: Send {
    fn name(&self) -> &'static str;

    fn crossover(
        &mut self,
        first: &DerivationTree,
        second: &DerivationTree,
        rng: &mut dyn RngCore,
    ) -> Option<DerivationTree>;
}

/// Replaces a randomly chosen nonterminal subtree with a freshly generated
/// subtree of the same nonterminal.
#[derive(Debug, Clone, Copy)]
pub struct SubtreeMutator {
    attempts: usize,
}

impl SubtreeMutator {
    pub fn new() -> Self {
        Self {
            attempts: DEFAULT_MUTATION_ATTEMPTS,
        }
    }

    pub fn with_attempts(attempts: usize) -> Self {
        Self {
            attempts: attempts.max(1),
        }
    }
}

impl Default for SubtreeMutator {
    fn default() -> Self {
        Self::new()
    }
}

impl Mutator for SubtreeMutator {
    fn name(&self) -> &'static str {
        "SubtreeMutator"
    }

    fn mutate(
        &mut self,
        tree: &DerivationTree,
        generator: &GrammarGenerator<'_>,
        rng: &mut dyn RngCore,
    ) -> Option<DerivationTree> {
        let candidates = tree.nonterminal_nodes();
        let original = tree.render();
        let mut fallback = None;

        for _ in 0..self.attempts {
            let &target = candidates.choose(&mut *rng)?;
            let Some(Symbol::Nonterminal(name)) = tree.node(target).map(|n| &n.symbol) else {
                continue;
            };
            let replacement = generator.generate_from(name, &mut *rng);

            let mut child = tree.clone();
            child.replace_subtree(target, &replacement, replacement.root());
            if child.render() != original {
                return Some(child);
            }
            fallback = Some(child);
        }
        // Grammars with a single derivation for every reachable subtree.
        fallback
    }
}

/// Swaps a non-root subtree of the first parent for a subtree of the second
/// parent rooted at the same nonterminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct SubtreeCrossover;

impl SubtreeCrossover {
    pub fn new() -> Self {
        SubtreeCrossover
    }
}

impl Crossover for SubtreeCrossover {
    fn name(&self) -> &'static str {
        "SubtreeCrossover"
    }

    fn crossover(
        &mut self,
        first: &DerivationTree,
        second: &DerivationTree,
        rng: &mut dyn RngCore,
    ) -> Option<DerivationTree> {
        let pairs: Vec<(NodeId, Vec<NodeId>)> = first
            .nonterminal_nodes()
            .into_iter()
            .filter(|&id| id != first.root())
            .filter_map(|id| {
                let name = first.node(id)?.symbol.as_str();
                let donors = second.nodes_with_symbol(name);
                (!donors.is_empty()).then_some((id, donors))
            })
            .collect();

        let (target, donors) = pairs.choose(&mut *rng)?;
        let donor = donors[rng.random_range(0..donors.len())];

        let mut child = first.clone();
        child.replace_subtree(*target, second, donor);
        Some(child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::Grammar;
    use crate::parser::EarleyParser;
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;
    use std::collections::HashSet;

    fn calculator_grammar() -> Grammar {
        Grammar::new(
            "<start>",
            vec![
                ("<start>", vec!["<arith_expr>"]),
                ("<arith_expr>", vec!["<function>(<number>)"]),
                ("<function>", vec!["sqrt", "sin", "cos", "tan"]),
                ("<number>", vec!["<maybe_minus><onenine><maybe_digits>"]),
                ("<maybe_minus>", vec!["", "-"]),
                ("<onenine>", vec!["1", "2", "3", "4", "5", "6", "7", "8", "9"]),
                ("<digit>", vec!["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"]),
                ("<maybe_digits>", vec!["", "<digits>"]),
                ("<digits>", vec!["<digit>", "<digit><digits>"]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn subtree_mutator_keeps_trees_valid_and_changes_them() {
        let grammar = calculator_grammar();
        let parser = EarleyParser::new(&grammar);
        let generator = GrammarGenerator::new(&grammar, 6);
        let tree = parser.parse("sqrt(1)").unwrap();
        let mut mutator = SubtreeMutator::new();
        let mut rng = ChaCha8Rng::from_seed([7; 32]);

        let mut changed = 0;
        for _ in 0..50 {
            let child = mutator.mutate(&tree, &generator, &mut rng).unwrap();
            assert!(child.conforms_to(&grammar));
            assert!(parser.recognizes(&child.render()));
            if child.render() != "sqrt(1)" {
                changed += 1;
            }
        }
        assert!(changed >= 45, "only {changed} of 50 mutations changed the input");
        assert_eq!(tree.render(), "sqrt(1)");
    }

    #[test]
    fn subtree_mutator_reaches_negative_numbers() {
        let grammar = calculator_grammar();
        let parser = EarleyParser::new(&grammar);
        let generator = GrammarGenerator::new(&grammar, 6);
        let tree = parser.parse("sqrt(1)").unwrap();
        let mut mutator = SubtreeMutator::new();
        let mut rng = ChaCha8Rng::from_seed([8; 32]);

        let found = (0..300).any(|_| {
            let child = mutator.mutate(&tree, &generator, &mut rng).unwrap();
            child.render().starts_with("sqrt(-")
        });
        assert!(found);
    }

    #[test]
    fn subtree_mutator_on_fixed_grammar_returns_same_rendering() {
        let grammar = Grammar::new("<start>", vec![("<start>", vec!["<a>"]), ("<a>", vec!["x"])]).unwrap();
        let parser = EarleyParser::new(&grammar);
        let generator = GrammarGenerator::new(&grammar, 4);
        let tree = parser.parse("x").unwrap();
        let mut rng = ChaCha8Rng::from_seed([1; 32]);

        let child = SubtreeMutator::with_attempts(3)
            .mutate(&tree, &generator, &mut rng)
            .unwrap();
        assert_eq!(child.render(), "x");
    }

    #[test]
    fn crossover_combines_parents() {
        let grammar = calculator_grammar();
        let parser = EarleyParser::new(&grammar);
        let first = parser.parse("sqrt(1)").unwrap();
        let second = parser.parse("cos(-42)").unwrap();
        let mut crossover = SubtreeCrossover::new();
        let mut rng = ChaCha8Rng::from_seed([9; 32]);

        let mut seen = HashSet::new();
        for _ in 0..100 {
            let child = crossover.crossover(&first, &second, &mut rng).unwrap();
            assert!(child.conforms_to(&grammar));
            seen.insert(child.render());
        }
        assert!(seen.contains("cos(1)"));
        assert!(seen.contains("sqrt(-42)"));
        assert!(seen.iter().all(|s| parser.recognizes(s)));
    }

    #[test]
    fn crossover_without_shared_nonterminals_is_none() {
        let grammar = Grammar::new(
            "<start>",
            vec![("<start>", vec!["<a>", "<b>"]), ("<a>", vec!["a"]), ("<b>", vec!["b"])],
        )
        .unwrap();
        let parser = EarleyParser::new(&grammar);
        let first = parser.parse("a").unwrap();
        let second = parser.parse("b").unwrap();
        let mut rng = ChaCha8Rng::from_seed([0; 32]);
        assert!(SubtreeCrossover.crossover(&first, &second, &mut rng).is_none());
    }
}
