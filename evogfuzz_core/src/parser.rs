//! Earley parser turning raw strings into derivation trees.
//!
//! Recognition runs over byte offsets with whole terminals scanned at once,
//! so multi-character literals such as `sqrt` need no tokenizer. Epsilon
//! rules are handled by advancing over nullable nonterminals at prediction
//! time, and right recursion uses Leo's deterministic reduction paths so a
//! long `<digit><digits>` chain costs linear space. The tree is then read
//! back from the chart right to left with an explicit work stack, using the
//! partially completed items to pick split points.

use crate::grammar::{Grammar, Symbol};
use crate::tree::DerivationTree;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Input {input:?} does not conform to the grammar (stuck at byte {position})")]
    NoParse { input: String, position: usize },
}

#[derive(Debug, Clone, Copy)]
enum Sym<'g> {
    Terminal(&'g str),
    Nonterminal(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Item {
    rule: usize,
    alt: usize,
    dot: usize,
    origin: usize,
}

pub struct EarleyParser<'g> {
    names: Vec<&'g str>,
    rules: Vec<Vec<Vec<Sym<'g>>>>,
    nullable: Vec<bool>,
    start: usize,
}

impl<'g> EarleyParser<'g> {
    pub fn new(grammar: &'g Grammar) -> Self {
        let names: Vec<&'g str> = grammar.nonterminals().collect();
        let index: HashMap<&str, usize> = names.iter().enumerate().map(|(i, n)| (*n, i)).collect();

        let rules = names
            .iter()
            .map(|name| {
                grammar
                    .alternatives(name)
                    .unwrap_or_default()
                    .iter()
                    .map(|alt| {
                        alt.symbols()
                            .iter()
                            .map(|symbol| match symbol {
                                Symbol::Terminal(text) => Sym::Terminal(text.as_str()),
                                Symbol::Nonterminal(nt) => Sym::Nonterminal(index[nt.as_str()]),
                            })
                            .collect()
                    })
                    .collect()
            })
            .collect();
        let nullable = names.iter().map(|name| grammar.is_nullable(name)).collect();
        let start = index[grammar.start_symbol()];

        Self {
            names,
            rules,
            nullable,
            start,
        }
    }

    pub fn recognizes(&self, input: &str) -> bool {
        let chart = self.recognize(input);
        self.accepted(&chart, input.len())
    }

    pub fn parse(&self, input: &str) -> Result<DerivationTree, ParseError> {
        let chart = self.recognize(input);
        if !self.accepted(&chart, input.len()) {
            let position = chart
                .sets
                .iter()
                .rposition(|set| !set.is_empty())
                .unwrap_or(0);
            return Err(ParseError::NoParse {
                input: input.to_string(),
                position,
            });
        }

        let extractor = Extractor {
            parser: self,
            input,
            chart: &chart,
            active: HashSet::new(),
            nodes: Vec::new(),
        };
        extractor
            .into_tree(self.start, 0, input.len())
            .ok_or_else(|| ParseError::NoParse {
                input: input.to_string(),
                position: input.len(),
            })
    }

    fn accepted(&self, chart: &Chart, end: usize) -> bool {
        chart.completed.contains_key(&(self.start, 0, end))
    }

    fn recognize(&self, input: &str) -> Chart {
        let mut chart = Chart::new(input.len());
        for alt in 0..self.rules[self.start].len() {
            self.add(
                &mut chart,
                0,
                Item {
                    rule: self.start,
                    alt,
                    dot: 0,
                    origin: 0,
                },
            );
        }

        for pos in 0..=input.len() {
            let mut i = 0;
            while i < chart.sets[pos].len() {
                let item = chart.sets[pos][i];
                i += 1;
                match self.rules[item.rule][item.alt].get(item.dot) {
                    None => self.complete(&mut chart, pos, item),
                    Some(Sym::Nonterminal(nt)) => {
                        for alt in 0..self.rules[*nt].len() {
                            self.add(
                                &mut chart,
                                pos,
                                Item {
                                    rule: *nt,
                                    alt,
                                    dot: 0,
                                    origin: pos,
                                },
                            );
                        }
                        if self.nullable[*nt] {
                            self.add(&mut chart, pos, item.advanced());
                        }
                    }
                    Some(Sym::Terminal(text)) => {
                        if input[pos..].starts_with(text) {
                            self.add(&mut chart, pos + text.len(), item.advanced());
                        }
                    }
                }
            }
        }

        for (end, set) in chart.sets.iter().enumerate() {
            for item in set {
                if item.dot == self.rules[item.rule][item.alt].len() {
                    chart
                        .completed
                        .entry((item.rule, item.origin, end))
                        .or_default()
                        .push(item.alt);
                }
            }
        }
        chart
    }

    fn add(&self, chart: &mut Chart, pos: usize, item: Item) {
        let waits_on = match self.rules[item.rule][item.alt].get(item.dot) {
            Some(Sym::Nonterminal(nt)) => Some(*nt),
            _ => None,
        };
        chart.add(pos, item, waits_on);
    }

    fn complete(&self, chart: &mut Chart, pos: usize, item: Item) {
        // The origin set is closed once the scan has moved past it.
        if item.origin < pos {
            if let Some(top) = self.transitive_top(chart, item.origin, item.rule) {
                self.add(chart, pos, top);
                return;
            }
        }
        let waiting = chart.waiting_on(item.origin, item.rule).to_vec();
        for parent in waiting {
            self.add(chart, pos, parent.advanced());
        }
    }

    /// The only item in set `set` waiting on `symbol`, provided `symbol` is
    /// the last one of its alternative.
    fn deterministic_parent(&self, chart: &Chart, set: usize, symbol: usize) -> Option<Item> {
        if set == 0 && symbol == self.start {
            return None;
        }
        match chart.waiting_on(set, symbol) {
            [parent] if parent.dot + 1 == self.rules[parent.rule][parent.alt].len() => Some(*parent),
            _ => None,
        }
    }

    /// Follows the deterministic reduction path above `symbol` completed
    /// from `set` and returns the topmost item of it, memoized per set.
    fn transitive_top(&self, chart: &mut Chart, set: usize, symbol: usize) -> Option<Item> {
        let mut path: Vec<(usize, usize)> = Vec::new();
        let mut key = (set, symbol);
        let mut top = None;
        loop {
            if let Some(&known) = chart.transitive.get(&key) {
                if known.is_some() {
                    top = known;
                }
                break;
            }
            // Unit and nullable chains can lead back into the same set.
            if path
                .iter()
                .rev()
                .take_while(|(s, _)| *s == key.0)
                .any(|visited| *visited == key)
            {
                top = None;
                break;
            }
            match self.deterministic_parent(chart, key.0, key.1) {
                Some(parent) => {
                    path.push(key);
                    top = Some(parent.advanced());
                    key = (parent.origin, parent.rule);
                }
                None => {
                    chart.transitive.insert(key, None);
                    break;
                }
            }
        }
        for key in path {
            chart.transitive.insert(key, top);
        }
        top
    }
}

impl Item {
    fn advanced(self) -> Self {
        Self {
            dot: self.dot + 1,
            ..self
        }
    }
}

struct Chart {
    sets: Vec<Vec<Item>>,
    seen: Vec<HashSet<Item>>,
    /// Per set, the items whose next symbol is a given nonterminal.
    waiting: Vec<HashMap<usize, Vec<Item>>>,
    /// Every set an item was added to.
    positions: HashMap<Item, Vec<usize>>,
    /// Leo items: `(set, nonterminal)` to the top of its reduction path.
    transitive: HashMap<(usize, usize), Option<Item>>,
    /// `(rule, start, end)` to the alternatives that complete over that span.
    completed: HashMap<(usize, usize, usize), Vec<usize>>,
}

impl Chart {
    fn new(len: usize) -> Self {
        Self {
            sets: vec![Vec::new(); len + 1],
            seen: vec![HashSet::new(); len + 1],
            waiting: vec![HashMap::new(); len + 1],
            positions: HashMap::new(),
            transitive: HashMap::new(),
            completed: HashMap::new(),
        }
    }

    fn add(&mut self, pos: usize, item: Item, waits_on: Option<usize>) {
        if !self.seen[pos].insert(item) {
            return;
        }
        self.sets[pos].push(item);
        self.positions.entry(item).or_default().push(pos);
        if let Some(nt) = waits_on {
            self.waiting[pos].entry(nt).or_default().push(item);
        }
    }

    fn contains(&self, pos: usize, item: &Item) -> bool {
        self.seen[pos].contains(item)
    }

    fn waiting_on(&self, pos: usize, nt: usize) -> &[Item] {
        self.waiting[pos]
            .get(&nt)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

enum Child<'g> {
    Terminal(&'g str),
    /// Index into [`Extractor::nodes`].
    Node(usize),
}

struct ParseNode<'g> {
    rule: usize,
    alt: usize,
    children: Vec<Child<'g>>,
}

/// A pending derivation of `rule` over `start..end`.
struct Frame<'g> {
    rule: usize,
    start: usize,
    end: usize,
    alts: Vec<usize>,
    next_alt: usize,
    attempt: Option<Attempt<'g>>,
}

/// One alternative being matched right to left.
struct Attempt<'g> {
    alt: usize,
    /// Symbols `..remaining` are still unmatched.
    remaining: usize,
    right: usize,
    children: Vec<Child<'g>>,
    /// Split point of the nonterminal currently being derived.
    pending: usize,
    /// Further split points to try for it, best last.
    splits: Vec<usize>,
}

enum Step {
    Descend { rule: usize, start: usize, end: usize },
    Finished(Option<usize>),
}

struct Extractor<'p, 'g> {
    parser: &'p EarleyParser<'g>,
    input: &'p str,
    chart: &'p Chart,
    /// Spans currently being derived; guards against unit and epsilon cycles.
    active: HashSet<(usize, usize, usize)>,
    nodes: Vec<ParseNode<'g>>,
}

impl<'g> Extractor<'_, 'g> {
    fn into_tree(mut self, rule: usize, start: usize, end: usize) -> Option<DerivationTree> {
        let root = self.derive(rule, start, end)?;
        let mut tree = DerivationTree::new(Symbol::Nonterminal(self.parser.names[rule].to_string()));
        let mut stack = vec![(tree.root(), root)];
        while let Some((id, index)) = stack.pop() {
            let node = &self.nodes[index];
            tree.set_expansion(id, node.alt);
            for child in &node.children {
                match *child {
                    Child::Terminal(text) => {
                        tree.add_child(id, Symbol::Terminal(text.to_string()));
                    }
                    Child::Node(inner) => {
                        let name = self.parser.names[self.nodes[inner].rule].to_string();
                        let child_id = tree.add_child(id, Symbol::Nonterminal(name));
                        stack.push((child_id, inner));
                    }
                }
            }
        }
        Some(tree)
    }

    fn derive(&mut self, rule: usize, start: usize, end: usize) -> Option<usize> {
        let mut stack = vec![self.frame(rule, start, end)?];
        let mut outcome = None;
        while let Some(frame) = stack.last_mut() {
            match self.step(frame, outcome.take()) {
                Step::Descend { rule, start, end } => match self.frame(rule, start, end) {
                    Some(child) => stack.push(child),
                    None => outcome = Some(None),
                },
                Step::Finished(result) => {
                    if let Some(done) = stack.pop() {
                        self.active.remove(&(done.rule, done.start, done.end));
                    }
                    if stack.is_empty() {
                        return result;
                    }
                    outcome = Some(result);
                }
            }
        }
        None
    }

    fn frame(&mut self, rule: usize, start: usize, end: usize) -> Option<Frame<'g>> {
        if !self.active.insert((rule, start, end)) {
            return None;
        }
        // Spans skipped by a Leo reduction are missing from the chart.
        let alts = match self.chart.completed.get(&(rule, start, end)) {
            Some(alts) => alts.clone(),
            None => (0..self.parser.rules[rule].len()).collect(),
        };
        Some(Frame {
            rule,
            start,
            end,
            alts,
            next_alt: 0,
            attempt: None,
        })
    }

    /// Advances `frame` until it needs a child derived or is done.
    /// `outcome` is the result of the child it asked for last.
    fn step(&mut self, frame: &mut Frame<'g>, mut outcome: Option<Option<usize>>) -> Step {
        let parser = self.parser;
        let chart = self.chart;
        loop {
            if frame.attempt.is_none() {
                let Some(&alt) = frame.alts.get(frame.next_alt) else {
                    return Step::Finished(None);
                };
                frame.next_alt += 1;
                frame.attempt = Some(Attempt {
                    alt,
                    remaining: parser.rules[frame.rule][alt].len(),
                    right: frame.end,
                    children: Vec::new(),
                    pending: frame.end,
                    splits: Vec::new(),
                });
            }
            let Some(attempt) = frame.attempt.as_mut() else {
                continue;
            };
            let symbols = &parser.rules[frame.rule][attempt.alt];

            if let Some(result) = outcome.take() {
                match result {
                    Some(node) => {
                        attempt.children.push(Child::Node(node));
                        attempt.right = attempt.pending;
                        attempt.remaining -= 1;
                        attempt.splits.clear();
                    }
                    None => {
                        let Sym::Nonterminal(nt) = symbols[attempt.remaining - 1] else {
                            frame.attempt = None;
                            continue;
                        };
                        match attempt.splits.pop() {
                            Some(left) => {
                                attempt.pending = left;
                                return Step::Descend {
                                    rule: nt,
                                    start: left,
                                    end: attempt.right,
                                };
                            }
                            None => {
                                frame.attempt = None;
                                continue;
                            }
                        }
                    }
                }
            }

            if attempt.remaining == 0 {
                if attempt.right != frame.start {
                    frame.attempt = None;
                    continue;
                }
                let mut children = std::mem::take(&mut attempt.children);
                children.reverse();
                self.nodes.push(ParseNode {
                    rule: frame.rule,
                    alt: attempt.alt,
                    children,
                });
                return Step::Finished(Some(self.nodes.len() - 1));
            }

            let dot = attempt.remaining - 1;
            let prefix = Item {
                rule: frame.rule,
                alt: attempt.alt,
                dot,
                origin: frame.start,
            };
            match symbols[dot] {
                Sym::Terminal(text) => {
                    let right = attempt.right;
                    let left = right.checked_sub(text.len()).filter(|&left| {
                        left >= frame.start
                            && self.input.is_char_boundary(left)
                            && &self.input[left..right] == text
                            && chart.contains(left, &prefix)
                    });
                    match left {
                        Some(left) => {
                            attempt.children.push(Child::Terminal(text));
                            attempt.right = left;
                            attempt.remaining -= 1;
                        }
                        None => frame.attempt = None,
                    }
                }
                Sym::Nonterminal(nt) => {
                    attempt.splits = self.splits(prefix, nt, frame.start, attempt.right);
                    match attempt.splits.pop() {
                        Some(left) => {
                            attempt.pending = left;
                            return Step::Descend {
                                rule: nt,
                                start: left,
                                end: attempt.right,
                            };
                        }
                        None => frame.attempt = None,
                    }
                }
            }
        }
    }

    /// Candidate start positions for `nt` ending at `right`, where `prefix`
    /// is the item waiting on it. Sorted ascending; callers pop the highest.
    fn splits(&self, prefix: Item, nt: usize, start: usize, right: usize) -> Vec<usize> {
        let mut lefts: Vec<usize> = self
            .chart
            .positions
            .get(&prefix)
            .into_iter()
            .flatten()
            .copied()
            .filter(|&left| {
                left >= start
                    && left <= right
                    && (self.chart.completed.contains_key(&(nt, left, right))
                        || self.parser.deterministic_parent(self.chart, left, nt).is_some())
            })
            .collect();
        lefts.sort_unstable();
        lefts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn digits() -> Grammar {
        Grammar::new(
            "<start>",
            vec![
                ("<start>", vec!["<digits>"]),
                ("<digits>", vec!["<digit><digits>", "<digit>"]),
                ("<digit>", vec!["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"]),
            ],
        )
        .unwrap()
    }

    fn calculator() -> Grammar {
        Grammar::new(
            "<start>",
            vec![
                ("<start>", vec!["<function>(<term>)"]),
                ("<function>", vec!["sqrt", "sin", "cos", "tan"]),
                ("<term>", vec!["-<value>", "<value>"]),
                ("<value>", vec!["<integer>.<integer>", "<integer>"]),
                ("<integer>", vec!["<digit><integer>", "<digit>"]),
                ("<digit>", vec!["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn parses_calculator_inputs_into_conforming_trees() {
        let grammar = calculator();
        let parser = EarleyParser::new(&grammar);
        for input in ["sqrt(1)", "cos(-12.5)", "tan(907)"] {
            let tree = parser.parse(input).unwrap();
            assert_eq!(tree.render(), input);
            assert!(tree.conforms_to(&grammar), "tree for {input} does not conform");
        }
    }

    #[test]
    fn rejects_non_conforming_input() {
        let grammar = calculator();
        let parser = EarleyParser::new(&grammar);
        match parser.parse("sqrt(1") {
            Err(ParseError::NoParse { input, position }) => {
                assert_eq!(input, "sqrt(1");
                assert_eq!(position, 6);
            }
            other => panic!("Expected NoParse, got {other:?}"),
        }
        assert!(!parser.recognizes("log(1)"));
        assert!(!parser.recognizes(""));
    }

    #[test]
    fn handles_left_recursion() {
        let grammar = Grammar::new(
            "<start>",
            vec![("<start>", vec!["<start>+<n>", "<n>"]), ("<n>", vec!["1", "2"])],
        )
        .unwrap();
        let parser = EarleyParser::new(&grammar);
        let tree = parser.parse("1+2+1").unwrap();
        assert_eq!(tree.render(), "1+2+1");
        assert!(tree.conforms_to(&grammar));
    }

    #[test]
    fn handles_epsilon_and_nullable_chains() {
        let grammar = Grammar::new(
            "<start>",
            vec![
                ("<start>", vec!["<sign><digits>"]),
                ("<sign>", vec!["", "-", "<empty>"]),
                ("<empty>", vec![""]),
                ("<digits>", vec!["<digit><digits>", "<digit>"]),
                ("<digit>", vec!["0", "1"]),
            ],
        )
        .unwrap();
        let parser = EarleyParser::new(&grammar);
        for input in ["10", "-1", "0"] {
            let tree = parser.parse(input).unwrap();
            assert_eq!(tree.render(), input);
            assert!(tree.conforms_to(&grammar));
        }
    }

    #[test]
    fn survives_unit_cycles() {
        let grammar = Grammar::new(
            "<start>",
            vec![("<start>", vec!["<a>"]), ("<a>", vec!["<start>", "x"])],
        )
        .unwrap();
        let parser = EarleyParser::new(&grammar);
        let tree = parser.parse("x").unwrap();
        assert_eq!(tree.render(), "x");
        assert!(tree.conforms_to(&grammar));
    }

    #[test]
    fn ambiguous_grammar_yields_one_valid_tree() {
        let grammar = Grammar::new(
            "<start>",
            vec![("<start>", vec!["<start><start>", "a"])],
        )
        .unwrap();
        let parser = EarleyParser::new(&grammar);
        let tree = parser.parse("aaaa").unwrap();
        assert_eq!(tree.render(), "aaaa");
        assert!(tree.conforms_to(&grammar));
    }

    #[test]
    fn multibyte_literals_are_scanned_whole() {
        let grammar = Grammar::new(
            "<start>",
            vec![("<start>", vec!["<w> <w>"]), ("<w>", vec!["größe", "maß"])],
        )
        .unwrap();
        let parser = EarleyParser::new(&grammar);
        let tree = parser.parse("maß größe").unwrap();
        assert_eq!(tree.render(), "maß größe");
    }

    #[test]
    fn parses_long_right_recursive_input() {
        let grammar = digits();
        let parser = EarleyParser::new(&grammar);
        let input = "1234567890".repeat(500);
        let tree = parser.parse(&input).unwrap();
        assert_eq!(tree.render(), input);
        assert!(tree.conforms_to(&grammar));
        // <start>, one <digits> per digit, the last <digit> and its leaf.
        assert_eq!(tree.depth(), input.len() + 3);
    }

    #[test]
    fn right_recursion_is_parsed_in_linear_time() {
        let grammar = calculator();
        let parser = EarleyParser::new(&grammar);
        let input = format!("sqrt(-{}.{})", "7".repeat(1000), "3".repeat(1000));

        let started = Instant::now();
        assert!(parser.recognizes(&input));
        let tree = parser.parse(&input).unwrap();
        let elapsed = started.elapsed();

        assert_eq!(tree.render(), input);
        assert!(tree.conforms_to(&grammar));
        assert!(elapsed < Duration::from_secs(5), "parsing took {elapsed:?}");
    }

    #[test]
    fn deterministic_chains_still_reject_bad_suffixes() {
        let grammar = digits();
        let parser = EarleyParser::new(&grammar);
        let input = format!("{}x", "5".repeat(300));
        assert!(!parser.recognizes(&input));
        match parser.parse(&input) {
            Err(ParseError::NoParse { position, .. }) => assert_eq!(position, 300),
            other => panic!("Expected NoParse, got {other:?}"),
        }
    }
}
