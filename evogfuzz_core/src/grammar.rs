use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Start symbol used when a grammar is built without an explicit one.
pub const DEFAULT_START_SYMBOL: &str = "<start>";

/// Errors raised while building or validating a [`Grammar`].
///
/// Every variant is fatal: a grammar that fails validation is never handed to
/// the parser, the generator or the engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GrammarError {
    #[error("Start symbol {0} has no definition")]
    MissingStartSymbol(String),

    #[error("Invalid nonterminal name {0:?}, expected the form <name>")]
    InvalidNonterminal(String),

    #[error("Nonterminal {referenced} used in an expansion of {rule} is not defined")]
    UndefinedNonterminal { rule: String, referenced: String },

    #[error("Nonterminal {0} has no expansion alternatives")]
    NoAlternatives(String),

    #[error("Nonterminal {0} is not reachable from the start symbol")]
    Unreachable(String),

    #[error("Nonterminal {0} cannot derive a finite string")]
    Unproductive(String),

    #[error("Grammar JSON is malformed: {0}")]
    Json(String),

    #[error("Grammar I/O error: {0}")]
    Io(String),
}

/// One element of an expansion: literal text or a reference to a nonterminal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Symbol {
    Terminal(String),
    Nonterminal(String),
}

impl Symbol {
    pub fn is_nonterminal(&self) -> bool {
        matches!(self, Symbol::Nonterminal(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Symbol::Terminal(text) | Symbol::Nonterminal(text) => text,
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns true when `name` has the `<name>` shape: no whitespace and no
/// nested angle brackets between the delimiters.
pub fn is_nonterminal_name(name: &str) -> bool {
    name.len() > 2
        && name.starts_with('<')
        && name.ends_with('>')
        && !name[1..name.len() - 1]
            .chars()
            .any(|c| c == '<' || c == '>' || c.is_whitespace())
}

/// A single alternative on the right-hand side of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Expansion {
    symbols: Vec<Symbol>,
}

impl Expansion {
    /// Splits an expansion string into literals and nonterminal references.
    ///
    /// `"<function>(<term>)"` becomes `[<function>, "(", <term>, ")"]`. A `<`
    /// that does not open a well-formed reference stays literal text, and the
    /// empty string yields the empty expansion.
    pub fn parse(text: &str) -> Self {
        let mut symbols = Vec::new();
        let mut literal = String::new();
        let mut rest = text;

        while let Some(open) = rest.find('<') {
            let candidate = &rest[open..];
            let reference_len = candidate[1..]
                .find(|c: char| c == '<' || c == '>' || c.is_whitespace())
                .filter(|&end| end > 0 && candidate[1 + end..].starts_with('>'))
                .map(|end| end + 2);

            match reference_len {
                Some(len) => {
                    literal.push_str(&rest[..open]);
                    if !literal.is_empty() {
                        symbols.push(Symbol::Terminal(std::mem::take(&mut literal)));
                    }
                    symbols.push(Symbol::Nonterminal(candidate[..len].to_string()));
                    rest = &candidate[len..];
                }
                None => {
                    literal.push_str(&rest[..=open]);
                    rest = &candidate[1..];
                }
            }
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            symbols.push(Symbol::Terminal(literal));
        }

        Self { symbols }
    }

    pub fn from_symbols(symbols: Vec<Symbol>) -> Self {
        Self {
            symbols: symbols
                .into_iter()
                .filter(|s| s.is_nonterminal() || !s.as_str().is_empty())
                .collect(),
        }
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn nonterminals(&self) -> impl Iterator<Item = &str> {
        self.symbols
            .iter()
            .filter(|s| s.is_nonterminal())
            .map(Symbol::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl fmt::Display for Expansion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for symbol in &self.symbols {
            f.write_str(symbol.as_str())?;
        }
        Ok(())
    }
}

/// A validated context-free grammar.
///
/// Rules are kept in a `BTreeMap` so that every iteration over the grammar is
/// ordered, which keeps seeded fuzzing runs reproducible.
#[derive(Debug, Clone)]
pub struct Grammar {
    start: String,
    rules: BTreeMap<String, Vec<Expansion>>,
    /// Minimum derivation depth of each nonterminal.
    min_depth: BTreeMap<String, usize>,
    nullable: BTreeSet<String>,
}

impl Grammar {
    /// Builds and validates a grammar from `(nonterminal, alternatives)` pairs.
    pub fn new<K, V, A, I>(start: &str, rules: I) -> Result<Self, GrammarError>
    where
        I: IntoIterator<Item = (K, A)>,
        A: IntoIterator<Item = V>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let rules = rules
            .into_iter()
            .map(|(name, alternatives)| {
                let expansions = alternatives
                    .into_iter()
                    .map(|alt| Expansion::parse(alt.as_ref()))
                    .collect();
                (name.into(), expansions)
            })
            .collect();
        Self::from_rules(start, rules)
    }

    /// Validates an already tokenized rule set.
    pub fn from_rules(
        start: &str,
        rules: BTreeMap<String, Vec<Expansion>>,
    ) -> Result<Self, GrammarError> {
        validate_rules(start, &rules)?;
        let min_depth = compute_min_depth(&rules)?;
        let nullable = compute_nullable(&rules);
        Ok(Self {
            start: start.to_string(),
            rules,
            min_depth,
            nullable,
        })
    }

    /// Parses a JSON object mapping nonterminals to arrays of expansion strings.
    pub fn from_json_str(json: &str, start: &str) -> Result<Self, GrammarError> {
        let value: JsonValue =
            serde_json::from_str(json).map_err(|e| GrammarError::Json(e.to_string()))?;
        let object = value
            .as_object()
            .ok_or_else(|| GrammarError::Json("top-level value must be an object".to_string()))?;

        let mut rules = Vec::with_capacity(object.len());
        for (name, alternatives) in object {
            let array = alternatives.as_array().ok_or_else(|| {
                GrammarError::Json(format!("alternatives of {name} must be an array"))
            })?;
            let mut expansions = Vec::with_capacity(array.len());
            for alt in array {
                let text = alt.as_str().ok_or_else(|| {
                    GrammarError::Json(format!("alternatives of {name} must be strings"))
                })?;
                expansions.push(text.to_string());
            }
            rules.push((name.clone(), expansions));
        }
        Self::new(start, rules)
    }

    pub fn load_from_file(path: &Path, start: &str) -> Result<Self, GrammarError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GrammarError::Io(format!("Failed to read {path:?}: {e}")))?;
        Self::from_json_str(&content, start)
    }

    pub fn start_symbol(&self) -> &str {
        &self.start
    }

    pub fn rules(&self) -> &BTreeMap<String, Vec<Expansion>> {
        &self.rules
    }

    pub fn alternatives(&self, nonterminal: &str) -> Option<&[Expansion]> {
        self.rules.get(nonterminal).map(Vec::as_slice)
    }

    pub fn nonterminals(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    pub fn contains(&self, nonterminal: &str) -> bool {
        self.rules.contains_key(nonterminal)
    }

    /// Minimum depth of a derivation tree rooted at `nonterminal`, counting
    /// the root itself. `None` for unknown nonterminals.
    pub fn min_depth(&self, nonterminal: &str) -> Option<usize> {
        self.min_depth.get(nonterminal).copied()
    }

    /// Depth of the shallowest tree that uses `expansion` at its root.
    pub fn expansion_cost(&self, expansion: &Expansion) -> usize {
        1 + expansion
            .nonterminals()
            .filter_map(|nt| self.min_depth(nt))
            .max()
            .unwrap_or(0)
    }

    pub fn is_nullable(&self, nonterminal: &str) -> bool {
        self.nullable.contains(nonterminal)
    }

    /// Serializes back into the JSON object form accepted by [`Grammar::from_json_str`].
    pub fn to_json_value(&self) -> JsonValue {
        let object = self
            .rules
            .iter()
            .map(|(name, alternatives)| {
                let alts = alternatives
                    .iter()
                    .map(|alt| JsonValue::String(alt.to_string()))
                    .collect();
                (name.clone(), JsonValue::Array(alts))
            })
            .collect();
        JsonValue::Object(object)
    }
}

fn validate_rules(start: &str, rules: &BTreeMap<String, Vec<Expansion>>) -> Result<(), GrammarError> {
    for name in rules.keys() {
        if !is_nonterminal_name(name) {
            return Err(GrammarError::InvalidNonterminal(name.clone()));
        }
    }
    if !rules.contains_key(start) {
        return Err(GrammarError::MissingStartSymbol(start.to_string()));
    }
    for (name, alternatives) in rules {
        if alternatives.is_empty() {
            return Err(GrammarError::NoAlternatives(name.clone()));
        }
        for referenced in alternatives.iter().flat_map(Expansion::nonterminals) {
            if !rules.contains_key(referenced) {
                return Err(GrammarError::UndefinedNonterminal {
                    rule: name.clone(),
                    referenced: referenced.to_string(),
                });
            }
        }
    }

    let mut reachable = BTreeSet::new();
    let mut queue = VecDeque::from([start]);
    reachable.insert(start);
    while let Some(current) = queue.pop_front() {
        for referenced in rules[current].iter().flat_map(Expansion::nonterminals) {
            if reachable.insert(referenced) {
                queue.push_back(referenced);
            }
        }
    }
    if let Some(unreachable) = rules.keys().find(|name| !reachable.contains(name.as_str())) {
        return Err(GrammarError::Unreachable(unreachable.clone()));
    }
    Ok(())
}

/// Fixpoint over `depth(nt) = min over alternatives of 1 + max(depth(child))`.
fn compute_min_depth(
    rules: &BTreeMap<String, Vec<Expansion>>,
) -> Result<BTreeMap<String, usize>, GrammarError> {
    let mut depth: BTreeMap<String, usize> = BTreeMap::new();
    loop {
        let mut changed = false;
        for (name, alternatives) in rules {
            let best = alternatives
                .iter()
                .filter_map(|alt| {
                    alt.nonterminals()
                        .map(|nt| depth.get(nt).copied())
                        .try_fold(0, |acc, d| d.map(|d| acc.max(d)))
                        .map(|deepest| deepest + 1)
                })
                .min();
            if let Some(best) = best {
                if depth.get(name).is_none_or(|&current| best < current) {
                    depth.insert(name.clone(), best);
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }

    match rules.keys().find(|name| !depth.contains_key(*name)) {
        Some(unproductive) => Err(GrammarError::Unproductive(unproductive.clone())),
        None => Ok(depth),
    }
}

fn compute_nullable(rules: &BTreeMap<String, Vec<Expansion>>) -> BTreeSet<String> {
    let mut nullable = BTreeSet::new();
    loop {
        let mut changed = false;
        for (name, alternatives) in rules {
            if nullable.contains(name) {
                continue;
            }
            let derives_empty = alternatives.iter().any(|alt| {
                alt.symbols().iter().all(|symbol| match symbol {
                    Symbol::Terminal(_) => false,
                    Symbol::Nonterminal(nt) => nullable.contains(nt),
                })
            });
            if derives_empty {
                nullable.insert(name.clone());
                changed = true;
            }
        }
        if !changed {
            return nullable;
        }
    }
}
