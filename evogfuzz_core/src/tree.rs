use crate::grammar::{Grammar, Symbol};
use std::fmt;
use thiserror::Error;

/// Index of a node inside a [`DerivationTree`] arena.
pub type NodeId = usize;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("Node {0} does not exist in this tree")]
    UnknownNode(NodeId),

    #[error("Node {0} is no longer reachable from the root")]
    DetachedNode(NodeId),

    #[error("Cannot replace a subtree rooted at {expected} with one rooted at {found}")]
    SymbolMismatch { expected: String, found: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub symbol: Symbol,
    /// Index of the grammar alternative this nonterminal was expanded with.
    pub expansion: Option<usize>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// A derivation tree stored as an arena of nodes.
///
/// Replacing a subtree copies the donor nodes to the end of the arena and
/// swaps a single child index in the parent. The excised nodes stay in the
/// arena as garbage until [`DerivationTree::compact`] runs, which happens
/// automatically once they outnumber the live nodes.
#[derive(Debug, Clone)]
pub struct DerivationTree {
    nodes: Vec<Node>,
    root: NodeId,
    detached: usize,
}

impl DerivationTree {
    pub fn new(root_symbol: Symbol) -> Self {
        Self {
            nodes: vec![Node {
                symbol: root_symbol,
                expansion: None,
                parent: None,
                children: Vec::new(),
            }],
            root: 0,
            detached: 0,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn root_symbol(&self) -> &Symbol {
        &self.nodes[self.root].symbol
    }

    /// Appends a child to `parent` and returns its id.
    pub fn add_child(&mut self, parent: NodeId, symbol: Symbol) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            symbol,
            expansion: None,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        id
    }

    pub fn set_expansion(&mut self, id: NodeId, expansion: usize) {
        self.nodes[id].expansion = Some(expansion);
    }

    /// Ids of all nodes reachable from the root, in pre-order.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len() - self.detached);
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id].children.iter().rev());
        }
        order
    }

    /// Ids of the reachable nonterminal nodes, in pre-order.
    pub fn nonterminal_nodes(&self) -> Vec<NodeId> {
        self.preorder()
            .into_iter()
            .filter(|&id| self.nodes[id].symbol.is_nonterminal())
            .collect()
    }

    /// Ids of the reachable nodes labelled with `nonterminal`.
    pub fn nodes_with_symbol(&self, nonterminal: &str) -> Vec<NodeId> {
        self.preorder()
            .into_iter()
            .filter(|&id| match &self.nodes[id].symbol {
                Symbol::Nonterminal(name) => name == nonterminal,
                Symbol::Terminal(_) => false,
            })
            .collect()
    }

    /// Number of live nodes.
    pub fn size(&self) -> usize {
        self.nodes.len() - self.detached
    }

    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(self.root, 1)];
        while let Some((id, depth)) = stack.pop() {
            deepest = deepest.max(depth);
            stack.extend(self.nodes[id].children.iter().map(|&child| (child, depth + 1)));
        }
        deepest
    }

    /// Concatenates the terminal leaves from left to right.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            if let Symbol::Terminal(text) = &node.symbol {
                out.push_str(text);
            }
            stack.extend(node.children.iter().rev());
        }
        out
    }

    /// Copies the subtree rooted at `id` into a new, compact tree.
    pub fn subtree(&self, id: NodeId) -> Result<DerivationTree, TreeError> {
        let node = self.nodes.get(id).ok_or(TreeError::UnknownNode(id))?;
        let mut copy = DerivationTree::new(node.symbol.clone());
        copy.nodes[0].expansion = node.expansion;
        copy.copy_children_from(self, id, 0);
        Ok(copy)
    }

    /// Replaces the subtree at `at` with a copy of `donor`'s subtree rooted
    /// at `donor_root`. Both roots must carry the same symbol.
    pub fn graft(
        &mut self,
        at: NodeId,
        donor: &DerivationTree,
        donor_root: NodeId,
    ) -> Result<(), TreeError> {
        let target = self.nodes.get(at).ok_or(TreeError::UnknownNode(at))?;
        if !self.is_attached(at) {
            return Err(TreeError::DetachedNode(at));
        }
        let source = donor
            .nodes
            .get(donor_root)
            .ok_or(TreeError::UnknownNode(donor_root))?;
        if target.symbol != source.symbol {
            return Err(TreeError::SymbolMismatch {
                expected: target.symbol.to_string(),
                found: source.symbol.to_string(),
            });
        }
        self.replace_subtree(at, donor, donor_root);
        Ok(())
    }

    /// Unchecked variant of [`DerivationTree::graft`] used by the evolution
    /// operators, which only ever pair nodes with equal symbols.
    pub(crate) fn replace_subtree(&mut self, at: NodeId, donor: &DerivationTree, donor_root: NodeId) {
        debug_assert_eq!(self.nodes[at].symbol, donor.nodes[donor_root].symbol);

        let excised = self.count_subtree(at);
        let parent = self.nodes[at].parent;
        let source = &donor.nodes[donor_root];

        let new_id = self.nodes.len();
        self.nodes.push(Node {
            symbol: source.symbol.clone(),
            expansion: source.expansion,
            parent,
            children: Vec::new(),
        });
        self.copy_children_from(donor, donor_root, new_id);

        match parent {
            Some(parent_id) => {
                if let Some(slot) = self.nodes[parent_id]
                    .children
                    .iter_mut()
                    .find(|child| **child == at)
                {
                    *slot = new_id;
                }
            }
            None => self.root = new_id,
        }
        self.nodes[at].parent = None;
        self.detached += excised;

        if self.detached > self.size() {
            self.compact();
        }
    }

    /// Whether `id` hangs below the current root. Nodes excised by an earlier
    /// replacement keep their slot in the arena until compaction.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = id;
        loop {
            if current == self.root {
                return true;
            }
            match self.nodes.get(current).and_then(|node| node.parent) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// Drops detached nodes and renumbers the arena from zero.
    pub fn compact(&mut self) {
        if self.detached == 0 && self.root == 0 {
            return;
        }
        let mut compacted = DerivationTree::new(self.nodes[self.root].symbol.clone());
        compacted.nodes[0].expansion = self.nodes[self.root].expansion;
        compacted.copy_children_from(self, self.root, 0);
        *self = compacted;
    }

    /// Checks that the root is the grammar's start symbol, that every
    /// expanded nonterminal matches the alternative it records, and that no
    /// nonterminal is left unexpanded.
    pub fn conforms_to(&self, grammar: &Grammar) -> bool {
        let rooted_at_start = matches!(
            self.root_symbol(),
            Symbol::Nonterminal(name) if name == grammar.start_symbol()
        );
        rooted_at_start && self.preorder().into_iter().all(|id| {
            let node = &self.nodes[id];
            let Symbol::Nonterminal(name) = &node.symbol else {
                return node.children.is_empty();
            };
            let Some(expansion) = node
                .expansion
                .and_then(|alt| grammar.alternatives(name)?.get(alt))
            else {
                return false;
            };
            expansion.symbols().len() == node.children.len()
                && expansion
                    .symbols()
                    .iter()
                    .zip(&node.children)
                    .all(|(symbol, &child)| self.nodes[child].symbol == *symbol)
        })
    }

    fn count_subtree(&self, id: NodeId) -> usize {
        let mut count = 0;
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            count += 1;
            stack.extend(&self.nodes[current].children);
        }
        count
    }

    /// Copies the children of `source_id` in `source` below `target_id`.
    fn copy_children_from(&mut self, source: &DerivationTree, source_id: NodeId, target_id: NodeId) {
        let mut stack = vec![(source_id, target_id)];
        while let Some((from, to)) = stack.pop() {
            for &child in &source.nodes[from].children {
                let child_node = &source.nodes[child];
                let copied = self.add_child(to, child_node.symbol.clone());
                self.nodes[copied].expansion = child_node.expansion;
                stack.push((child, copied));
            }
        }
    }
}

impl fmt::Display for DerivationTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
