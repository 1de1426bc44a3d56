use crate::segmented::SegmentedTrace;
use crate::symbols::SymbolTable;
use std::fmt::Write as _;

/// A plain collection of input traces, used to ferry state covers,
/// characterisation sets and enumerations in and out of trees.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceSet {
    lists: Vec<Vec<u32>>,
}

impl TraceSet {
    pub fn new(lists: Vec<Vec<u32>>) -> Self {
        TraceSet { lists }
    }

    /// All input sequences over `0..=max_input` with lengths in
    /// `min_len..=max_len`, enumerated per length in odometer order.
    pub fn input_enumeration(max_input: u32, min_len: usize, max_len: usize) -> Self {
        let mut lists = Vec::new();
        for len in min_len..=max_len {
            if len == 0 {
                lists.push(Vec::new());
                continue;
            }
            let mut cur = vec![0u32; len];
            loop {
                lists.push(cur.clone());
                // Advance the rightmost position that is below max_input.
                match cur.iter().rposition(|&e| e < max_input) {
                    Some(i) => {
                        cur[i] += 1;
                        for e in cur[i + 1..].iter_mut() {
                            *e = 0;
                        }
                    }
                    None => break,
                }
            }
        }
        TraceSet { lists }
    }

    pub fn push(&mut self, trace: Vec<u32>) {
        self.lists.push(trace);
    }

    pub fn lists(&self) -> &[Vec<u32>] {
        &self.lists
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Vec<u32>> {
        self.lists.iter()
    }

    /// `{ a.b, c.d }` rendering with input names.
    pub fn render(&self, symbols: &SymbolTable) -> String {
        let body = self
            .lists
            .iter()
            .map(|l| {
                if l.is_empty() {
                    "eps".to_string()
                } else {
                    l.iter().map(|&x| symbols.input_name(x)).collect::<Vec<_>>().join(".")
                }
            })
            .collect::<Vec<_>>()
            .join(",\n  ");
        format!("{{ {body} }}")
    }
}

impl<'a> IntoIterator for &'a TraceSet {
    type Item = &'a Vec<u32>;
    type IntoIter = std::slice::Iter<'a, Vec<u32>>;

    fn into_iter(self) -> Self::IntoIter {
        self.lists.iter()
    }
}

#[derive(Debug, Clone)]
struct TreeEdge {
    label: u32,
    target: usize,
}

#[derive(Debug, Clone, Default)]
struct TreeNode {
    /// Parent index and the label of the incoming edge. `None` for the root.
    parent: Option<(usize, u32)>,
    edges: Vec<TreeEdge>,
    deleted: bool,
}

/// Result classes of [`Tree::tentative_add_to_root`].
pub const TENTATIVE_CONTAINED: u8 = 0;
pub const TENTATIVE_EXTENDS_LEAF: u8 = 1;
pub const TENTATIVE_BRANCHES: u8 = 2;

/// A rooted tree of integer-labelled edges, the shared representation of
/// test suites, covers, characterisation sets and identification sets.
/// Nodes live in an arena; node 0 is the root. Edges leaving one node
/// carry pairwise distinct labels, so inserting an already-present trace
/// reuses the existing branch. Unlinked nodes stay behind in the arena as
/// unreachable garbage.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<TreeNode>,
}

impl Default for Tree {
    fn default() -> Self {
        Tree::new()
    }
}

impl Tree {
    pub fn new() -> Self {
        Tree { nodes: vec![TreeNode::default()] }
    }

    pub const ROOT: usize = 0;

    /// True when the tree consists of the root only.
    pub fn is_root_only(&self) -> bool {
        self.nodes[Self::ROOT].edges.is_empty()
    }

    pub fn child(&self, node: usize, label: u32) -> Option<usize> {
        self.nodes[node].edges.iter().find(|e| e.label == label).map(|e| e.target)
    }

    fn children(&self, node: usize) -> impl Iterator<Item = (u32, usize)> + '_ {
        self.nodes[node].edges.iter().map(|e| (e.label, e.target))
    }

    /// Labelled edges leaving `node`, in insertion order.
    pub fn edges(&self, node: usize) -> Vec<(u32, usize)> {
        self.nodes[node].edges.iter().map(|e| (e.label, e.target)).collect()
    }

    fn is_leaf(&self, node: usize) -> bool {
        self.nodes[node].edges.is_empty()
    }

    /// Follow the edge labelled `label`, creating it if absent.
    pub fn add_edge(&mut self, node: usize, label: u32) -> usize {
        if let Some(t) = self.child(node, label) {
            return t;
        }
        let id = self.nodes.len();
        self.nodes.push(TreeNode { parent: Some((node, label)), edges: Vec::new(), deleted: false });
        self.nodes[node].edges.push(TreeEdge { label, target: id });
        id
    }

    /// Extend the tree along `trace` starting at `node`; returns the node
    /// reached by the final element.
    pub fn extend_path(&mut self, node: usize, trace: &[u32]) -> usize {
        let mut cur = node;
        for &x in trace {
            cur = self.add_edge(cur, x);
        }
        cur
    }

    pub fn add_to_root(&mut self, trace: &[u32]) {
        self.extend_path(Self::ROOT, trace);
    }

    /// Append every trace of `set` at the root only.
    pub fn add_traces_at_root(&mut self, set: &TraceSet) {
        for trace in set {
            self.add_to_root(trace);
        }
    }

    /// Append every trace of `set` beneath `node`.
    pub fn add_traces_at(&mut self, node: usize, set: &TraceSet) {
        for trace in set {
            self.extend_path(node, trace);
        }
    }

    /// Append every trace of `set` at every node that existed before the
    /// call (the nodes created by the appends themselves are not extended
    /// again).
    pub fn add(&mut self, set: &TraceSet) {
        let existing = self.live_nodes();
        for node in existing {
            for trace in set {
                self.extend_path(node, trace);
            }
        }
    }

    /// Node reached from `node` by following `trace`, if the whole trace
    /// is present.
    pub fn after(&self, node: usize, trace: &[u32]) -> Option<usize> {
        let mut cur = node;
        for &x in trace {
            cur = self.child(cur, x)?;
        }
        Some(cur)
    }

    /// Root-to-node label path.
    pub fn path_of(&self, node: usize) -> Vec<u32> {
        let mut path = Vec::new();
        let mut cur = node;
        while let Some((parent, label)) = self.nodes[cur].parent {
            path.push(label);
            cur = parent;
        }
        path.reverse();
        path
    }

    /// All nodes reachable from the root, in depth-first child order.
    fn live_nodes(&self) -> Vec<usize> {
        let mut order = Vec::new();
        let mut stack = vec![Self::ROOT];
        while let Some(n) = stack.pop() {
            order.push(n);
            for e in self.nodes[n].edges.iter().rev() {
                stack.push(e.target);
            }
        }
        order
    }

    /// Leaves in depth-first child order.
    pub fn leaves(&self) -> Vec<usize> {
        self.live_nodes().into_iter().filter(|&n| self.is_leaf(n)).collect()
    }

    /// Number of nodes reachable from the root.
    pub fn size(&self) -> usize {
        self.live_nodes().len()
    }

    /// The root-to-leaf traces. A root-only tree yields one empty trace.
    pub fn io_lists(&self) -> TraceSet {
        let mut lists = Vec::new();
        self.collect_paths(Self::ROOT, &mut Vec::new(), &mut lists, true);
        TraceSet::new(lists)
    }

    /// Root-to-node traces for every node, leaves and interior alike, in
    /// post-order; includes the empty trace of the root.
    pub fn io_lists_with_prefixes(&self) -> TraceSet {
        let mut lists = Vec::new();
        self.collect_paths(Self::ROOT, &mut Vec::new(), &mut lists, false);
        TraceSet::new(lists)
    }

    fn collect_paths(
        &self,
        node: usize,
        prefix: &mut Vec<u32>,
        out: &mut Vec<Vec<u32>>,
        leaves_only: bool,
    ) {
        for (label, target) in self.children(node).collect::<Vec<_>>() {
            prefix.push(label);
            self.collect_paths(target, prefix, out, leaves_only);
            prefix.pop();
        }
        if !leaves_only || self.is_leaf(node) {
            out.push(prefix.clone());
        }
    }

    /// Merge the other tree's traces into this one at the root. Merging is
    /// idempotent: repeating the union leaves the tree unchanged.
    pub fn union_tree(&mut self, other: &Tree) {
        self.add_traces_at_root(&other.io_lists());
    }

    /// Deep copy of the subtree reached by `prefix`; an empty tree when the
    /// prefix is not present.
    pub fn sub_tree(&self, prefix: &[u32]) -> Tree {
        let mut out = Tree::new();
        if let Some(src) = self.after(Self::ROOT, prefix) {
            self.copy_into(src, &mut out, Tree::ROOT);
        }
        out
    }

    fn copy_into(&self, src: usize, out: &mut Tree, dst: usize) {
        for (label, target) in self.children(src).collect::<Vec<_>>() {
            let d = out.add_edge(dst, label);
            self.copy_into(target, out, d);
        }
    }

    fn in_prefix_relation(a: &[u32], b: &[u32]) -> bool {
        if a.is_empty() || b.is_empty() {
            return false;
        }
        a.iter().zip(b.iter()).all(|(x, y)| x == y)
    }

    /// The tree of exactly those traces of `self` and `other` that are
    /// prefix-comparable with a trace of the opposite tree. A root-only
    /// operand short-circuits to a copy of the other operand.
    pub fn prefix_relation_tree(&self, other: &Tree) -> Tree {
        if self.is_root_only() && other.is_root_only() {
            return Tree::new();
        }
        if self.is_root_only() {
            return other.clone();
        }
        if other.is_root_only() {
            return self.clone();
        }
        let a = self.io_lists();
        let b = other.io_lists();
        let mut out = Tree::new();
        for ap in &a {
            for bp in &b {
                if Self::in_prefix_relation(ap, bp) {
                    out.add_to_root(ap);
                    out.add_to_root(bp);
                }
            }
        }
        out
    }

    fn tentative_add_at(&self, mut node: usize, trace: &[u32]) -> (u8, usize) {
        for &x in trace {
            if self.is_leaf(node) {
                return (TENTATIVE_EXTENDS_LEAF, node);
            }
            match self.child(node, x) {
                Some(next) => node = next,
                None => return (TENTATIVE_BRANCHES, node),
            }
        }
        (TENTATIVE_CONTAINED, node)
    }

    /// Classify the cost of adding `trace` at the root without mutating the
    /// tree: 0 if the trace is already covered, 1 if it only lengthens the
    /// tree at a leaf, 2 if it would open a new branch.
    pub fn tentative_add_to_root(&self, trace: &[u32]) -> u8 {
        self.tentative_add_at(Self::ROOT, trace).0
    }

    /// Segment-wise variant of [`Tree::tentative_add_to_root`] over the
    /// live content of a segmented trace.
    pub fn tentative_add_segmented(&self, trace: &SegmentedTrace) -> u8 {
        let mut node = Self::ROOT;
        for seg in trace.segments() {
            let (r, reached) = self.tentative_add_at(node, seg.live());
            if r > 0 {
                return r;
            }
            node = reached;
        }
        TENTATIVE_CONTAINED
    }

    /// Remove the traces shared with `other`: walking both trees in
    /// lockstep from the roots, every node on a shared path is marked
    /// deleted, and deleted nodes are unlinked once the walk has left them
    /// as leaves (unlinking cascades into parents that become deleted
    /// leaves themselves).
    pub fn remove(&mut self, other: &Tree) {
        self.remove_rec(Self::ROOT, other, Tree::ROOT);
    }

    fn remove_rec(&mut self, node: usize, other: &Tree, other_node: usize) {
        self.nodes[node].deleted = true;
        let pairs: Vec<(usize, usize)> = self
            .children(node)
            .filter_map(|(label, target)| other.child(other_node, label).map(|o| (target, o)))
            .collect();
        for (child, other_child) in pairs {
            self.remove_rec(child, other, other_child);
        }
        // Garbage-collect children that ended up as deleted leaves.
        let doomed: Vec<usize> = self
            .children(node)
            .filter(|&(_, t)| self.nodes[t].deleted && self.nodes[t].edges.is_empty())
            .map(|(_, t)| t)
            .collect();
        self.nodes[node].edges.retain(|e| !doomed.contains(&e.target));
    }

    /// Graphviz rendering with numeric edge labels.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph Tree {\n\trankdir=TB;\n\tnode [shape = circle];\n");
        let mut next_id = 0usize;
        self.print_dot(Self::ROOT, &mut next_id, &mut out);
        out.push('}');
        out
    }

    fn print_dot(&self, node: usize, next_id: &mut usize, out: &mut String) {
        let base = *next_id;
        for (label, target) in self.children(node).collect::<Vec<_>>() {
            *next_id += 1;
            let _ = writeln!(out, "{base} -> {next_id}[label = \"{label}\" ];", next_id = *next_id);
            self.print_dot(target, next_id, out);
        }
    }
}
