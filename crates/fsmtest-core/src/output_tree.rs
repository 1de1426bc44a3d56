use crate::symbols::SymbolTable;
use crate::trace::{IOTrace, InputTrace, OutputTrace};
use crate::tree::Tree;
use std::fmt::Write as _;

/// The reaction of a machine to one input trace: a tree whose edges carry
/// output codes, one root-to-leaf path per nondeterministic output
/// alternative. Paths may be shorter than the input trace when a partial
/// machine rejects a suffix. Each tree node records the machine state
/// reached along its path.
#[derive(Debug, Clone)]
pub struct OutputTree {
    tree: Tree,
    input: InputTrace,
    states: Vec<Option<usize>>,
}

impl OutputTree {
    pub fn new(input: InputTrace, start: usize) -> Self {
        OutputTree { tree: Tree::new(), input, states: vec![Some(start)] }
    }

    pub fn input(&self) -> &InputTrace {
        &self.input
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Extend the path at `node` by an output edge leading to `state`.
    pub(crate) fn grow(&mut self, node: usize, output: u32, state: usize) -> usize {
        let child = self.tree.add_edge(node, output);
        if child == self.states.len() {
            self.states.push(Some(state));
        } else {
            self.states[child] = Some(state);
        }
        child
    }

    pub(crate) fn leaves(&self) -> Vec<usize> {
        self.tree.leaves()
    }

    /// Machine state recorded at a tree node.
    pub fn state_at(&self, node: usize) -> Option<usize> {
        self.states.get(node).copied().flatten()
    }

    /// Machine states at the tree leaves.
    pub fn leaf_states(&self) -> Vec<usize> {
        self.leaves().into_iter().filter_map(|n| self.state_at(n)).collect()
    }

    /// Every machine state recorded anywhere in the tree.
    pub(crate) fn all_states(&self) -> Vec<usize> {
        self.states.iter().copied().flatten().collect()
    }

    pub fn output_traces(&self) -> Vec<OutputTrace> {
        self.tree.io_lists().iter().map(|l| OutputTrace::new(l.clone())).collect()
    }

    /// One IO trace per output alternative, the input truncated to the
    /// executed prefix length of the respective path.
    pub fn to_io_traces(&self) -> Vec<IOTrace> {
        self.tree
            .io_lists()
            .iter()
            .map(|outputs| {
                let inputs = self.input.values()[..outputs.len()].to_vec();
                IOTrace::new(InputTrace::new(inputs), OutputTrace::new(outputs.clone()))
            })
            .collect()
    }

    /// True when every IO trace of `other` also occurs in this tree.
    pub fn contains(&self, other: &OutputTree) -> bool {
        let mine = self.to_io_traces();
        other.to_io_traces().iter().all(|t| mine.contains(t))
    }

    /// `(i/o).(i/o)` rendering, one line per output alternative.
    pub fn render(&self, symbols: &SymbolTable) -> String {
        let mut s = String::new();
        for io in self.to_io_traces() {
            s.push_str(&io.render(symbols));
            s.push('\n');
        }
        s
    }

    /// Graphviz rendering with `input/output` edge labels.
    pub fn to_dot(&self) -> String {
        let mut out =
            String::from("digraph OutputTree {\n\trankdir=TB;\n\tnode [shape = circle];\n");
        let mut next_id = 0usize;
        self.print_dot(Tree::ROOT, 0, &mut next_id, &mut out);
        out.push('}');
        out
    }

    fn print_dot(&self, node: usize, depth: usize, next_id: &mut usize, out: &mut String) {
        let base = *next_id;
        for (label, target) in self.tree.edges(node) {
            *next_id += 1;
            let x = self.input.values().get(depth).copied().unwrap_or_default();
            let _ = writeln!(out, "{base} -> {id}[label = \"{x}/{label}\" ];", id = *next_id);
            self.print_dot(target, depth + 1, next_id, out);
        }
    }
}

impl PartialEq for OutputTree {
    fn eq(&self, other: &Self) -> bool {
        self.contains(other) && other.contains(self)
    }
}

impl Eq for OutputTree {}

#[cfg(test)]
mod tests {
    use super::*;

    fn nondet_reaction() -> OutputTree {
        // Input 0.1 with two alternatives on the first step.
        let mut ot = OutputTree::new(InputTrace::new(vec![0, 1]), 0);
        let a = ot.grow(Tree::ROOT, 5, 1);
        let b = ot.grow(Tree::ROOT, 6, 2);
        ot.grow(a, 7, 0);
        ot.grow(b, 7, 0);
        ot
    }

    #[test]
    fn test_to_io_traces() {
        let ot = nondet_reaction();
        let traces = ot.to_io_traces();
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[0].output().values(), &[5, 7]);
        assert_eq!(traces[1].output().values(), &[6, 7]);
        assert_eq!(traces[0].input().values(), &[0, 1]);
    }

    #[test]
    fn test_truncated_branch() {
        let mut ot = OutputTree::new(InputTrace::new(vec![0, 1]), 0);
        ot.grow(Tree::ROOT, 5, 1);
        let traces = ot.to_io_traces();
        // The single branch consumed one input only.
        assert_eq!(traces[0].input().values(), &[0]);
        assert_eq!(traces[0].output().values(), &[5]);
    }

    #[test]
    fn test_containment_ignores_path_order() {
        let a = nondet_reaction();
        let mut b = OutputTree::new(InputTrace::new(vec![0, 1]), 0);
        let n6 = b.grow(Tree::ROOT, 6, 2);
        let n5 = b.grow(Tree::ROOT, 5, 1);
        b.grow(n6, 7, 0);
        b.grow(n5, 7, 0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_containment_strict() {
        let a = nondet_reaction();
        let mut b = OutputTree::new(InputTrace::new(vec![0, 1]), 0);
        let n5 = b.grow(Tree::ROOT, 5, 1);
        b.grow(n5, 7, 0);
        assert!(a.contains(&b));
        assert!(!b.contains(&a));
        assert_ne!(a, b);
    }

    #[test]
    fn test_leaf_states() {
        let ot = nondet_reaction();
        assert_eq!(ot.leaf_states(), vec![0, 0]);
        assert_eq!(ot.state_at(Tree::ROOT), Some(0));
    }
}
