use crate::error::FsmError;
use crate::fsm::Fsm;
use rustc_hash::FxHashMap;

/// One row of the transition table of a deterministic machine: the output
/// and successor per input. `None` marks inputs without a transition
/// (partial machines).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfsmTableRow {
    pub outputs: Vec<Option<u32>>,
    pub next: Vec<Option<usize>>,
}

/// Transition table of a deterministic machine, one row per state indexed
/// by state id. Construction fails on the first state with two transitions
/// for the same input.
#[derive(Debug, Clone)]
pub struct DfsmTable {
    rows: Vec<DfsmTableRow>,
    num_inputs: usize,
}

impl DfsmTable {
    pub fn build(fsm: &Fsm) -> Result<DfsmTable, FsmError> {
        let num_inputs = fsm.max_input() as usize + 1;
        let mut rows = Vec::with_capacity(fsm.size());
        for node in fsm.nodes() {
            let mut row = DfsmTableRow {
                outputs: vec![None; num_inputs],
                next: vec![None; num_inputs],
            };
            for tr in node.transitions() {
                let x = tr.label.input as usize;
                if row.outputs[x].is_some() {
                    return Err(FsmError::Nondeterministic);
                }
                row.outputs[x] = Some(tr.label.output);
                row.next[x] = Some(tr.target);
            }
            rows.push(row);
        }
        Ok(DfsmTable { rows, num_inputs })
    }

    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    pub fn rows(&self) -> &[DfsmTableRow] {
        &self.rows
    }

    pub fn row(&self, state: usize) -> &DfsmTableRow {
        &self.rows[state]
    }
}

/// One refinement level: the partition of the state set as a class index
/// per state. Class ids are assigned in order of first occurrence, so the
/// class of state 0 is always 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionLevel {
    pub class_of: Vec<usize>,
    pub num_classes: usize,
}

fn partition_by<K: std::hash::Hash + Eq>(keys: Vec<K>) -> PartitionLevel {
    let mut ids: FxHashMap<K, usize> = FxHashMap::default();
    let mut class_of = Vec::with_capacity(keys.len());
    for key in keys {
        let next = ids.len();
        let id = *ids.entry(key).or_insert(next);
        class_of.push(id);
    }
    PartitionLevel { num_classes: ids.len(), class_of }
}

/// The Pk-table sequence of a deterministic machine: `levels[0]` is P1
/// (states grouped by output vector), each further level refines its
/// predecessor by successor classes, and the final level is the fixpoint
/// partition into Moore-equivalence classes.
#[derive(Debug, Clone)]
pub struct PkTables {
    levels: Vec<PartitionLevel>,
}

impl PkTables {
    pub fn build(table: &DfsmTable) -> PkTables {
        let p1 = partition_by(table.rows.iter().map(|r| r.outputs.clone()).collect());
        let mut levels = vec![p1];
        loop {
            let prev = levels.last().expect("at least P1");
            let keys: Vec<(usize, Vec<Option<usize>>)> = table
                .rows
                .iter()
                .enumerate()
                .map(|(s, r)| {
                    let succ = r.next.iter().map(|n| n.map(|t| prev.class_of[t])).collect();
                    (prev.class_of[s], succ)
                })
                .collect();
            let next = partition_by(keys);
            if next.num_classes == prev.num_classes {
                break;
            }
            levels.push(next);
        }
        PkTables { levels }
    }

    pub fn levels(&self) -> &[PartitionLevel] {
        &self.levels
    }

    pub fn last(&self) -> &PartitionLevel {
        self.levels.last().expect("at least P1")
    }

    /// Class of `state` in `P_{level+1}` (`level` 0 is P1).
    pub fn class_of(&self, level: usize, state: usize) -> usize {
        self.levels[level].class_of[state]
    }
}

/// The OFSM-table sequence of a nondeterministic observable machine. The
/// successor map is shared across levels: for each state and (input,
/// output) pair, the unique successor if the transition is enabled.
/// `levels[0]` puts all states in one class; the first refinement
/// separates states by their enabled (input, output) signature.
#[derive(Debug, Clone)]
pub struct OfsmTables {
    num_outputs: usize,
    post: Vec<Vec<Option<usize>>>,
    levels: Vec<PartitionLevel>,
}

impl OfsmTables {
    /// Requires an observable machine; the per-(state, input, output)
    /// successor is unique by observability.
    pub fn build(fsm: &Fsm) -> OfsmTables {
        let num_inputs = fsm.max_input() as usize + 1;
        let num_outputs = fsm.max_output() as usize + 1;
        let mut post = vec![vec![None; num_inputs * num_outputs]; fsm.size()];
        for (s, node) in fsm.nodes().iter().enumerate() {
            for tr in node.transitions() {
                let idx = tr.label.input as usize * num_outputs + tr.label.output as usize;
                post[s][idx] = Some(tr.target);
            }
        }

        let level0 = PartitionLevel {
            class_of: vec![0; fsm.size()],
            num_classes: usize::from(fsm.size() > 0),
        };
        let mut tables = OfsmTables { num_outputs, post, levels: vec![level0] };
        loop {
            let prev = tables.levels.last().expect("at least the trivial level");
            let keys: Vec<(usize, Vec<Option<usize>>)> = tables
                .post
                .iter()
                .enumerate()
                .map(|(s, row)| {
                    let succ = row.iter().map(|p| p.map(|t| prev.class_of[t])).collect();
                    (prev.class_of[s], succ)
                })
                .collect();
            let next = partition_by(keys);
            if next.num_classes == prev.num_classes {
                break;
            }
            tables.levels.push(next);
        }
        tables
    }

    pub fn levels(&self) -> &[PartitionLevel] {
        &self.levels
    }

    pub fn last(&self) -> &PartitionLevel {
        self.levels.last().expect("at least the trivial level")
    }

    pub fn class_of(&self, level: usize, state: usize) -> usize {
        self.levels[level].class_of[state]
    }

    /// Successor of `state` under `input/output`, `None` when the
    /// transition is not enabled.
    pub fn post(&self, state: usize, input: u32, output: u32) -> Option<usize> {
        self.post[state][input as usize * self.num_outputs + output as usize]
    }

    /// Compare the successor columns of two (input, output) pairs cell by
    /// cell; equal columns mean the pairs act identically on every state.
    pub fn compare_columns(&self, x1: u32, y1: u32, x2: u32, y2: u32) -> bool {
        let i1 = x1 as usize * self.num_outputs + y1 as usize;
        let i2 = x2 as usize * self.num_outputs + y2 as usize;
        self.post.iter().all(|row| row[i1] == row[i2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::{Fsm, FsmNode, FsmTransition};
    use crate::symbols::SymbolTable;

    /// Complete 3-state DFSM where states 1 and 2 are Moore-equivalent.
    fn mergeable_dfsm() -> Fsm {
        let mut nodes: Vec<FsmNode> = (0..3).map(|i| FsmNode::new(i, "")).collect();
        nodes[0].add_transition(FsmTransition::new(1, 0, 0));
        nodes[0].add_transition(FsmTransition::new(2, 1, 1));
        nodes[1].add_transition(FsmTransition::new(0, 0, 1));
        nodes[1].add_transition(FsmTransition::new(1, 1, 0));
        nodes[2].add_transition(FsmTransition::new(0, 0, 1));
        nodes[2].add_transition(FsmTransition::new(2, 1, 0));
        Fsm::from_parts("m", 1, 1, nodes, SymbolTable::default())
    }

    #[test]
    fn test_dfsm_table_rows() {
        let fsm = mergeable_dfsm();
        let t = DfsmTable::build(&fsm).unwrap();
        assert_eq!(t.row(0).outputs, vec![Some(0), Some(1)]);
        assert_eq!(t.row(1).next, vec![Some(0), Some(1)]);
    }

    #[test]
    fn test_dfsm_table_rejects_nondeterminism() {
        let mut nodes = vec![FsmNode::new(0, "")];
        nodes[0].add_transition(FsmTransition::new(0, 0, 0));
        nodes[0].add_transition(FsmTransition::new(0, 0, 1));
        let fsm = Fsm::from_parts("n", 0, 1, nodes, SymbolTable::default());
        assert!(matches!(DfsmTable::build(&fsm), Err(FsmError::Nondeterministic)));
    }

    #[test]
    fn test_pk_fixpoint_merges_equivalent_states() {
        let fsm = mergeable_dfsm();
        let t = DfsmTable::build(&fsm).unwrap();
        let pk = PkTables::build(&t);
        let last = pk.last();
        assert_eq!(last.num_classes, 2);
        assert_eq!(last.class_of[1], last.class_of[2]);
        assert_ne!(last.class_of[0], last.class_of[1]);
    }

    #[test]
    fn test_pk_fixpoint_is_stable() {
        let fsm = mergeable_dfsm();
        let t = DfsmTable::build(&fsm).unwrap();
        let pk = PkTables::build(&t);
        // Refining the final level once more must not split any class.
        let prev = pk.last();
        let keys: Vec<(usize, Vec<Option<usize>>)> = t
            .rows()
            .iter()
            .enumerate()
            .map(|(s, r)| {
                let succ = r.next.iter().map(|n| n.map(|x| prev.class_of[x])).collect();
                (prev.class_of[s], succ)
            })
            .collect();
        assert_eq!(partition_by(keys).class_of, prev.class_of);
    }

    #[test]
    fn test_pk_distinct_states_separate() {
        // Chain 0 -> 1 -> 2 with distinct distances to the output change.
        let mut nodes: Vec<FsmNode> = (0..3).map(|i| FsmNode::new(i, "")).collect();
        nodes[0].add_transition(FsmTransition::new(1, 0, 0));
        nodes[1].add_transition(FsmTransition::new(2, 0, 0));
        nodes[2].add_transition(FsmTransition::new(2, 0, 1));
        let fsm = Fsm::from_parts("chain", 0, 1, nodes, SymbolTable::default());
        let pk = PkTables::build(&DfsmTable::build(&fsm).unwrap());
        assert_eq!(pk.last().num_classes, 3);
        assert_eq!(pk.levels().len(), 2);
    }

    /// Observable nondeterministic machine: state 0 reacts to input 0 with
    /// two distinct outputs.
    fn observable_nondet() -> Fsm {
        let mut nodes: Vec<FsmNode> = (0..3).map(|i| FsmNode::new(i, "")).collect();
        nodes[0].add_transition(FsmTransition::new(1, 0, 0));
        nodes[0].add_transition(FsmTransition::new(2, 0, 1));
        nodes[1].add_transition(FsmTransition::new(1, 0, 0));
        nodes[2].add_transition(FsmTransition::new(2, 0, 1));
        Fsm::from_parts("o", 0, 1, nodes, SymbolTable::default())
    }

    #[test]
    fn test_ofsm_refines_by_enabled_signature() {
        let fsm = observable_nondet();
        let t = OfsmTables::build(&fsm);
        assert_eq!(t.levels()[0].num_classes, 1);
        let last = t.last();
        // 0 enables both outputs, 1 only 0/0, 2 only 0/1.
        assert_eq!(last.num_classes, 3);
        assert_eq!(t.post(0, 0, 1), Some(2));
        assert_eq!(t.post(1, 0, 1), None);
    }

    #[test]
    fn test_ofsm_compare_columns() {
        let mut nodes: Vec<FsmNode> = (0..2).map(|i| FsmNode::new(i, "")).collect();
        // Inputs 0 and 1 act identically everywhere, input 2 differs.
        for s in 0..2usize {
            let tgt = (s + 1) % 2;
            nodes[s].add_transition(FsmTransition::new(tgt, 0, 0));
            nodes[s].add_transition(FsmTransition::new(tgt, 1, 0));
            nodes[s].add_transition(FsmTransition::new(s, 2, 0));
        }
        let fsm = Fsm::from_parts("cols", 2, 0, nodes, SymbolTable::default());
        let t = OfsmTables::build(&fsm);
        assert!(t.compare_columns(0, 0, 1, 0));
        assert!(!t.compare_columns(0, 0, 2, 0));
    }
}
