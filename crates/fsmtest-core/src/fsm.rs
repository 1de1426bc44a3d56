use crate::error::FsmError;
use crate::hitting::min_cardinality_hitting_set;
use crate::output_tree::OutputTree;
use crate::suite::TestSuite;
use crate::symbols::SymbolTable;
use crate::tables::{DfsmTable, OfsmTables};
use crate::trace::InputTrace;
use crate::tree::{TraceSet, Tree};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use std::fmt::Write as _;
use tracing::warn;

/// Transition label: one input/output pair. Compared by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FsmLabel {
    pub input: u32,
    pub output: u32,
}

#[derive(Debug, Clone)]
pub struct FsmTransition {
    pub target: usize,
    pub label: FsmLabel,
    pub requirements: Vec<String>,
}

impl FsmTransition {
    pub fn new(target: usize, input: u32, output: u32) -> Self {
        FsmTransition { target, label: FsmLabel { input, output }, requirements: Vec::new() }
    }
}

/// Visit color used by the breadth-first cover constructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Color {
    #[default]
    White,
    Grey,
    Black,
}

/// A machine state. The `name` acts as a naming prefix that applies when
/// the owning machine's symbol table carries no entry for the state id.
#[derive(Debug, Clone)]
pub struct FsmNode {
    pub id: usize,
    pub name: String,
    pub initial: bool,
    pub requirements: Vec<String>,
    pub(crate) color: Color,
    pub(crate) visited: bool,
    transitions: Vec<FsmTransition>,
}

impl FsmNode {
    pub fn new(id: usize, name: &str) -> Self {
        FsmNode {
            id,
            name: name.to_string(),
            initial: false,
            requirements: Vec::new(),
            color: Color::White,
            visited: false,
            transitions: Vec::new(),
        }
    }

    /// Add an outgoing transition. A transition with the same label and the
    /// same target as an existing one is silently ignored.
    pub fn add_transition(&mut self, tr: FsmTransition) {
        if self.transitions.iter().any(|t| t.target == tr.target && t.label == tr.label) {
            return;
        }
        self.transitions.push(tr);
    }

    pub fn transitions(&self) -> &[FsmTransition] {
        &self.transitions
    }

    pub(crate) fn transitions_mut(&mut self) -> &mut [FsmTransition] {
        &mut self.transitions
    }

    /// Targets of the transitions triggered by `input`, in insertion order.
    pub fn targets_on(&self, input: u32) -> Vec<usize> {
        self.transitions.iter().filter(|t| t.label.input == input).map(|t| t.target).collect()
    }

    pub fn has_been_visited(&self) -> bool {
        self.visited
    }

    /// No two outgoing transitions share input and output.
    pub fn is_observable(&self) -> bool {
        for (i, tr) in self.transitions.iter().enumerate() {
            if self.transitions[i + 1..].iter().any(|o| o.label == tr.label) {
                return false;
            }
        }
        true
    }

    /// At most one outgoing transition per input.
    pub fn is_deterministic(&self) -> bool {
        let mut seen = FxHashSet::default();
        self.transitions.iter().all(|t| seen.insert(t.label.input))
    }
}

/// A Mealy-style FSM, possibly nondeterministic and partial. States live
/// in a vector and are addressed by index; transitions refer to their
/// target by index. After [`Fsm::remove_unreachable`] state ids coincide
/// with vector positions, which the table algorithms rely on.
#[derive(Debug, Clone)]
pub struct Fsm {
    name: String,
    max_input: u32,
    max_output: u32,
    init_state: usize,
    nodes: Vec<FsmNode>,
    symbols: SymbolTable,
    pub(crate) ofsm: Option<OfsmTables>,
    pub(crate) char_set: Option<Tree>,
    pub(crate) ident_sets: Vec<Tree>,
    pub(crate) minimal: Option<bool>,
}

impl Fsm {
    /// Assemble a machine from prepared nodes. Node ids are normalised to
    /// vector positions; the initial state is the first node with the
    /// `initial` flag, defaulting to node 0.
    pub fn from_parts(
        name: &str,
        max_input: u32,
        max_output: u32,
        mut nodes: Vec<FsmNode>,
        symbols: SymbolTable,
    ) -> Fsm {
        let init_state = nodes.iter().position(|n| n.initial).unwrap_or(0);
        for (i, n) in nodes.iter_mut().enumerate() {
            n.id = i;
            n.initial = i == init_state;
            n.color = Color::White;
            n.visited = false;
        }
        Fsm {
            name: name.to_string(),
            max_input,
            max_output,
            init_state,
            nodes,
            symbols,
            ofsm: None,
            char_set: None,
            ident_sets: Vec::new(),
            minimal: None,
        }
    }

    /// Parse the line-oriented model format: one `source input output
    /// target` quadruple per line, alphabets inferred from the largest
    /// indices seen, the first source defining the initial state.
    pub fn parse_line_format(
        text: &str,
        name: &str,
        symbols: SymbolTable,
    ) -> Result<Fsm, FsmError> {
        let mut quads = Vec::new();
        let (mut max_state, mut max_input, mut max_output) = (0i64, 0i64, 0i64);
        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<i64> = line
                .split_whitespace()
                .map(|t| {
                    t.parse::<i64>().map_err(|_| {
                        FsmError::Parse(format!("line {}: `{t}` is not a number", lineno + 1))
                    })
                })
                .collect::<Result<_, _>>()?;
            if fields.len() != 4 {
                return Err(FsmError::Parse(format!(
                    "line {}: expected `source input output target`",
                    lineno + 1
                )));
            }
            let [source, input, output, target] = [fields[0], fields[1], fields[2], fields[3]];
            if source < 0 || input < 0 || output < 0 || target < 0 {
                continue;
            }
            max_state = max_state.max(source).max(target);
            max_input = max_input.max(input);
            max_output = max_output.max(output);
            quads.push((source as usize, input as u32, output as u32, target as usize));
        }
        if quads.is_empty() {
            return Err(FsmError::Parse("model contains no transitions".to_string()));
        }

        let mut nodes: Vec<FsmNode> =
            (0..=max_state as usize).map(|i| FsmNode::new(i, name)).collect();
        for &(source, input, output, target) in &quads {
            nodes[source].add_transition(FsmTransition::new(target, input, output));
        }
        nodes[quads[0].0].initial = true;
        Ok(Fsm::from_parts(name, max_input as u32, max_output as u32, nodes, symbols))
    }

    /// Line-format dump, the inverse of [`Fsm::parse_line_format`] up to
    /// transition order.
    pub fn dump_line_format(&self) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            for tr in node.transitions() {
                let _ = writeln!(
                    out,
                    "{} {} {} {}",
                    node.id, tr.label.input, tr.label.output, tr.target
                );
            }
        }
        out
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn max_input(&self) -> u32 {
        self.max_input
    }

    pub fn max_output(&self) -> u32 {
        self.max_output
    }

    pub fn initial_state(&self) -> usize {
        self.init_state
    }

    pub fn nodes(&self) -> &[FsmNode] {
        &self.nodes
    }

    pub fn node(&self, id: usize) -> &FsmNode {
        &self.nodes[id]
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn is_minimal(&self) -> Option<bool> {
        self.minimal
    }

    /// Display name of a state: the symbol-table entry when present, the
    /// node's naming prefix plus id otherwise.
    pub fn node_name(&self, id: usize) -> String {
        self.symbols.state_name(id, &self.nodes[id].name)
    }

    pub(crate) fn reset_colors(&mut self) {
        for n in &mut self.nodes {
            n.color = Color::White;
        }
    }

    pub(crate) fn reset_visited(&mut self) {
        for n in &mut self.nodes {
            n.visited = false;
        }
    }

    pub fn is_observable(&self) -> bool {
        self.nodes.iter().all(FsmNode::is_observable)
    }

    pub fn is_deterministic(&self) -> bool {
        self.nodes.iter().all(FsmNode::is_deterministic)
    }

    /// Every state reacts to every input of the alphabet.
    pub fn is_completely_defined(&self) -> bool {
        self.nodes.iter().all(|n| {
            (0..=self.max_input).all(|x| n.transitions().iter().any(|t| t.label.input == x))
        })
    }

    /// States reachable from `start` under `trace`, sorted ascending.
    pub fn after_trace(&self, start: usize, trace: &[u32]) -> Vec<usize> {
        let mut cur = vec![start];
        for &x in trace {
            let mut next: Vec<usize> = Vec::new();
            for &s in &cur {
                for t in self.nodes[s].targets_on(x) {
                    if !next.contains(&t) {
                        next.push(t);
                    }
                }
            }
            next.sort_unstable();
            cur = next;
        }
        cur
    }

    /// Apply an input trace starting at `start`. Every frontier state
    /// spawns one output edge per matching transition; a branch with no
    /// matching transition ends, retaining the longest executed prefix.
    pub fn apply_from(&self, start: usize, itrc: &InputTrace) -> OutputTree {
        let mut ot = OutputTree::new(itrc.clone(), start);
        let mut frontier: Vec<(usize, usize)> = vec![(Tree::ROOT, start)];
        for &x in itrc.values() {
            let mut next: Vec<(usize, usize)> = Vec::new();
            for &(tn, s) in &frontier {
                for tr in self.nodes[s].transitions() {
                    if tr.label.input == x {
                        let child = ot.grow(tn, tr.label.output, tr.target);
                        if !next.contains(&(child, tr.target)) {
                            next.push((child, tr.target));
                        }
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        ot
    }

    pub fn apply(&self, itrc: &InputTrace) -> OutputTree {
        self.apply_from(self.init_state, itrc)
    }

    /// Apply from the initial state and mark every state touched by the
    /// run (including the start) as visited.
    pub fn apply_marking(&mut self, itrc: &InputTrace) -> OutputTree {
        let ot = self.apply_from(self.init_state, itrc);
        self.nodes[self.init_state].visited = true;
        for s in ot.all_states() {
            self.nodes[s].visited = true;
        }
        ot
    }

    fn label_string(&self, subset: &[usize]) -> String {
        let body = subset
            .iter()
            .map(|&s| format!("{}({s})", self.node_name(s)))
            .collect::<Vec<_>>()
            .join(",");
        format!("{{ {body} }}")
    }

    /// Subset construction over state sets: the result has one state per
    /// reachable subset and one transition per (input, output) pair
    /// enabled by at least one subset member. Observable by construction.
    pub fn transform_to_observable(&self) -> Fsm {
        let mut symbols = SymbolTable::new(
            self.symbols.input_names().to_vec(),
            self.symbols.output_names().to_vec(),
            Vec::new(),
        );
        let mut subset_ids: FxHashMap<Vec<usize>, usize> = FxHashMap::default();
        let mut subsets: Vec<Vec<usize>> = Vec::new();
        let mut nodes: Vec<FsmNode> = Vec::new();

        let initial = vec![self.init_state];
        let label = self.label_string(&initial);
        subset_ids.insert(initial.clone(), 0);
        subsets.push(initial);
        nodes.push(FsmNode::new(0, &label));
        symbols.add_state(label);

        let mut queue: VecDeque<usize> = VecDeque::from([0]);
        while let Some(q) = queue.pop_front() {
            for x in 0..=self.max_input {
                for y in 0..=self.max_output {
                    let mut targets: Vec<usize> = Vec::new();
                    for &member in &subsets[q] {
                        for tr in self.nodes[member].transitions() {
                            if tr.label == (FsmLabel { input: x, output: y })
                                && !targets.contains(&tr.target)
                            {
                                targets.push(tr.target);
                            }
                        }
                    }
                    if targets.is_empty() {
                        continue;
                    }
                    targets.sort_unstable();
                    let target_id = match subset_ids.get(&targets) {
                        Some(&id) => id,
                        None => {
                            let id = nodes.len();
                            let label = self.label_string(&targets);
                            subset_ids.insert(targets.clone(), id);
                            subsets.push(targets);
                            nodes.push(FsmNode::new(id, &label));
                            symbols.add_state(label);
                            queue.push_back(id);
                            id
                        }
                    };
                    nodes[q].add_transition(FsmTransition::new(target_id, x, y));
                }
            }
        }

        Fsm::from_parts(&format!("{}_O", self.name), self.max_input, self.max_output, nodes, symbols)
    }

    /// Product machine accepting exactly the IO traces accepted by both
    /// operands. Breadth-first over state pairs from the initial pair.
    pub fn intersect(&self, other: &Fsm) -> Fsm {
        let mut symbols = SymbolTable::new(
            self.symbols.input_names().to_vec(),
            self.symbols.output_names().to_vec(),
            Vec::new(),
        );
        let mut pair_ids: FxHashMap<(usize, usize), usize> = FxHashMap::default();
        let mut nodes: Vec<FsmNode> = Vec::new();
        let mut queue: VecDeque<(usize, usize)> = VecDeque::new();

        let init_pair = (self.init_state, other.init_state);
        let name = format!("({},{})", self.node_name(init_pair.0), other.node_name(init_pair.1));
        symbols.add_state(name.clone());
        nodes.push(FsmNode::new(0, &name));
        pair_ids.insert(init_pair, 0);
        queue.push_back(init_pair);

        while let Some((a, b)) = queue.pop_front() {
            let source = pair_ids[&(a, b)];
            for tr in self.nodes[a].transitions() {
                for tr_other in other.nodes[b].transitions() {
                    if tr.label == tr_other.label {
                        let pair = (tr.target, tr_other.target);
                        let target = match pair_ids.get(&pair) {
                            Some(&id) => id,
                            None => {
                                let id = nodes.len();
                                let name = format!(
                                    "({},{})",
                                    self.node_name(pair.0),
                                    other.node_name(pair.1)
                                );
                                symbols.add_state(name.clone());
                                nodes.push(FsmNode::new(id, &name));
                                pair_ids.insert(pair, id);
                                queue.push_back(pair);
                                id
                            }
                        };
                        nodes[source].add_transition(FsmTransition::new(
                            target,
                            tr.label.input,
                            tr.label.output,
                        ));
                    }
                }
            }
        }

        Fsm::from_parts(other.name(), self.max_input, self.max_output, nodes, symbols)
    }

    /// State cover: a tree of input traces reaching every reachable state,
    /// built breadth-first with one tree edge per first visit.
    pub fn state_cover(&mut self) -> Tree {
        self.reset_colors();
        let mut tree = Tree::new();
        let mut fsm2tree: FxHashMap<usize, usize> = FxHashMap::default();
        let mut bfs: VecDeque<usize> = VecDeque::new();

        self.nodes[self.init_state].color = Color::Grey;
        bfs.push_back(self.init_state);
        fsm2tree.insert(self.init_state, Tree::ROOT);

        while let Some(state) = bfs.pop_front() {
            let tree_node = fsm2tree[&state];
            for x in 0..=self.max_input {
                for target in self.nodes[state].targets_on(x) {
                    if self.nodes[target].color == Color::White {
                        self.nodes[target].color = Color::Grey;
                        let child = tree.add_edge(tree_node, x);
                        bfs.push_back(target);
                        fsm2tree.insert(target, child);
                    }
                }
            }
            self.nodes[state].color = Color::Black;
        }
        self.reset_colors();
        tree
    }

    /// State cover extended by every single-input suffix at every node.
    pub fn transition_cover(&mut self) -> Tree {
        let mut cover = self.state_cover();
        let singles = TraceSet::new((0..=self.max_input).map(|x| vec![x]).collect());
        cover.add(&singles);
        cover
    }

    /// Drop the states unreachable from the initial state and renumber the
    /// survivors so ids equal vector positions again. Returns the removed
    /// nodes; their names are withdrawn from the symbol table.
    pub fn remove_unreachable(&mut self) -> Vec<FsmNode> {
        self.reset_visited();
        let mut bfs = VecDeque::from([self.init_state]);
        self.nodes[self.init_state].visited = true;
        while let Some(s) = bfs.pop_front() {
            let targets: Vec<usize> =
                self.nodes[s].transitions().iter().map(|t| t.target).collect();
            for t in targets {
                if !self.nodes[t].visited {
                    self.nodes[t].visited = true;
                    bfs.push_back(t);
                }
            }
        }

        let mut old2new = vec![None; self.nodes.len()];
        let mut kept = 0usize;
        for (i, n) in self.nodes.iter().enumerate() {
            if n.visited {
                old2new[i] = Some(kept);
                kept += 1;
            }
        }
        if kept == self.nodes.len() {
            return Vec::new();
        }

        let mut removed = Vec::new();
        let mut dropped_names = 0usize;
        let old_nodes = std::mem::take(&mut self.nodes);
        for (i, mut n) in old_nodes.into_iter().enumerate() {
            match old2new[i] {
                Some(new_id) => {
                    n.id = new_id;
                    for tr in n.transitions_mut() {
                        tr.target = old2new[tr.target]
                            .expect("transitions of reachable nodes lead to reachable nodes");
                    }
                    self.nodes.push(n);
                }
                None => {
                    self.symbols.remove_state(i - dropped_names);
                    dropped_names += 1;
                    removed.push(n);
                }
            }
        }
        self.init_state =
            old2new[self.init_state].expect("the initial state is trivially reachable");
        self.ofsm = None;
        self.char_set = None;
        self.ident_sets.clear();
        removed
    }

    pub(crate) fn ofsm_tables(&mut self) -> &OfsmTables {
        if self.ofsm.is_none() {
            self.ofsm = Some(OfsmTables::build(self));
        }
        self.ofsm.as_ref().expect("just built")
    }

    /// Quotient of an observable machine by the final OFSM-table classes.
    pub fn minimise_observable(&mut self) -> Fsm {
        self.ofsm_tables();
        let tables = self.ofsm.clone().expect("just built");
        let last = tables.last();

        let mut representative: Vec<Option<usize>> = vec![None; last.num_classes];
        let mut members: Vec<Vec<usize>> = vec![Vec::new(); last.num_classes];
        for (s, &c) in last.class_of.iter().enumerate() {
            if representative[c].is_none() {
                representative[c] = Some(s);
            }
            members[c].push(s);
        }

        let mut symbols = SymbolTable::new(
            self.symbols.input_names().to_vec(),
            self.symbols.output_names().to_vec(),
            Vec::new(),
        );
        let mut nodes = Vec::with_capacity(last.num_classes);
        for c in 0..last.num_classes {
            let name = format!(
                "{{{}}}",
                members[c].iter().map(|&s| self.node_name(s)).collect::<Vec<_>>().join(",")
            );
            symbols.add_state(name.clone());
            let mut node = FsmNode::new(c, &name);
            let rep = representative[c].expect("every class has a member");
            for tr in self.nodes[rep].transitions() {
                node.add_transition(FsmTransition::new(
                    last.class_of[tr.target],
                    tr.label.input,
                    tr.label.output,
                ));
            }
            nodes.push(node);
        }
        nodes[last.class_of[self.init_state]].initial = true;

        let mut fsm = Fsm::from_parts(
            &format!("{}_MIN", self.name),
            self.max_input,
            self.max_output,
            nodes,
            symbols,
        );
        fsm.minimal = Some(true);
        fsm
    }

    /// Minimise: remove unreachable states, transform to an observable
    /// machine if necessary, and take the Moore-equivalence quotient.
    pub fn minimise(&mut self) -> Fsm {
        self.remove_unreachable();
        if !self.is_observable() {
            let mut observable = self.transform_to_observable();
            return observable.minimise_observable();
        }
        self.minimise_observable()
    }

    /// Do the two states react differently to `trace` (as sets of output
    /// sequences)?
    pub fn distinguished(&self, i: usize, j: usize, trace: &[u32]) -> bool {
        let itrc = InputTrace::new(trace.to_vec());
        self.apply_from(i, &itrc) != self.apply_from(j, &itrc)
    }

    /// First trace of `w` distinguishing the two states, in leaf order.
    pub fn distinguished_by_tree(&self, i: usize, j: usize, w: &Tree) -> Option<Vec<u32>> {
        w.io_lists().iter().find(|t| self.distinguished(i, j, t)).cloned()
    }

    /// Derive a distinguishing trace for two states from the OFSM-table
    /// sequence: descend level by level along (input, output) pairs whose
    /// successors stay separated, closing with a pair enabled in only one
    /// of the two states. Returns the empty trace (with a diagnostic) for
    /// states the tables do not separate.
    pub(crate) fn distinguishing_trace_ofsm(
        &self,
        tables: &OfsmTables,
        i: usize,
        j: usize,
    ) -> InputTrace {
        let mut itrc = InputTrace::default();
        let levels = tables.levels().len();
        let Some(l) = (1..levels).find(|&lev| tables.class_of(lev, i) != tables.class_of(lev, j))
        else {
            warn!(state_a = i, state_b = j, "states are not separated by the OFSM tables");
            return itrc;
        };

        let (mut q1, mut q2) = (i, j);
        for k in 1..l {
            let lev = l - k;
            let mut found = false;
            'search: for x in 0..=self.max_input {
                for y in 0..=self.max_output {
                    if let (Some(p1), Some(p2)) = (tables.post(q1, x, y), tables.post(q2, x, y)) {
                        if tables.class_of(lev, p1) != tables.class_of(lev, p2) {
                            itrc.push(x);
                            q1 = p1;
                            q2 = p2;
                            found = true;
                            break 'search;
                        }
                    }
                }
            }
            if !found {
                warn!("inconsistency while descending the OFSM tables");
                return InputTrace::default();
            }
        }

        for x in 0..=self.max_input {
            for y in 0..=self.max_output {
                if tables.post(q1, x, y).is_some() != tables.post(q2, x, y).is_some() {
                    itrc.push(x);
                    return itrc;
                }
            }
        }
        warn!("inconsistency in the final OFSM-table step");
        InputTrace::default()
    }

    /// Characterisation set W: for every state pair not yet distinguished
    /// by the set under construction, add a fresh OFSM-derived
    /// distinguishing trace. Requires observability.
    pub fn characterisation_set(&mut self) -> Result<TraceSet, FsmError> {
        if !self.is_observable() {
            return Err(FsmError::NotObservable);
        }
        if let Some(w) = &self.char_set {
            return Ok(w.io_lists());
        }
        let tables = self.ofsm_tables().clone();
        let mut w = Tree::new();
        for i in 0..self.size() {
            for j in i + 1..self.size() {
                if self.distinguished_by_tree(i, j, &w).is_some() {
                    continue;
                }
                let trc = self.distinguishing_trace_ofsm(&tables, i, j);
                if trc.is_empty() {
                    continue;
                }
                w.add_to_root(trc.values());
            }
        }
        let lists = w.io_lists();
        self.char_set = Some(w);
        Ok(lists)
    }

    /// Per-state minimum subsets of W distinguishing the state from every
    /// other state, via the exact min-cardinality hitting set.
    pub fn calc_state_identification_sets(&mut self) -> Result<(), FsmError> {
        let w = self.characterisation_set()?;
        let n = self.size();
        let mut z: Vec<Vec<FxHashSet<usize>>> = vec![vec![FxHashSet::default(); n]; n];
        for i in 0..n {
            for j in i + 1..n {
                for (u, trc) in w.iter().enumerate() {
                    if self.distinguished(i, j, trc) {
                        z[i][j].insert(u);
                        z[j][i].insert(u);
                    }
                }
            }
        }
        self.ident_sets.clear();
        for i in 0..n {
            let sets: Vec<FxHashSet<usize>> =
                (0..n).filter(|&j| j != i).map(|j| z[i][j].clone()).collect();
            let mut hit: Vec<usize> = min_cardinality_hitting_set(&sets).into_iter().collect();
            hit.sort_unstable();
            let mut tree = Tree::new();
            for u in hit {
                tree.add_to_root(&w.lists()[u]);
            }
            self.ident_sets.push(tree);
        }
        Ok(())
    }

    /// Greedy variant: walk W in order and, per state, keep the traces
    /// that settle a still-ambiguous pair. Cheaper than the exact solver
    /// and sufficient for the Wp construction.
    pub fn calc_state_identification_sets_fast(&mut self) -> Result<(), FsmError> {
        let w = self.characterisation_set()?;
        let n = self.size();
        let mut settled: Vec<Vec<Option<usize>>> = vec![vec![None; n]; n];
        let mut per_state: Vec<Vec<Vec<u32>>> = vec![Vec::new(); n];

        for i in 0..n {
            for trc in &w {
                let mut complete = true;
                for j in i + 1..n {
                    if settled[i][j].is_none() {
                        if self.distinguished(i, j, trc) {
                            settled[i][j] = Some(0);
                            settled[j][i] = Some(0);
                            per_state[i].push(trc.clone());
                            per_state[j].push(trc.clone());
                        } else {
                            complete = false;
                        }
                    }
                }
                if complete {
                    break;
                }
            }
        }

        self.ident_sets.clear();
        for lists in per_state {
            let mut tree = Tree::new();
            for trc in lists {
                tree.add_to_root(&trc);
            }
            self.ident_sets.push(tree);
        }
        Ok(())
    }

    /// Beneath every trace of `tree`, splice the identification sets of
    /// the states the trace reaches.
    pub fn append_state_identification_sets(&self, tree: &mut Tree) {
        let lists = tree.io_lists();
        for trc in &lists {
            for state in self.after_trace(self.init_state, trc) {
                if let Some(node) = tree.after(Tree::ROOT, trc) {
                    if let Some(ident) = self.ident_sets.get(state) {
                        tree.add_traces_at(node, &ident.io_lists());
                    }
                }
            }
        }
    }

    /// W-method on an arbitrary machine: observable transform, minimise,
    /// then transition cover · input enumeration · W.
    pub fn w_method(&self, num_add_states: usize) -> Result<TraceSet, FsmError> {
        let mut observable = self.transform_to_observable();
        let mut minimised = observable.minimise();
        minimised.w_method_on_minimised(num_add_states)
    }

    /// W-method on a machine already known to be minimal and observable.
    pub fn w_method_on_minimised(&mut self, num_add_states: usize) -> Result<TraceSet, FsmError> {
        let mut tree = self.transition_cover();
        if num_add_states > 0 {
            tree.add(&TraceSet::input_enumeration(self.max_input, 1, num_add_states));
        }
        let w = self.characterisation_set()?;
        tree.add(&w);
        Ok(tree.io_lists())
    }

    /// Wp-method: `V·Σ^{≤m}·W` unioned with `(TC \ V)·Σ^{m}·W_s`, the
    /// state-identification sets spliced beneath the reached states.
    pub fn wp_method(&mut self, num_add_states: usize) -> Result<TraceSet, FsmError> {
        let scov = self.state_cover();
        let mut tcov = self.transition_cover();
        tcov.remove(&scov);
        let w = self.characterisation_set()?;
        self.calc_state_identification_sets_fast()?;

        let mut wp1 = scov;
        if num_add_states > 0 {
            wp1.add(&TraceSet::input_enumeration(self.max_input, 1, num_add_states));
        }
        wp1.add(&w);

        let mut wp2 = tcov;
        if num_add_states > 0 {
            wp2.add(&TraceSet::input_enumeration(
                self.max_input,
                num_add_states,
                num_add_states,
            ));
        }
        self.append_state_identification_sets(&mut wp2);

        wp1.union_tree(&wp2);
        Ok(wp1.io_lists())
    }

    /// HSI-method: harmonised state identification sets, one W-trace per
    /// state pair added to both sides, spliced beneath `V·Σ^{≤m+1}`.
    pub fn hsi_method(&mut self, num_add_states: usize) -> Result<TraceSet, FsmError> {
        if !self.is_observable() {
            return Err(FsmError::NotObservable);
        }
        let w = self.characterisation_set()?;

        let mut hsi = self.state_cover();
        hsi.add(&TraceSet::input_enumeration(self.max_input, 1, num_add_states + 1));

        let n = self.size();
        let mut hwi: Vec<Tree> = (0..n).map(|_| Tree::new()).collect();
        for i in 0..n {
            for j in i + 1..n {
                let mut distinguished = false;
                for trc in &w {
                    if self.distinguished(i, j, trc) {
                        hwi[i].add_to_root(trc);
                        hwi[j].add_to_root(trc);
                        distinguished = true;
                        break;
                    }
                }
                if !distinguished {
                    warn!(state_a = i, state_b = j, "HSI: machine is not minimal");
                }
            }
        }

        let lists = hsi.io_lists();
        for trc in &lists {
            for state in self.after_trace(self.init_state, trc) {
                if let Some(node) = hsi.after(Tree::ROOT, trc) {
                    hsi.add_traces_at(node, &hwi[state].io_lists());
                }
            }
        }
        Ok(hsi.io_lists())
    }

    /// Apply every trace of the set to the machine, collecting the
    /// expected reactions as a test suite.
    pub fn create_test_suite(&self, test_cases: &TraceSet) -> TestSuite {
        let mut suite = TestSuite::new();
        for trc in test_cases {
            suite.push(self.apply(&InputTrace::new(trc.clone())));
        }
        suite
    }

    pub fn to_dfsm_table(&self) -> Result<DfsmTable, FsmError> {
        DfsmTable::build(self)
    }

    /// Equivalent-input classes of the prime (minimised) machine: inputs
    /// whose OFSM-table columns agree for every output.
    pub fn equivalent_inputs(&mut self) -> Vec<Vec<u32>> {
        if self.minimal == Some(true) {
            self.equivalent_inputs_from_prime()
        } else {
            self.minimise().equivalent_inputs_from_prime()
        }
    }

    fn equivalent_inputs_from_prime(&self) -> Vec<Vec<u32>> {
        let tables = OfsmTables::build(self);
        let mut absorbed = vec![false; self.max_input as usize + 1];
        let mut classes = Vec::new();
        for x1 in 0..=self.max_input {
            if absorbed[x1 as usize] {
                continue;
            }
            let mut class = vec![x1];
            for x2 in x1 + 1..=self.max_input {
                if (0..=self.max_output).all(|y| tables.compare_columns(x1, y, x2, y)) {
                    absorbed[x2 as usize] = true;
                    class.push(x2);
                }
            }
            classes.push(class);
        }
        classes
    }

    /// Random machine over the given alphabets in which every state is
    /// reachable: the construction walks a breadth-first queue, wiring
    /// each dequeued state to a not-yet-covered state first and then
    /// adding one or two random transitions per input.
    pub fn create_random(
        name: &str,
        max_input: u32,
        max_output: u32,
        max_state: usize,
        seed: Option<u64>,
    ) -> Fsm {
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        let num_states = max_state + 1;
        let mut nodes: Vec<FsmNode> = (0..num_states).map(|i| FsmNode::new(i, name)).collect();
        let mut covered = vec![false; num_states];
        covered[0] = true;

        let mut bfs: VecDeque<usize> = VecDeque::from([0]);
        while let Some(src) = bfs.pop_front() {
            // Reach an uncovered state first, scanning cyclically from a
            // random start.
            let start = rng.gen_range(0..num_states);
            let mut uncovered = None;
            for off in 0..num_states {
                let cand = (start + off) % num_states;
                if !covered[cand] {
                    uncovered = Some(cand);
                    break;
                }
            }
            let mut x0 = None;
            if let Some(white) = uncovered {
                let x = rng.gen_range(0..=max_input);
                let y = rng.gen_range(0..=max_output);
                nodes[src].add_transition(FsmTransition::new(white, x, y));
                covered[white] = true;
                bfs.push_back(white);
                x0 = Some(x);
            }

            for x in 0..=max_input {
                if Some(x) == x0 && rng.gen_range(0..2) == 1 {
                    continue;
                }
                let extra = rng.gen_range(0..2usize);
                for _ in 0..=extra {
                    let y = rng.gen_range(0..=max_output);
                    let target = rng.gen_range(0..num_states);
                    if !covered[target] {
                        covered[target] = true;
                        bfs.push_back(target);
                    }
                    nodes[src].add_transition(FsmTransition::new(target, x, y));
                }
            }
        }

        Fsm::from_parts(name, max_input, max_output, nodes, SymbolTable::default())
    }

    /// Copy of the machine with randomly injected faults: transition
    /// faults redirect a transition to another state, output faults
    /// rewrite an output without ever duplicating an existing label
    /// towards the same target.
    pub fn create_mutant(
        &self,
        name: &str,
        num_output_faults: usize,
        num_transition_faults: usize,
        seed: Option<u64>,
    ) -> Fsm {
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        let num_states = self.nodes.len();
        let mut nodes = self.nodes.clone();
        for n in &mut nodes {
            n.initial = false;
        }
        nodes[self.init_state].initial = true;

        for _ in 0..num_transition_faults {
            let src = rng.gen_range(0..num_states);
            if nodes[src].transitions().is_empty() {
                continue;
            }
            let tr_no = rng.gen_range(0..nodes[src].transitions().len());
            let mut new_target = rng.gen_range(0..num_states);
            if nodes[src].transitions()[tr_no].target == new_target {
                new_target = (new_target + 1) % num_states;
            }
            nodes[src].transitions_mut()[tr_no].target = new_target;
        }

        for _ in 0..num_output_faults {
            let src = rng.gen_range(0..num_states);
            if nodes[src].transitions().is_empty() {
                continue;
            }
            let tr_no = rng.gen_range(0..nodes[src].transitions().len());
            let input = nodes[src].transitions()[tr_no].label.input;
            let target = nodes[src].transitions()[tr_no].target;
            let first_candidate = rng.gen_range(0..=self.max_output);
            let mut candidate = first_candidate;
            let ok = loop {
                let clash = nodes[src].transitions().iter().enumerate().any(|(k, other)| {
                    k != tr_no
                        && other.target == target
                        && other.label.input == input
                        && other.label.output == candidate
                });
                if !clash {
                    break true;
                }
                candidate = (candidate + 1) % (self.max_output + 1);
                if candidate == first_candidate {
                    break false;
                }
            };
            if ok {
                nodes[src].transitions_mut()[tr_no].label.output = candidate;
            }
        }

        Fsm::from_parts(name, self.max_input, self.max_output, nodes, self.symbols.clone())
    }

    /// Graphviz rendering; the initial state is drawn as a double circle.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph g {\n\nnode [shape = circle]\n\n");
        for i in 0..self.nodes.len() {
            if i == self.init_state {
                out.push_str("\nnode [shape = doublecircle]\n");
            }
            let _ = writeln!(out, "{i}[label=\"{}({i})\"];", self.node_name(i));
            if i == self.init_state {
                out.push_str("\nnode [shape = ellipse]\n");
            }
        }
        for node in &self.nodes {
            for tr in node.transitions() {
                let _ = writeln!(
                    out,
                    "{} -> {}[label=\" {}/{}   \"];",
                    node.id,
                    tr.target,
                    self.symbols.input_name(tr.label.input),
                    self.symbols.output_name(tr.label.output)
                );
            }
        }
        out.push_str("\n}\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Complete 3-state DFSM; states 1 and 2 are Moore-equivalent.
    fn mergeable_dfsm() -> Fsm {
        let mut nodes: Vec<FsmNode> = (0..3).map(|i| FsmNode::new(i, "s")).collect();
        nodes[0].add_transition(FsmTransition::new(1, 0, 0));
        nodes[0].add_transition(FsmTransition::new(2, 1, 1));
        nodes[1].add_transition(FsmTransition::new(0, 0, 1));
        nodes[1].add_transition(FsmTransition::new(1, 1, 0));
        nodes[2].add_transition(FsmTransition::new(0, 0, 1));
        nodes[2].add_transition(FsmTransition::new(2, 1, 0));
        Fsm::from_parts("m", 1, 1, nodes, SymbolTable::default())
    }

    /// Non-observable machine: two transitions of state 0 share label 0/0.
    fn non_observable() -> Fsm {
        let mut nodes: Vec<FsmNode> = (0..3).map(|i| FsmNode::new(i, "s")).collect();
        nodes[0].add_transition(FsmTransition::new(1, 0, 0));
        nodes[0].add_transition(FsmTransition::new(2, 0, 0));
        nodes[1].add_transition(FsmTransition::new(1, 0, 1));
        nodes[2].add_transition(FsmTransition::new(2, 1, 1));
        Fsm::from_parts("n", 1, 1, nodes, SymbolTable::default())
    }

    #[test]
    fn test_duplicate_transitions_ignored() {
        let mut node = FsmNode::new(0, "s");
        node.add_transition(FsmTransition::new(1, 0, 0));
        node.add_transition(FsmTransition::new(1, 0, 0));
        node.add_transition(FsmTransition::new(2, 0, 0));
        assert_eq!(node.transitions().len(), 2);
    }

    #[test]
    fn test_parse_line_format_infers_alphabets() {
        let text = "0 1 2 1\n1 0 0 2\n2 0 2 0\n";
        let fsm = Fsm::parse_line_format(text, "m1", SymbolTable::default()).unwrap();
        assert_eq!(fsm.size(), 3);
        assert_eq!(fsm.max_input(), 1);
        assert_eq!(fsm.max_output(), 2);
        assert_eq!(fsm.initial_state(), 0);
        assert!(fsm.is_deterministic());
    }

    #[test]
    fn test_parse_line_format_rejects_garbage() {
        assert!(Fsm::parse_line_format("0 a 0 1\n", "m", SymbolTable::default()).is_err());
        assert!(Fsm::parse_line_format("0 1 2\n", "m", SymbolTable::default()).is_err());
        assert!(Fsm::parse_line_format("", "m", SymbolTable::default()).is_err());
    }

    #[test]
    fn test_line_format_roundtrip() {
        let text = "0 1 2 1\n1 0 0 2\n2 0 2 0\n";
        let fsm = Fsm::parse_line_format(text, "m1", SymbolTable::default()).unwrap();
        assert_eq!(fsm.dump_line_format(), text);
    }

    #[test]
    fn test_apply_nondeterministic_branches() {
        let fsm = non_observable();
        let ot = fsm.apply(&InputTrace::new(vec![0, 0]));
        let mut outputs: Vec<Vec<u32>> =
            ot.output_traces().iter().map(|o| o.values().to_vec()).collect();
        outputs.sort();
        // Branch via state 1 continues with 0/1; the branch via state 2
        // dies after the first step.
        assert_eq!(outputs, vec![vec![0, 1]]);
    }

    #[test]
    fn test_observable_transform() {
        let fsm = non_observable();
        assert!(!fsm.is_observable());
        let obs = fsm.transform_to_observable();
        assert!(obs.is_observable());
        // The reactions to any input trace coincide.
        for trace in [vec![0], vec![0, 0], vec![0, 1], vec![1, 0]] {
            let itrc = InputTrace::new(trace);
            assert_eq!(
                fsm.apply(&itrc).output_traces(),
                obs.apply(&itrc).output_traces(),
                "reaction to {itrc} differs"
            );
        }
    }

    #[test]
    fn test_intersect_language() {
        // A loops on 0/0 forever; B alternates outputs 0 and 1.
        let mut a_nodes = vec![FsmNode::new(0, "a")];
        a_nodes[0].add_transition(FsmTransition::new(0, 0, 0));
        let a = Fsm::from_parts("A", 0, 1, a_nodes, SymbolTable::default());

        let mut b_nodes: Vec<FsmNode> = (0..2).map(|i| FsmNode::new(i, "b")).collect();
        b_nodes[0].add_transition(FsmTransition::new(1, 0, 0));
        b_nodes[1].add_transition(FsmTransition::new(0, 0, 1));
        let b = Fsm::from_parts("B", 0, 1, b_nodes, SymbolTable::default());

        let product = a.intersect(&b);
        // Both accept 0/0; only A accepts the second 0/0, so the product
        // stops after one step.
        let ot = product.apply(&InputTrace::new(vec![0, 0]));
        let outputs = ot.output_traces();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].values(), &[0]);
    }

    #[test]
    fn test_state_cover_paths() {
        let mut fsm = mergeable_dfsm();
        let cover = fsm.state_cover();
        let mut lists = cover.io_lists().lists().to_vec();
        lists.sort();
        assert_eq!(lists, vec![vec![0], vec![1]]);
    }

    #[test]
    fn test_transition_cover_extends_every_node() {
        let mut fsm = mergeable_dfsm();
        let cover = fsm.transition_cover();
        let lists = cover.io_lists();
        // Each cover node (root, state 1, state 2) is extended by inputs
        // 0 and 1.
        for t in [vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]] {
            assert!(lists.lists().contains(&t), "missing {t:?}");
        }
    }

    #[test]
    fn test_remove_unreachable_renumbers() {
        let mut nodes: Vec<FsmNode> = (0..5).map(|i| FsmNode::new(i, "s")).collect();
        nodes[0].add_transition(FsmTransition::new(2, 0, 0));
        nodes[2].add_transition(FsmTransition::new(0, 0, 1));
        // 1, 3 and 4 are unreachable; 4 points into the reachable part.
        nodes[1].add_transition(FsmTransition::new(3, 0, 0));
        nodes[4].add_transition(FsmTransition::new(0, 0, 0));
        let mut fsm = Fsm::from_parts("u", 0, 1, nodes, SymbolTable::default());

        let removed = fsm.remove_unreachable();
        assert_eq!(removed.len(), 3);
        assert_eq!(fsm.size(), 2);
        assert_eq!(fsm.initial_state(), 0);
        for (i, node) in fsm.nodes().iter().enumerate() {
            assert_eq!(node.id, i);
        }
        // Old state 2 is now state 1.
        assert_eq!(fsm.node(0).targets_on(0), vec![1]);
    }

    #[test]
    fn test_minimise_merges_equivalent_states() {
        let mut fsm = mergeable_dfsm();
        let minimised = fsm.minimise();
        assert_eq!(minimised.size(), 2);
        assert!(minimised.is_observable());
        assert_eq!(minimised.is_minimal(), Some(true));
        // Behavior is preserved.
        for trace in [vec![0], vec![1, 0], vec![0, 1, 1], vec![1, 1, 0]] {
            let itrc = InputTrace::new(trace);
            assert_eq!(fsm.apply(&itrc).output_traces(), minimised.apply(&itrc).output_traces());
        }
    }

    #[test]
    fn test_minimise_idempotent() {
        let mut fsm = mergeable_dfsm();
        let mut once = fsm.minimise();
        let twice = once.minimise();
        assert_eq!(once.size(), twice.size());
    }

    #[test]
    fn test_characterisation_set_distinguishes_all_pairs() {
        let mut fsm = mergeable_dfsm();
        let mut minimised = fsm.minimise();
        let w = minimised.characterisation_set().unwrap();
        let w_tree = {
            let mut t = Tree::new();
            t.add_traces_at_root(&w);
            t
        };
        for i in 0..minimised.size() {
            for j in i + 1..minimised.size() {
                assert!(
                    minimised.distinguished_by_tree(i, j, &w_tree).is_some(),
                    "W fails to distinguish {i} and {j}"
                );
            }
        }
    }

    #[test]
    fn test_characterisation_set_requires_observability() {
        let mut fsm = non_observable();
        assert!(matches!(fsm.characterisation_set(), Err(FsmError::NotObservable)));
    }

    #[test]
    fn test_equivalent_inputs_classes() {
        // Inputs 2 and 3 act identically on both states, 0 and 1 differ.
        let mut nodes: Vec<FsmNode> = (0..2).map(|i| FsmNode::new(i, "s")).collect();
        nodes[0].add_transition(FsmTransition::new(0, 0, 0));
        nodes[0].add_transition(FsmTransition::new(0, 1, 1));
        nodes[0].add_transition(FsmTransition::new(1, 2, 0));
        nodes[0].add_transition(FsmTransition::new(1, 3, 0));
        nodes[1].add_transition(FsmTransition::new(1, 0, 0));
        nodes[1].add_transition(FsmTransition::new(1, 1, 0));
        nodes[1].add_transition(FsmTransition::new(0, 2, 0));
        nodes[1].add_transition(FsmTransition::new(0, 3, 0));
        let mut fsm = Fsm::from_parts("eq", 3, 1, nodes, SymbolTable::default());
        let classes = fsm.equivalent_inputs();
        assert_eq!(classes, vec![vec![0], vec![1], vec![2, 3]]);
    }

    #[test]
    fn test_deep_copy_renders_identically() {
        let fsm = Fsm::create_random("f1", 3, 5, 10, Some(42));
        let copy = fsm.clone();
        assert_eq!(fsm.to_dot(), copy.to_dot());
        assert_eq!(fsm.dump_line_format(), copy.dump_line_format());
    }

    #[test]
    fn test_create_random_is_reproducible() {
        let a = Fsm::create_random("f", 2, 2, 6, Some(7));
        let b = Fsm::create_random("f", 2, 2, 6, Some(7));
        assert_eq!(a.dump_line_format(), b.dump_line_format());
    }

    #[test]
    fn test_mutant_differs_only_where_injected() {
        let fsm = Fsm::create_random("f", 2, 2, 5, Some(3));
        let clean = fsm.create_mutant("mut", 0, 0, Some(9));
        assert_eq!(fsm.dump_line_format(), clean.dump_line_format());
        let faulty = fsm.create_mutant("mut", 1, 1, Some(9));
        assert_ne!(fsm.dump_line_format(), faulty.dump_line_format());
        assert_eq!(fsm.size(), faulty.size());
    }

    #[test]
    fn test_wp_not_larger_than_w() {
        let mut fsm = mergeable_dfsm();
        let mut minimised = fsm.minimise();
        let w = minimised.w_method_on_minimised(1).unwrap();
        let mut fsm2 = mergeable_dfsm();
        let mut minimised2 = fsm2.minimise();
        let wp = minimised2.wp_method(1).unwrap();
        assert!(wp.len() <= w.len(), "wp suite ({}) larger than w suite ({})", wp.len(), w.len());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_state_cover_reaches_every_state(seed in any::<u64>()) {
            let mut fsm = Fsm::create_random("r", 4, 4, 9, Some(seed));
            let cover = fsm.state_cover();
            for trace in &cover.io_lists() {
                fsm.apply_marking(&InputTrace::new(trace.clone()));
            }
            prop_assert!(fsm.nodes().iter().all(FsmNode::has_been_visited));
        }

        #[test]
        fn prop_observable_transform_is_observable(seed in any::<u64>()) {
            let fsm = Fsm::create_random("r", 3, 3, 7, Some(seed));
            prop_assert!(fsm.transform_to_observable().is_observable());
        }

        #[test]
        fn prop_minimise_is_idempotent(seed in any::<u64>()) {
            let mut fsm = Fsm::create_random("r", 3, 3, 7, Some(seed));
            let mut once = fsm.minimise();
            let twice = once.minimise();
            prop_assert_eq!(once.size(), twice.size());
        }
    }
}
