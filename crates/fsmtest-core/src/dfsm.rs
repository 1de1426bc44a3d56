use crate::error::FsmError;
use crate::fsm::{Fsm, FsmNode, FsmTransition};
use crate::suite::TestSuite;
use crate::symbols::{SymbolTable, NOP};
use crate::tables::{DfsmTable, PkTables};
use crate::trace::{IOTrace, InputTrace, OutputTrace};
use crate::tree::{TraceSet, Tree};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::fmt::Write as _;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct JsonState {
    name: String,
    #[serde(default)]
    initial: bool,
    #[serde(default)]
    requirements: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct JsonTransition {
    source: String,
    target: String,
    input: Vec<String>,
    output: String,
    #[serde(default)]
    requirements: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct JsonModel {
    inputs: Vec<String>,
    outputs: Vec<String>,
    states: Vec<JsonState>,
    transitions: Vec<JsonTransition>,
    #[serde(default)]
    #[allow(dead_code)]
    requirements: Vec<String>,
}

/// A deterministic FSM: an [`Fsm`] satisfying the determinism invariant,
/// together with the Pk-table refinement history the deterministic
/// algorithms run on.
#[derive(Debug, Clone)]
pub struct Dfsm {
    fsm: Fsm,
    table: Option<DfsmTable>,
    pk: Option<PkTables>,
    dist: Option<Vec<Vec<Vec<Vec<u32>>>>>,
}

/// Strip surrounding whitespace and quotes from a CSV cell.
fn trim_cell(s: &str) -> &str {
    s.trim_matches(|c: char| c.is_whitespace() || c == '"')
}

impl Dfsm {
    /// Refine an FSM into a DFSM; fails when any state carries two
    /// transitions for the same input.
    pub fn from_fsm(fsm: Fsm) -> Result<Dfsm, FsmError> {
        if !fsm.is_deterministic() {
            return Err(FsmError::Nondeterministic);
        }
        Ok(Dfsm { fsm, table: None, pk: None, dist: None })
    }

    pub fn parse_line_format(
        text: &str,
        name: &str,
        symbols: SymbolTable,
    ) -> Result<Dfsm, FsmError> {
        Dfsm::from_fsm(Fsm::parse_line_format(text, name, symbols)?)
    }

    pub fn fsm(&self) -> &Fsm {
        &self.fsm
    }

    pub fn fsm_mut(&mut self) -> &mut Fsm {
        &mut self.fsm
    }

    pub fn into_fsm(self) -> Fsm {
        self.fsm
    }

    pub fn name(&self) -> &str {
        self.fsm.name()
    }

    pub fn size(&self) -> usize {
        self.fsm.size()
    }

    pub fn max_input(&self) -> u32 {
        self.fsm.max_input()
    }

    pub fn max_output(&self) -> u32 {
        self.fsm.max_output()
    }

    pub fn initial_state(&self) -> usize {
        self.fsm.initial_state()
    }

    pub fn symbols(&self) -> &SymbolTable {
        self.fsm.symbols()
    }

    pub fn pk_tables(&self) -> Option<&PkTables> {
        self.pk.as_ref()
    }

    // ------------------------------------------------------------------
    // CSV model format
    // ------------------------------------------------------------------

    /// Parse the semicolon-separated table format: input names in the
    /// header, one state per row, cells `TARGET/OUTPUT` with empty cells
    /// completed to `input/_nop` self-loops.
    pub fn parse_csv(text: &str, name: &str) -> Result<Dfsm, FsmError> {
        Self::parse_csv_inner(text, name, None)
    }

    /// CSV parse for an abstraction model: input and output codes of the
    /// reference table are reused, new names are appended after them.
    pub fn parse_csv_with(text: &str, name: &str, base: &SymbolTable) -> Result<Dfsm, FsmError> {
        Self::parse_csv_inner(text, name, Some(base))
    }

    fn parse_csv_inner(
        text: &str,
        name: &str,
        base: Option<&SymbolTable>,
    ) -> Result<Dfsm, FsmError> {
        let mut lines = text.lines();
        let header = lines
            .next()
            .ok_or_else(|| FsmError::Parse("empty CSV model".to_string()))?;
        if !header.contains(';') {
            return Err(FsmError::Parse("CSV header has no fields".to_string()));
        }

        // Header: the first field is a filler, the rest name the input
        // columns.
        let column_names: Vec<String> =
            header.split(';').skip(1).map(|f| trim_cell(f).to_string()).collect();
        if column_names.is_empty() {
            return Err(FsmError::Parse("CSV header names no inputs".to_string()));
        }
        let mut inputs: Vec<String> =
            base.map(|b| b.input_names().to_vec()).unwrap_or_default();
        for input in &column_names {
            if base.map_or(true, |b| b.in2num(input).is_none()) {
                inputs.push(input.clone());
            }
        }

        // Collect state names and the output alphabet; new output names
        // are sorted, with _nop leading unless the base already has it.
        let rows: Vec<&str> = lines.filter(|l| l.contains(';')).collect();
        let mut new_outputs: BTreeSet<String> = BTreeSet::new();
        if base.map_or(true, |b| b.out2num(NOP).is_none()) {
            new_outputs.insert(NOP.to_string());
        }
        let mut states: Vec<String> = Vec::new();
        for row in &rows {
            let mut fields = row.split(';');
            states.push(trim_cell(fields.next().unwrap_or_default()).to_string());
            for cell in fields {
                if let Some((_, out)) = cell.split_once('/') {
                    let out = trim_cell(out);
                    if base.map_or(true, |b| b.out2num(out).is_none()) {
                        new_outputs.insert(out.to_string());
                    }
                }
            }
        }
        let mut outputs: Vec<String> =
            base.map(|b| b.output_names().to_vec()).unwrap_or_default();
        outputs.extend(new_outputs);

        let symbols = SymbolTable::new(inputs, outputs, states);
        let nop = symbols
            .out2num(NOP)
            .ok_or_else(|| FsmError::Parse("output alphabet lost _nop".to_string()))?;

        // Input code of each column; with a base table, columns may map
        // onto previously assigned codes.
        let column_codes: Vec<u32> = column_names
            .iter()
            .map(|n| {
                symbols
                    .in2num(n)
                    .ok_or_else(|| FsmError::UndefinedSymbol { kind: "input", name: n.clone() })
            })
            .collect::<Result<_, _>>()?;

        // Second pass: build the transition graph.
        let mut nodes: Vec<FsmNode> = (0..symbols.num_states())
            .map(|i| FsmNode::new(i, &symbols.state_name(i, "")))
            .collect();
        for (state, row) in rows.iter().enumerate() {
            let mut fields = row.split(';');
            fields.next();
            for (col, cell) in fields.enumerate() {
                let Some(&x) = column_codes.get(col) else {
                    continue;
                };
                let cell = trim_cell(cell);
                if cell.is_empty() {
                    nodes[state].add_transition(FsmTransition::new(state, x, nop));
                    continue;
                }
                let (target_name, out_name) = match cell.split_once('/') {
                    Some((t, o)) => (trim_cell(t), Some(trim_cell(o))),
                    None => (cell, None),
                };
                let target = symbols.state2num(target_name).ok_or_else(|| {
                    FsmError::UndefinedSymbol { kind: "state", name: target_name.to_string() }
                })?;
                // A cell without an output part defines no transition.
                if let Some(out_name) = out_name {
                    if out_name.is_empty() {
                        continue;
                    }
                    let y = symbols.out2num(out_name).ok_or_else(|| {
                        FsmError::UndefinedSymbol { kind: "output", name: out_name.to_string() }
                    })?;
                    nodes[state].add_transition(FsmTransition::new(target, x, y));
                }
            }
        }

        let max_input = symbols.num_inputs() as u32 - 1;
        let max_output = symbols.num_outputs() as u32 - 1;
        let fsm = Fsm::from_parts(name, max_input, max_output, nodes, symbols);
        Dfsm::from_fsm(fsm)
    }

    /// CSV export of the transition table.
    pub fn to_csv(&self) -> String {
        let symbols = self.fsm.symbols();
        let mut out = String::new();
        for x in 0..=self.max_input() {
            out.push_str(" ; ");
            out.push_str(&symbols.input_name(x));
        }
        for node in self.fsm.nodes() {
            let _ = write!(out, "\n\"{}\"", self.fsm.node_name(node.id));
            for x in 0..=self.max_input() {
                out.push_str(" ; ");
                if let Some(tr) = node.transitions().iter().find(|t| t.label.input == x) {
                    let _ = write!(
                        out,
                        "\"{} / {}\"",
                        self.fsm.node_name(tr.target),
                        symbols.output_name(tr.label.output)
                    );
                }
            }
        }
        out.push('\n');
        out
    }

    // ------------------------------------------------------------------
    // JSON model format
    // ------------------------------------------------------------------

    /// Parse the JSON model format. The loaded machine is completed with
    /// `input/_nop` self-loops for unspecified inputs.
    pub fn parse_json(text: &str, name: &str) -> Result<Dfsm, FsmError> {
        Self::parse_json_inner(text, name, None)
    }

    pub fn parse_json_with(text: &str, name: &str, base: &SymbolTable) -> Result<Dfsm, FsmError> {
        Self::parse_json_inner(text, name, Some(base))
    }

    fn parse_json_inner(
        text: &str,
        name: &str,
        base: Option<&SymbolTable>,
    ) -> Result<Dfsm, FsmError> {
        let model: JsonModel = serde_json::from_str(text)?;

        let mut inputs: Vec<String> =
            base.map(|b| b.input_names().to_vec()).unwrap_or_default();
        for i in &model.inputs {
            if base.map_or(true, |b| b.in2num(i).is_none()) {
                inputs.push(i.clone());
            }
        }
        let mut outputs: Vec<String> =
            base.map(|b| b.output_names().to_vec()).unwrap_or_default();
        for o in &model.outputs {
            if base.map_or(true, |b| b.out2num(o).is_none()) && !outputs.contains(o) {
                outputs.push(o.clone());
            }
        }
        if !outputs.iter().any(|o| o == NOP) {
            outputs.push(NOP.to_string());
        }

        // The initial state goes to index 0.
        let mut states: Vec<String> = Vec::new();
        for s in model.states.iter().filter(|s| s.initial) {
            states.push(s.name.clone());
            break;
        }
        if states.is_empty() {
            return Err(FsmError::Parse("JSON model declares no initial state".to_string()));
        }
        for s in model.states.iter().filter(|s| !s.initial) {
            states.push(s.name.clone());
        }

        let symbols = SymbolTable::new(inputs, outputs, states);
        let nop = symbols.out2num(NOP).expect("_nop was appended above");

        let mut nodes: Vec<FsmNode> = (0..symbols.num_states())
            .map(|i| FsmNode::new(i, &symbols.state_name(i, "")))
            .collect();
        for s in &model.states {
            if let Some(id) = symbols.state2num(&s.name) {
                nodes[id].requirements = s.requirements.clone();
            }
        }

        for tr in &model.transitions {
            let source = symbols.state2num(&tr.source).ok_or_else(|| {
                FsmError::UndefinedSymbol { kind: "state", name: tr.source.clone() }
            })?;
            let target = symbols.state2num(&tr.target).ok_or_else(|| {
                FsmError::UndefinedSymbol { kind: "state", name: tr.target.clone() }
            })?;
            let y = symbols.out2num(trim_cell(&tr.output)).ok_or_else(|| {
                FsmError::UndefinedSymbol { kind: "output", name: tr.output.clone() }
            })?;
            for input in &tr.input {
                let x = symbols.in2num(trim_cell(input)).ok_or_else(|| {
                    FsmError::UndefinedSymbol { kind: "input", name: input.clone() }
                })?;
                let mut t = FsmTransition::new(target, x, y);
                t.requirements = tr.requirements.clone();
                nodes[source].add_transition(t);
            }
        }

        // Complete the machine: unused inputs self-loop with _nop.
        let max_input = symbols.num_inputs() as u32 - 1;
        for state in 0..nodes.len() {
            for x in 0..=max_input {
                if !nodes[state].transitions().iter().any(|t| t.label.input == x) {
                    nodes[state].add_transition(FsmTransition::new(state, x, nop));
                }
            }
        }

        let max_output = symbols.num_outputs() as u32 - 1;
        let fsm = Fsm::from_parts(name, max_input, max_output, nodes, symbols);
        Dfsm::from_fsm(fsm)
    }

    // ------------------------------------------------------------------
    // Deterministic application
    // ------------------------------------------------------------------

    /// Apply an input trace deterministically, consuming the longest
    /// enabled prefix. An initial input without a transition yields an
    /// empty IO trace.
    pub fn apply_det(&self, itrc: &InputTrace) -> IOTrace {
        let mut outputs: Vec<u32> = Vec::new();
        let mut current = Some(self.fsm.initial_state());
        for &x in itrc.values() {
            let Some(state) = current else { break };
            match self.fsm.node(state).transitions().iter().find(|t| t.label.input == x) {
                Some(tr) => {
                    outputs.push(tr.label.output);
                    current = Some(tr.target);
                }
                None => current = None,
            }
        }
        let inputs = itrc.values()[..outputs.len()].to_vec();
        IOTrace::new(InputTrace::new(inputs), OutputTrace::new(outputs))
    }

    /// Does the machine produce exactly the expected output trace?
    pub fn pass(&self, io: &IOTrace) -> bool {
        self.apply_det(io.input()).output() == io.output()
    }

    // ------------------------------------------------------------------
    // Pk tables and minimisation
    // ------------------------------------------------------------------

    pub fn calc_pk_tables(&mut self) -> Result<(), FsmError> {
        let table = self.fsm.to_dfsm_table()?;
        self.pk = Some(PkTables::build(&table));
        self.table = Some(table);
        Ok(())
    }

    fn ensure_pk(&mut self) -> Result<(), FsmError> {
        if self.pk.is_none() {
            self.calc_pk_tables()?;
        }
        Ok(())
    }

    fn table_ref(&self) -> &DfsmTable {
        self.table.as_ref().expect("Pk tables have been computed")
    }

    fn pk_ref(&self) -> &PkTables {
        self.pk.as_ref().expect("Pk tables have been computed")
    }

    /// Are the two states separated by the final Pk table?
    pub fn distinguishable(&mut self, s1: usize, s2: usize) -> Result<bool, FsmError> {
        self.ensure_pk()?;
        let last = self.pk_ref().last();
        Ok(last.class_of[s1] != last.class_of[s2])
    }

    /// Quotient by the final Pk-table partition. The result carries fresh
    /// Pk tables of its own.
    pub fn minimise(&mut self) -> Result<Dfsm, FsmError> {
        self.fsm.remove_unreachable();
        self.table = None;
        self.pk = None;
        self.calc_pk_tables()?;

        let last = self.pk_ref().last();
        let mut representative: Vec<Option<usize>> = vec![None; last.num_classes];
        let mut members: Vec<Vec<usize>> = vec![Vec::new(); last.num_classes];
        for (s, &c) in last.class_of.iter().enumerate() {
            if representative[c].is_none() {
                representative[c] = Some(s);
            }
            members[c].push(s);
        }

        let mut symbols = SymbolTable::new(
            self.fsm.symbols().input_names().to_vec(),
            self.fsm.symbols().output_names().to_vec(),
            Vec::new(),
        );
        let table = self.table_ref();
        let mut nodes = Vec::with_capacity(last.num_classes);
        for c in 0..last.num_classes {
            let name = format!(
                "{{{}}}",
                members[c].iter().map(|&s| self.fsm.node_name(s)).collect::<Vec<_>>().join(",")
            );
            symbols.add_state(name.clone());
            let mut node = FsmNode::new(c, &name);
            let rep = representative[c].expect("every class has a member");
            let row = table.row(rep);
            for x in 0..table.num_inputs() {
                if let (Some(y), Some(next)) = (row.outputs[x], row.next[x]) {
                    node.add_transition(FsmTransition::new(
                        last.class_of[next],
                        x as u32,
                        y,
                    ));
                }
            }
            nodes.push(node);
        }
        nodes[last.class_of[self.fsm.initial_state()]].initial = true;

        let mut fsm = Fsm::from_parts(
            &format!("{}_MIN", self.fsm.name()),
            self.fsm.max_input(),
            self.fsm.max_output(),
            nodes,
            symbols,
        );
        fsm.minimal = Some(true);
        let mut dfsm = Dfsm::from_fsm(fsm)?;
        dfsm.calc_pk_tables()?;
        Ok(dfsm)
    }

    /// Characterisation set of a deterministic machine, distinguishing
    /// traces derived from the Pk-table descent.
    pub fn characterisation_set(&mut self) -> Result<TraceSet, FsmError> {
        self.calc_pk_tables()?;
        let mut w = Tree::new();
        for i in 0..self.size() {
            for j in i + 1..self.size() {
                if self.fsm.distinguished_by_tree(i, j, &w).is_some() {
                    continue;
                }
                let trc = dist_trace_pk(
                    self.table_ref(),
                    self.pk_ref(),
                    self.max_input(),
                    i,
                    j,
                );
                if trc.is_empty() {
                    continue;
                }
                w.add_to_root(trc.values());
            }
        }
        let lists = w.io_lists();
        self.fsm.char_set = Some(w);
        Ok(lists)
    }

    /// Pk-derived distinguishing trace; empty (with a diagnostic) for
    /// Moore-equivalent states.
    pub fn distinguishing_trace_pk(&mut self, i: usize, j: usize) -> Result<InputTrace, FsmError> {
        self.ensure_pk()?;
        Ok(dist_trace_pk(self.table_ref(), self.pk_ref(), self.max_input(), i, j))
    }

    // ------------------------------------------------------------------
    // Distinguishing-trace searches guided by a tree
    // ------------------------------------------------------------------

    /// Breadth-first over the branches of `tree`: the first trace whose
    /// application separates the two states.
    pub fn distinguishing_trace_in_tree(&self, s_i: usize, s_j: usize, tree: &Tree) -> InputTrace {
        let mut queue: VecDeque<Vec<u32>> = VecDeque::new();
        for (label, _) in tree.edges(Tree::ROOT) {
            queue.push_back(vec![label]);
        }
        while let Some(trc) = queue.pop_front() {
            if self.fsm.distinguished(s_i, s_j, &trc) {
                return InputTrace::new(trc);
            }
            if let Some(node) = tree.after(Tree::ROOT, &trc) {
                for (label, _) in tree.edges(node) {
                    let mut longer = trc.clone();
                    longer.push(label);
                    queue.push_back(longer);
                }
            }
        }
        InputTrace::default()
    }

    /// Continue past every leaf of `tree` with a Pk-derived trace, for
    /// leaves whose extensions reach distinct states.
    pub fn distinguishing_trace_after_tree(
        &self,
        s_i: usize,
        s_j: usize,
        tree: &Tree,
    ) -> InputTrace {
        for leaf in tree.leaves() {
            let path = tree.path_of(leaf);
            let (Some(&a), Some(&b)) = (
                self.fsm.after_trace(s_i, &path).first(),
                self.fsm.after_trace(s_j, &path).first(),
            ) else {
                continue;
            };
            if a == b {
                continue;
            }
            let gamma = dist_trace_pk(self.table_ref(), self.pk_ref(), self.max_input(), a, b);
            let mut itrc = InputTrace::new(path);
            itrc.append(gamma.values());
            return itrc;
        }
        InputTrace::default()
    }

    /// Distinguishing trace for the states reached by two traces: in-tree
    /// search first, then past-leaf extension, then the raw Pk descent.
    pub fn distinguishing_trace(&self, alpha: &[u32], beta: &[u32], tree: &Tree) -> InputTrace {
        let init = self.fsm.initial_state();
        let (Some(&s1), Some(&s2)) = (
            self.fsm.after_trace(init, alpha).first(),
            self.fsm.after_trace(init, beta).first(),
        ) else {
            warn!("distinguishing trace requested for traces leaving the machine");
            return InputTrace::default();
        };

        let gamma = self.distinguishing_trace_in_tree(s1, s2, tree);
        if !gamma.is_empty() {
            return gamma;
        }
        let gamma = self.distinguishing_trace_after_tree(s1, s2, tree);
        if !gamma.is_empty() {
            return gamma;
        }
        dist_trace_pk(self.table_ref(), self.pk_ref(), self.max_input(), s1, s2)
    }

    // ------------------------------------------------------------------
    // Generators
    // ------------------------------------------------------------------

    pub fn w_method(&mut self, num_add_states: usize) -> Result<TraceSet, FsmError> {
        let mut minimised = self.minimise()?;
        minimised.w_method_on_minimised(num_add_states)
    }

    pub fn w_method_on_minimised(&mut self, num_add_states: usize) -> Result<TraceSet, FsmError> {
        let mut tree = self.fsm.transition_cover();
        if num_add_states > 0 {
            tree.add(&TraceSet::input_enumeration(self.max_input(), 1, num_add_states));
        }
        let w = self.characterisation_set()?;
        tree.add(&w);
        Ok(tree.io_lists())
    }

    pub fn wp_method(&mut self, num_add_states: usize) -> Result<TraceSet, FsmError> {
        let mut minimised = self.minimise()?;
        minimised.wp_method_on_minimised(num_add_states)
    }

    pub fn wp_method_on_minimised(&mut self, num_add_states: usize) -> Result<TraceSet, FsmError> {
        let scov = self.fsm.state_cover();
        let mut tcov = self.fsm.transition_cover();
        tcov.remove(&scov);
        let w = self.characterisation_set()?;
        self.fsm.calc_state_identification_sets_fast()?;

        let mut wp1 = scov;
        if num_add_states > 0 {
            wp1.add(&TraceSet::input_enumeration(self.max_input(), 1, num_add_states));
        }
        wp1.add(&w);

        let mut wp2 = tcov;
        if num_add_states > 0 {
            wp2.add(&TraceSet::input_enumeration(
                self.max_input(),
                num_add_states,
                num_add_states,
            ));
        }
        self.fsm.append_state_identification_sets(&mut wp2);

        wp1.union_tree(&wp2);
        Ok(wp1.io_lists())
    }

    pub fn hsi_method(&mut self, num_add_states: usize) -> Result<TraceSet, FsmError> {
        let mut minimised = self.fsm.minimise_observable();
        minimised.hsi_method(num_add_states)
    }

    /// Transition cover as a (weak) test suite.
    pub fn t_method(&mut self) -> TraceSet {
        self.fsm.transition_cover().io_lists()
    }

    /// H-method on a minimised machine: the `V·Σ^{m+1}` seed enriched by
    /// distinguishing traces for state-cover pairs, cover-versus-extension
    /// pairs, and diverging prefix pairs.
    pub fn h_method_on_minimised(&mut self, num_add_states: usize) -> Result<TraceSet, FsmError> {
        self.ensure_pk()?;
        let init = self.fsm.initial_state();

        let v = self.fsm.state_cover();
        let mut itree = v.clone();
        let input_enum =
            TraceSet::input_enumeration(self.max_input(), num_add_states + 1, num_add_states + 1);
        itree.add(&input_enum);

        let iol_v: Vec<Vec<u32>> = v.io_lists_with_prefixes().lists().to_vec();

        // Step 1: state-cover pairs.
        for i in 0..iol_v.len() {
            for j in i + 1..iol_v.len() {
                let (alpha, beta) = (&iol_v[i], &iol_v[j]);
                let prt = itree.sub_tree(alpha).prefix_relation_tree(&itree.sub_tree(beta));
                let gamma = self.distinguishing_trace(alpha, beta, &prt);
                let mut alpha_gamma = alpha.clone();
                alpha_gamma.extend_from_slice(gamma.values());
                let mut beta_gamma = beta.clone();
                beta_gamma.extend_from_slice(gamma.values());
                itree.add_to_root(&alpha_gamma);
                itree.add_to_root(&beta_gamma);
            }
        }

        // Step 2: cover extensions against cover members reaching a
        // different state.
        let all_beta = TraceSet::input_enumeration(self.max_input(), 1, num_add_states + 1);
        for beta in &all_beta {
            for alpha in &iol_v {
                let mut alpha_beta = alpha.clone();
                alpha_beta.extend_from_slice(beta);
                let Some(&s_alpha_beta) = self.fsm.after_trace(init, &alpha_beta).first() else {
                    continue;
                };
                for omega in &iol_v {
                    let Some(&s_omega) = self.fsm.after_trace(init, omega).first() else {
                        continue;
                    };
                    if s_alpha_beta == s_omega {
                        continue;
                    }
                    let prt =
                        itree.sub_tree(&alpha_beta).prefix_relation_tree(&itree.sub_tree(omega));
                    let gamma = self.distinguishing_trace(&alpha_beta, omega, &prt);
                    let mut ab_gamma = alpha_beta.clone();
                    ab_gamma.extend_from_slice(gamma.values());
                    let mut omega_gamma = omega.clone();
                    omega_gamma.extend_from_slice(gamma.values());
                    itree.add_to_root(&ab_gamma);
                    itree.add_to_root(&omega_gamma);
                }
            }
        }

        // Step 3: diverging prefixes of the same extension.
        for alpha in &iol_v {
            for beta in &input_enum {
                for i in 0..beta.len().saturating_sub(1) {
                    let beta_1 = &beta[..=i];
                    for j in i + 1..beta.len() {
                        let beta_2 = &beta[..=j];
                        let mut ab1 = alpha.clone();
                        ab1.extend_from_slice(beta_1);
                        let mut ab2 = alpha.clone();
                        ab2.extend_from_slice(beta_2);
                        let (Some(&s1), Some(&s2)) = (
                            self.fsm.after_trace(init, &ab1).first(),
                            self.fsm.after_trace(init, &ab2).first(),
                        ) else {
                            continue;
                        };
                        if s1 == s2 {
                            continue;
                        }
                        let prt =
                            itree.sub_tree(&ab1).prefix_relation_tree(&itree.sub_tree(&ab2));
                        let gamma = self.distinguishing_trace(&ab1, &ab2, &prt);
                        let mut ab1_gamma = ab1.clone();
                        ab1_gamma.extend_from_slice(gamma.values());
                        let mut ab2_gamma = ab2.clone();
                        ab2_gamma.extend_from_slice(gamma.values());
                        itree.add_to_root(&ab1_gamma);
                        itree.add_to_root(&ab2_gamma);
                    }
                }
            }
        }

        Ok(itree.io_lists())
    }

    // ------------------------------------------------------------------
    // Distinguishing-trace matrix (Safe-H candidates)
    // ------------------------------------------------------------------

    /// All shortest Pk-derived distinguishing traces for every
    /// distinguishable state pair.
    pub fn calculate_dist_matrix(&mut self) -> Result<(), FsmError> {
        self.calc_pk_tables()?;
        let n = self.size();
        let mut dist = vec![vec![Vec::new(); n]; n];
        for i in 0..n {
            for j in i + 1..n {
                let last = self.pk_ref().last();
                if last.class_of[i] == last.class_of[j] {
                    continue;
                }
                let traces = self.all_dist_traces(i, j);
                dist[i][j] = traces.clone();
                dist[j][i] = traces;
            }
        }
        self.dist = Some(dist);
        Ok(())
    }

    /// Candidate distinguishing traces for a state pair, as computed by
    /// [`Dfsm::calculate_dist_matrix`].
    pub fn dist_traces(&self, i: usize, j: usize) -> &[Vec<u32>] {
        match &self.dist {
            Some(d) => &d[i][j],
            None => &[],
        }
    }

    fn all_dist_traces(&self, i: usize, j: usize) -> Vec<Vec<u32>> {
        let pk = self.pk_ref();
        let Some(level) =
            (0..pk.levels().len()).find(|&l| pk.class_of(l, i) != pk.class_of(l, j))
        else {
            return Vec::new();
        };
        self.dist_traces_level(level, &[], i, j)
    }

    fn dist_traces_level(&self, level: usize, prefix: &[u32], i: usize, j: usize) -> Vec<Vec<u32>> {
        let table = self.table_ref();
        let mut out = Vec::new();
        if level == 0 {
            for x in 0..table.num_inputs() {
                if table.row(i).outputs[x] != table.row(j).outputs[x] {
                    let mut trc = prefix.to_vec();
                    trc.push(x as u32);
                    out.push(trc);
                }
            }
            return out;
        }
        let pk = self.pk_ref();
        for x in 0..table.num_inputs() {
            if let (Some(ni), Some(nj)) = (table.row(i).next[x], table.row(j).next[x]) {
                if pk.class_of(level - 1, ni) != pk.class_of(level - 1, nj) {
                    let mut trc = prefix.to_vec();
                    trc.push(x as u32);
                    out.extend(self.dist_traces_level(level - 1, &trc, ni, nj));
                }
            }
        }
        out
    }

    // ------------------------------------------------------------------
    // Construction helpers
    // ------------------------------------------------------------------

    /// Completely specified random DFSM: one random transition per state
    /// and input.
    pub fn create_at_random(
        name: &str,
        max_input: u32,
        max_output: u32,
        num_states: usize,
        seed: Option<u64>,
    ) -> Dfsm {
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        let mut nodes: Vec<FsmNode> = (0..num_states).map(|i| FsmNode::new(i, name)).collect();
        for state in 0..num_states {
            for x in 0..=max_input {
                let target = rng.gen_range(0..num_states);
                let y = rng.gen_range(0..=max_output);
                nodes[state].add_transition(FsmTransition::new(target, x, y));
            }
        }
        let fsm = Fsm::from_parts(name, max_input, max_output, nodes, SymbolTable::default());
        Dfsm::from_fsm(fsm).expect("one transition per input is deterministic")
    }

    pub fn create_test_suite(&self, test_cases: &TraceSet) -> TestSuite {
        self.fsm.create_test_suite(test_cases)
    }

    pub fn to_dot(&self) -> String {
        self.fsm.to_dot()
    }
}

/// Distinguishing trace via the Pk descent: find the first level
/// separating the pair, then walk down level by level along inputs whose
/// successors stay separated, closing with an input on which the outputs
/// differ directly.
fn dist_trace_pk(
    table: &DfsmTable,
    pk: &PkTables,
    max_input: u32,
    i: usize,
    j: usize,
) -> InputTrace {
    let levels = pk.levels().len();
    let Some(l) = (1..=levels).find(|&l| pk.class_of(l - 1, i) != pk.class_of(l - 1, j)) else {
        warn!(state_a = i, state_b = j, "states are not separated by the Pk tables");
        return InputTrace::default();
    };

    let mut itrc = InputTrace::default();
    let (mut q1, mut q2) = (i, j);
    for k in 1..l {
        let level = l - k - 1;
        let mut found = false;
        for x in 0..=max_input {
            let row1 = table.row(q1);
            let row2 = table.row(q2);
            if let (Some(n1), Some(n2)) = (row1.next[x as usize], row2.next[x as usize]) {
                if pk.class_of(level, n1) != pk.class_of(level, n2) {
                    itrc.push(x);
                    q1 = n1;
                    q2 = n2;
                    found = true;
                    break;
                }
            }
        }
        if !found {
            warn!("inconsistency while descending the Pk tables");
            return InputTrace::default();
        }
    }

    for x in 0..=max_input {
        if table.row(q1).outputs[x as usize] != table.row(q2).outputs[x as usize] {
            itrc.push(x);
            return itrc;
        }
    }
    warn!("inconsistency in the final Pk-table step");
    InputTrace::default()
}
