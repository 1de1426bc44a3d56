/// Output name denoting "no operation", used when completing a partial
/// deterministic machine with self-loops.
pub const NOP: &str = "_nop";

/// Bidirectional mapping between integer codes and human-readable names
/// for the three disjoint alphabets of a machine: inputs, outputs, states.
///
/// Lookups in the name→code direction are linear; the tables are small and
/// only consulted while parsing models. Out-of-range codes render as their
/// decimal value (states with an optional prefix), so machines constructed
/// without names still print.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTable {
    inputs: Vec<String>,
    outputs: Vec<String>,
    states: Vec<String>,
}

impl SymbolTable {
    pub fn new(inputs: Vec<String>, outputs: Vec<String>, states: Vec<String>) -> Self {
        SymbolTable { inputs, outputs, states }
    }

    /// Build a table from three line-oriented name listings, one name per
    /// line (the presentation-layer file format of the CLI's `--symbols`).
    pub fn from_lines(inputs: &str, outputs: &str, states: &str) -> Self {
        let split = |s: &str| -> Vec<String> {
            s.lines().map(|l| l.trim_end_matches('\r').to_string()).collect()
        };
        SymbolTable {
            inputs: split(inputs),
            outputs: split(outputs),
            states: split(states),
        }
    }

    pub fn in2num(&self, name: &str) -> Option<u32> {
        self.inputs.iter().position(|s| s == name).map(|i| i as u32)
    }

    pub fn out2num(&self, name: &str) -> Option<u32> {
        self.outputs.iter().position(|s| s == name).map(|i| i as u32)
    }

    pub fn state2num(&self, name: &str) -> Option<usize> {
        self.states.iter().position(|s| s == name)
    }

    pub fn input_name(&self, code: u32) -> String {
        match self.inputs.get(code as usize) {
            Some(s) => s.clone(),
            None => code.to_string(),
        }
    }

    pub fn output_name(&self, code: u32) -> String {
        match self.outputs.get(code as usize) {
            Some(s) => s.clone(),
            None => code.to_string(),
        }
    }

    /// Name of a state, synthesising `prefix` + decimal id for ids without
    /// a registered name.
    pub fn state_name(&self, id: usize, prefix: &str) -> String {
        match self.states.get(id) {
            Some(s) => s.clone(),
            None => format!("{prefix}{id}"),
        }
    }

    pub fn add_state(&mut self, name: String) {
        self.states.push(name);
    }

    pub fn remove_state(&mut self, id: usize) {
        if id < self.states.len() {
            self.states.remove(id);
        }
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    pub fn input_names(&self) -> &[String] {
        &self.inputs
    }

    pub fn output_names(&self) -> &[String] {
        &self.outputs
    }

    pub fn state_names(&self) -> &[String] {
        &self.states
    }

    /// Two tables agree when their input and output listings are equal.
    /// State names are deliberately not compared: quotient constructions
    /// rename states while preserving the observable alphabets.
    pub fn compare(&self, other: &SymbolTable) -> bool {
        self.inputs == other.inputs && self.outputs == other.outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SymbolTable {
        SymbolTable::new(
            vec!["a".into(), "b".into()],
            vec![NOP.into(), "on".into()],
            vec!["idle".into(), "busy".into()],
        )
    }

    #[test]
    fn test_roundtrip() {
        let t = table();
        for x in 0..2u32 {
            assert_eq!(t.in2num(&t.input_name(x)), Some(x));
            assert_eq!(t.out2num(&t.output_name(x)), Some(x));
        }
        assert_eq!(t.state2num(&t.state_name(1, "")), Some(1));
    }

    #[test]
    fn test_fallback_names() {
        let t = table();
        assert_eq!(t.input_name(7), "7");
        assert_eq!(t.state_name(9, "s"), "s9");
        assert_eq!(t.state_name(9, ""), "9");
        assert_eq!(t.in2num("zap"), None);
    }

    #[test]
    fn test_state_mutation() {
        let mut t = table();
        t.add_state("done".into());
        assert_eq!(t.state2num("done"), Some(2));
        t.remove_state(0);
        assert_eq!(t.state2num("busy"), Some(0));
        assert_eq!(t.state2num("idle"), None);
    }

    #[test]
    fn test_compare_ignores_states() {
        let a = table();
        let mut b = table();
        b.add_state("extra".into());
        assert!(a.compare(&b));
        let c = SymbolTable::new(vec!["a".into()], vec![NOP.into(), "on".into()], vec![]);
        assert!(!a.compare(&c));
    }

    #[test]
    fn test_from_lines() {
        let t = SymbolTable::from_lines("a\nb", "_nop\non", "idle\nbusy");
        assert_eq!(t.num_inputs(), 2);
        assert_eq!(t.out2num("on"), Some(1));
        assert_eq!(t.state_name(0, ""), "idle");
    }
}
