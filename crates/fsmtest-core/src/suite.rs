use crate::output_tree::OutputTree;
use crate::symbols::SymbolTable;

/// An ordered collection of test cases, each the expected reaction of the
/// reference machine to one test input trace.
#[derive(Debug, Clone, Default)]
pub struct TestSuite {
    cases: Vec<OutputTree>,
}

impl TestSuite {
    pub fn new() -> Self {
        TestSuite { cases: Vec::new() }
    }

    pub fn push(&mut self, case: OutputTree) {
        self.cases.push(case);
    }

    pub fn cases(&self) -> &[OutputTree] {
        &self.cases
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Total number of test-case input symbols.
    pub fn total_length(&self) -> usize {
        self.cases.iter().map(|c| c.input().len()).sum()
    }

    /// Plain-text rendering: one `(i/o).(i/o)` line per IO-trace variant
    /// of every test case, in suite order.
    pub fn render(&self, symbols: &SymbolTable) -> String {
        let mut out = String::new();
        for case in &self.cases {
            out.push_str(&case.render(symbols));
        }
        out
    }

    /// RTT-style file set: one `(file name, content)` pair per test case
    /// per IO-trace variant, named `<prefix><test>_<variant>.log`.
    pub fn rtt_files(&self, symbols: &SymbolTable, prefix: &str) -> Vec<(String, String)> {
        let mut files = Vec::new();
        for (t_idx, case) in self.cases.iter().enumerate() {
            for (v_idx, io) in case.to_io_traces().iter().enumerate() {
                files.push((format!("{prefix}{t_idx}_{v_idx}.log"), io.to_rtt(symbols)));
            }
        }
        files
    }
}

impl IntoIterator for TestSuite {
    type Item = OutputTree;
    type IntoIter = std::vec::IntoIter<OutputTree>;

    fn into_iter(self) -> Self::IntoIter {
        self.cases.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::InputTrace;
    use crate::tree::Tree;

    fn one_case() -> OutputTree {
        let mut ot = OutputTree::new(InputTrace::new(vec![0, 1]), 0);
        let a = ot.grow(Tree::ROOT, 1, 1);
        ot.grow(a, 0, 0);
        ot
    }

    #[test]
    fn test_render_and_stats() {
        let symbols = SymbolTable::new(
            vec!["a".into(), "b".into()],
            vec!["nil".into(), "ok".into()],
            vec![],
        );
        let mut suite = TestSuite::new();
        suite.push(one_case());
        suite.push(one_case());
        assert_eq!(suite.len(), 2);
        assert_eq!(suite.total_length(), 4);
        assert_eq!(suite.render(&symbols), "(a/ok).(b/nil)\n(a/ok).(b/nil)\n");
    }

    #[test]
    fn test_rtt_files() {
        let symbols = SymbolTable::new(vec!["a".into(), "b".into()], vec!["x".into(), "y".into()], vec![]);
        let mut suite = TestSuite::new();
        suite.push(one_case());
        let files = suite.rtt_files(&symbols, "tc_");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "tc_0_0.log");
        assert_eq!(files[0].1, "INPUT a\nOUTPUT y\nINPUT b\nOUTPUT x\n");
    }
}
