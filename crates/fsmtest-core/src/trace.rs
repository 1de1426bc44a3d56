use crate::symbols::SymbolTable;
use std::fmt;

/// A sequence of input codes.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InputTrace {
    values: Vec<u32>,
}

/// A sequence of output codes.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutputTrace {
    values: Vec<u32>,
}

macro_rules! trace_impl {
    ($ty:ident, $name:ident) => {
        impl $ty {
            pub fn new(values: Vec<u32>) -> Self {
                $ty { values }
            }

            pub fn push(&mut self, e: u32) {
                self.values.push(e);
            }

            pub fn append(&mut self, tail: &[u32]) {
                self.values.extend_from_slice(tail);
            }

            pub fn values(&self) -> &[u32] {
                &self.values
            }

            pub fn into_values(self) -> Vec<u32> {
                self.values
            }

            pub fn len(&self) -> usize {
                self.values.len()
            }

            pub fn is_empty(&self) -> bool {
                self.values.is_empty()
            }

            pub fn iter(&self) -> std::slice::Iter<'_, u32> {
                self.values.iter()
            }

            /// Dot-separated symbolic rendering.
            pub fn render(&self, symbols: &SymbolTable) -> String {
                self.values
                    .iter()
                    .map(|&v| symbols.$name(v))
                    .collect::<Vec<_>>()
                    .join(".")
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for (i, v) in self.values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{v}")?;
                }
                Ok(())
            }
        }
    };
}

trace_impl!(InputTrace, input_name);
trace_impl!(OutputTrace, output_name);

/// A paired input/output trace. The output may be shorter than the input
/// when a partial machine rejected a suffix; rendering pairs positions up
/// to the output length.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IOTrace {
    input: InputTrace,
    output: OutputTrace,
}

impl IOTrace {
    pub fn new(input: InputTrace, output: OutputTrace) -> Self {
        IOTrace { input, output }
    }

    pub fn input(&self) -> &InputTrace {
        &self.input
    }

    pub fn output(&self) -> &OutputTrace {
        &self.output
    }

    pub fn len(&self) -> usize {
        self.output.len()
    }

    pub fn is_empty(&self) -> bool {
        self.output.is_empty() && self.input.is_empty()
    }

    /// `(i/o).(i/o)...` with symbolic names, one pair per executed step.
    pub fn render(&self, symbols: &SymbolTable) -> String {
        self.output
            .values()
            .iter()
            .enumerate()
            .map(|(i, &y)| {
                let x = self.input.values()[i];
                format!("({}/{})", symbols.input_name(x), symbols.output_name(y))
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// RTT log rendering: alternating `INPUT name` / `OUTPUT name` lines.
    pub fn to_rtt(&self, symbols: &SymbolTable) -> String {
        let mut s = String::new();
        for (i, &y) in self.output.values().iter().enumerate() {
            let x = self.input.values()[i];
            s.push_str("INPUT ");
            s.push_str(&symbols.input_name(x));
            s.push('\n');
            s.push_str("OUTPUT ");
            s.push_str(&symbols.output_name(y));
            s.push('\n');
        }
        s
    }
}

impl fmt::Display for IOTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, y) in self.output.values().iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "({}/{})", self.input.values()[i], y)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::SymbolTable;

    fn symbols() -> SymbolTable {
        SymbolTable::new(
            vec!["a".into(), "b".into()],
            vec!["0".into(), "ok".into()],
            vec![],
        )
    }

    #[test]
    fn test_append_and_eq() {
        let mut t = InputTrace::new(vec![0, 1]);
        t.append(&[1, 0]);
        assert_eq!(t, InputTrace::new(vec![0, 1, 1, 0]));
        assert_eq!(t.len(), 4);
    }

    #[test]
    fn test_ordering() {
        let a = IOTrace::new(InputTrace::new(vec![0]), OutputTrace::new(vec![1]));
        let b = IOTrace::new(InputTrace::new(vec![1]), OutputTrace::new(vec![0]));
        assert!(a < b);
        let c = IOTrace::new(InputTrace::new(vec![0]), OutputTrace::new(vec![0]));
        assert!(c < a);
    }

    #[test]
    fn test_render() {
        let io = IOTrace::new(InputTrace::new(vec![0, 1]), OutputTrace::new(vec![1, 0]));
        assert_eq!(io.render(&symbols()), "(a/ok).(b/0)");
        assert_eq!(io.to_string(), "(0/1).(1/0)");
    }

    #[test]
    fn test_render_partial() {
        // Output shorter than input: only the executed prefix is rendered.
        let io = IOTrace::new(InputTrace::new(vec![0, 1, 1]), OutputTrace::new(vec![1]));
        assert_eq!(io.render(&symbols()), "(a/ok)");
    }

    #[test]
    fn test_rtt() {
        let io = IOTrace::new(InputTrace::new(vec![1]), OutputTrace::new(vec![1]));
        assert_eq!(io.to_rtt(&symbols()), "INPUT b\nOUTPUT ok\n");
    }
}
