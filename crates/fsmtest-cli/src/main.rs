use clap::{Parser, ValueEnum};
use fsmtest_core::dfsm::Dfsm;
use fsmtest_core::fsm::Fsm;
use fsmtest_core::safe::{safe_h_method, safe_w_method, safe_wp_method};
use fsmtest_core::suite::TestSuite;
use fsmtest_core::symbols::SymbolTable;
use fsmtest_core::FsmError;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Method {
    W,
    Wp,
    H,
    Hsi,
}

#[derive(Parser)]
#[command(name = "fsm-test-generator")]
#[command(about = "Generate FSM conformance test suites (W, Wp, HSI, H and safe variants)")]
#[command(version)]
struct Cli {
    /// Test generation method
    #[arg(long, value_enum, default_value = "wp")]
    method: Method,

    /// Fold a safety abstraction model into the suite (Safe-W/Wp/H);
    /// requires the ABSTRACTION argument
    #[arg(short = 's', long)]
    safe: bool,

    /// Name of the FSM, used for the generated artefact files
    #[arg(short = 'n', long, default_value = "FSM")]
    name: String,

    /// Symbol name files (inputs, outputs, states; one name per line),
    /// for models in the line format
    #[arg(short = 'p', long = "symbols", num_args = 3,
          value_names = ["IN_NAMES", "OUT_NAMES", "STATE_NAMES"])]
    symbol_files: Option<Vec<PathBuf>>,

    /// Fault-domain bound: number of additional states of the
    /// implementation under test
    #[arg(short = 'a', long = "additional-states", default_value_t = 0)]
    additional_states: usize,

    /// Test suite output file
    #[arg(short = 't', long = "testsuite", default_value = "testsuite.txt")]
    testsuite: PathBuf,

    /// Write one RTT-style log file per test case and output variant,
    /// named <PREFIX><test>_<variant>.log
    #[arg(long, value_name = "PREFIX")]
    rtt: Option<String>,

    /// Reference model file (.csv table, or .fsm in line or JSON format)
    model: PathBuf,

    /// Abstraction model file for the safe variants
    abstraction: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModelFormat {
    Csv,
    Json,
    Basic,
}

/// `.csv` means the table format; `.fsm` files carry either the JSON or
/// the line encoding, told apart by the first line's content.
fn detect_format(path: &Path, text: &str) -> ModelFormat {
    if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("csv")) {
        return ModelFormat::Csv;
    }
    let first = text.lines().next().unwrap_or_default();
    if first.contains('{') || first.contains('[') {
        ModelFormat::Json
    } else {
        ModelFormat::Basic
    }
}

enum Model {
    Deterministic(Dfsm),
    Nondeterministic(Fsm),
}

fn load_symbols(files: &Option<Vec<PathBuf>>) -> Result<SymbolTable, FsmError> {
    match files {
        None => Ok(SymbolTable::default()),
        Some(paths) => {
            let inputs = fs::read_to_string(&paths[0])?;
            let outputs = fs::read_to_string(&paths[1])?;
            let states = fs::read_to_string(&paths[2])?;
            Ok(SymbolTable::from_lines(&inputs, &outputs, &states))
        }
    }
}

fn load_model(cli: &Cli) -> Result<Model, FsmError> {
    let text = fs::read_to_string(&cli.model)?;
    match detect_format(&cli.model, &text) {
        ModelFormat::Csv => Ok(Model::Deterministic(Dfsm::parse_csv(&text, &cli.name)?)),
        ModelFormat::Json => Ok(Model::Deterministic(Dfsm::parse_json(&text, &cli.name)?)),
        ModelFormat::Basic => {
            let symbols = load_symbols(&cli.symbol_files)?;
            let fsm = Fsm::parse_line_format(&text, &cli.name, symbols)?;
            if fsm.is_deterministic() {
                Ok(Model::Deterministic(Dfsm::from_fsm(fsm)?))
            } else {
                Ok(Model::Nondeterministic(fsm))
            }
        }
    }
}

fn load_abstraction(cli: &Cli, reference: &Dfsm) -> Result<Dfsm, FsmError> {
    let Some(path) = &cli.abstraction else {
        return Err(FsmError::Parse(
            "the safe variants require an abstraction model file".to_string(),
        ));
    };
    let text = fs::read_to_string(path)?;
    let name = format!("ABS_{}", cli.name);
    match detect_format(path, &text) {
        ModelFormat::Csv => Dfsm::parse_csv_with(&text, &name, reference.symbols()),
        ModelFormat::Json => Dfsm::parse_json_with(&text, &name, reference.symbols()),
        ModelFormat::Basic => Err(FsmError::Parse(
            "abstraction models must be given in CSV or JSON format".to_string(),
        )),
    }
}

fn run(cli: &Cli) -> Result<(), FsmError> {
    let mut model = load_model(cli)?;
    let m = cli.additional_states;

    // Graphviz (and for deterministic models CSV) renderings of the
    // loaded model, as a parsing cross-check.
    match &model {
        Model::Deterministic(d) => {
            fs::write(format!("{}.dot", cli.name), d.to_dot())?;
            fs::write(format!("{}.csv", cli.name), d.to_csv())?;
        }
        Model::Nondeterministic(f) => {
            fs::write(format!("{}.dot", cli.name), f.to_dot())?;
        }
    }

    let symbols = match &model {
        Model::Deterministic(d) => d.symbols().clone(),
        Model::Nondeterministic(f) => f.symbols().clone(),
    };

    let suite: TestSuite = if cli.safe {
        let Model::Deterministic(dfsm) = &mut model else {
            return Err(FsmError::Parse(
                "the safe variants only operate on deterministic models".to_string(),
            ));
        };
        let mut abstraction = load_abstraction(cli, dfsm)?;
        fs::write(format!("ABS_{}.dot", cli.name), abstraction.to_dot())?;
        fs::write(format!("ABS_{}.csv", cli.name), abstraction.to_csv())?;
        match cli.method {
            Method::W => safe_w_method(dfsm, &mut abstraction, m)?,
            Method::Wp => safe_wp_method(dfsm, &mut abstraction, m)?,
            Method::H => safe_h_method(dfsm, &mut abstraction, m)?,
            Method::Hsi => {
                return Err(FsmError::Parse(
                    "the HSI method has no safe variant".to_string(),
                ))
            }
        }
    } else {
        match &mut model {
            Model::Deterministic(dfsm) => {
                let traces = match cli.method {
                    Method::W => dfsm.w_method(m)?,
                    Method::Wp => dfsm.wp_method(m)?,
                    Method::H => {
                        let mut minimised = dfsm.minimise()?;
                        minimised.h_method_on_minimised(m)?
                    }
                    Method::Hsi => dfsm.hsi_method(m)?,
                };
                dfsm.create_test_suite(&traces)
            }
            Model::Nondeterministic(fsm) => {
                let traces = match cli.method {
                    Method::W => fsm.w_method(m)?,
                    Method::Wp => fsm.wp_method(m)?,
                    Method::H => {
                        return Err(FsmError::Parse(
                            "the H method requires a deterministic model".to_string(),
                        ))
                    }
                    Method::Hsi => fsm.hsi_method(m)?,
                };
                fsm.create_test_suite(&traces)
            }
        }
    };

    fs::write(&cli.testsuite, suite.render(&symbols))?;

    if let Some(prefix) = &cli.rtt {
        for (file, content) in suite.rtt_files(&symbols, prefix) {
            fs::write(file, content)?;
        }
    }

    println!("Number of test cases: {}", suite.len());
    println!("        total length: {}", suite.total_length());
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fsm-test-generator: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(Path::new("m.csv"), "a;b"), ModelFormat::Csv);
        assert_eq!(detect_format(Path::new("m.fsm"), "{ \"inputs\": [] }"), ModelFormat::Json);
        assert_eq!(detect_format(Path::new("m.fsm"), "0 1 0 1\n"), ModelFormat::Basic);
        assert_eq!(detect_format(Path::new("m.fsm"), ""), ModelFormat::Basic);
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["fsm-test-generator", "model.fsm"]);
        assert_eq!(cli.method, Method::Wp);
        assert!(!cli.safe);
        assert_eq!(cli.name, "FSM");
        assert_eq!(cli.additional_states, 0);
        assert_eq!(cli.testsuite, PathBuf::from("testsuite.txt"));
    }

    #[test]
    fn test_cli_safe_method_combination() {
        let cli = Cli::parse_from([
            "fsm-test-generator",
            "--method",
            "h",
            "-s",
            "-a",
            "2",
            "model.csv",
            "abs.csv",
        ]);
        assert_eq!(cli.method, Method::H);
        assert!(cli.safe);
        assert_eq!(cli.additional_states, 2);
        assert_eq!(cli.abstraction, Some(PathBuf::from("abs.csv")));
    }
}
