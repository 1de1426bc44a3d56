use fsmtest_core::dfsm::Dfsm;
use fsmtest_core::fsm::Fsm;
use fsmtest_core::safe::{safe_h_method, safe_w_method, safe_wp_method};
use fsmtest_core::symbols::SymbolTable;
use fsmtest_core::trace::InputTrace;
use fsmtest_core::tree::TraceSet;

fn random_dfsm(seed: u64) -> Dfsm {
    Dfsm::create_at_random("ref", 4, 4, 8, Some(seed))
}

/// Rebuild the machine with the output of the first transition of the
/// initial state flipped: a reachable, always-detectable output fault.
fn flip_first_output(d: &Dfsm) -> Dfsm {
    let dump = d.fsm().dump_line_format();
    let mut lines: Vec<String> = dump.lines().map(str::to_string).collect();
    let fields: Vec<i64> =
        lines[0].split_whitespace().map(|t| t.parse().unwrap()).collect();
    let flipped = (fields[2] + 1) % (i64::from(d.max_output()) + 1);
    lines[0] = format!("{} {} {} {}", fields[0], fields[1], flipped, fields[3]);
    Dfsm::parse_line_format(&lines.join("\n"), "mutant", SymbolTable::default()).unwrap()
}

fn kills(reference: &Dfsm, mutant: &Dfsm, suite: &TraceSet) -> bool {
    suite.iter().any(|t| {
        let itrc = InputTrace::new(t.clone());
        reference.apply_det(&itrc) != mutant.apply_det(&itrc)
    })
}

#[test]
fn test_minimisation_preserves_w_suite_behavior() {
    for seed in [1u64, 2, 3] {
        let mut generator = random_dfsm(seed);
        let suite = generator.w_method(0).unwrap();
        let reference = random_dfsm(seed);
        let minimised = {
            let mut d = random_dfsm(seed);
            d.minimise().unwrap()
        };
        for trace in &suite {
            let itrc = InputTrace::new(trace.clone());
            assert_eq!(
                reference.apply_det(&itrc).output(),
                minimised.apply_det(&itrc).output(),
                "seed {seed}: minimisation changed the reaction to {itrc}"
            );
        }
    }
}

#[test]
fn test_w_method_kills_output_fault() {
    for seed in [5u64, 6, 7] {
        let reference = random_dfsm(seed);
        let mutant = flip_first_output(&reference);
        let suite = random_dfsm(seed).w_method(0).unwrap();
        assert!(kills(&reference, &mutant, &suite), "seed {seed}: W suite missed the fault");
    }
}

#[test]
fn test_wp_method_kills_output_fault() {
    for seed in [5u64, 6, 7] {
        let reference = random_dfsm(seed);
        let mutant = flip_first_output(&reference);
        let suite = random_dfsm(seed).wp_method(0).unwrap();
        assert!(kills(&reference, &mutant, &suite), "seed {seed}: Wp suite missed the fault");
    }
}

#[test]
fn test_hsi_method_kills_output_fault() {
    for seed in [5u64, 6] {
        let reference = random_dfsm(seed);
        let mutant = flip_first_output(&reference);
        let suite = random_dfsm(seed).hsi_method(0).unwrap();
        assert!(kills(&reference, &mutant, &suite), "seed {seed}: HSI suite missed the fault");
    }
}

#[test]
fn test_h_method_kills_output_fault() {
    for seed in [5u64, 6] {
        let reference = random_dfsm(seed);
        let mutant = flip_first_output(&reference);
        let suite = {
            let mut d = random_dfsm(seed);
            let mut minimised = d.minimise().unwrap();
            minimised.h_method_on_minimised(0).unwrap()
        };
        assert!(kills(&reference, &mutant, &suite), "seed {seed}: H suite missed the fault");
    }
}

#[test]
fn test_suite_grows_with_fault_bound() {
    for seed in [2u64, 3] {
        let smaller = random_dfsm(seed).w_method(0).unwrap();
        let larger = random_dfsm(seed).w_method(1).unwrap();
        for t0 in &smaller {
            assert!(
                larger.iter().any(|t1| t1.starts_with(&t0[..])),
                "seed {seed}: suite(0) trace {t0:?} not covered by suite(1)"
            );
        }
        assert!(larger.len() >= smaller.len());
    }
}

#[test]
fn test_wp_suite_not_larger_than_w_suite() {
    for seed in [1u64, 4, 9] {
        let w = random_dfsm(seed).w_method(1).unwrap();
        let wp = random_dfsm(seed).wp_method(1).unwrap();
        assert!(
            wp.len() <= w.len(),
            "seed {seed}: |Wp| = {} exceeds |W| = {}",
            wp.len(),
            w.len()
        );
    }
}

#[test]
fn test_generators_are_deterministic() {
    for seed in [8u64] {
        let a = random_dfsm(seed).wp_method(1).unwrap();
        let b = random_dfsm(seed).wp_method(1).unwrap();
        assert_eq!(a, b);
        let mut h1 = random_dfsm(seed).minimise().unwrap();
        let mut h2 = random_dfsm(seed).minimise().unwrap();
        assert_eq!(
            h1.h_method_on_minimised(1).unwrap(),
            h2.h_method_on_minimised(1).unwrap()
        );
    }
}

#[test]
fn test_pk_descent_beyond_first_level() {
    // Chain where only the last state's output differs: distinguishing
    // state 0 from 1 requires walking two levels down the Pk tables.
    let text = "0 0 0 1\n1 0 0 2\n2 0 1 2\n";
    let mut d = Dfsm::parse_line_format(text, "chain", SymbolTable::default()).unwrap();
    let trc = d.distinguishing_trace_pk(0, 1).unwrap();
    assert_eq!(trc.values(), &[0, 0]);
    assert!(d.fsm().distinguished(0, 1, trc.values()));
}

#[test]
fn test_w_method_on_nondeterministic_machine() {
    let text = "0 0 0 1\n0 0 0 2\n1 0 1 1\n2 1 1 2\n1 1 0 0\n2 0 1 0\n";
    let fsm = Fsm::parse_line_format(text, "nd", SymbolTable::default()).unwrap();
    assert!(!fsm.is_deterministic());
    let suite = fsm.w_method(0).unwrap();
    assert!(!suite.is_empty());
    // The observable transform reacts like the original on every test.
    let obs = fsm.transform_to_observable();
    for trace in &suite {
        let itrc = InputTrace::new(trace.clone());
        let mut a: Vec<Vec<u32>> =
            fsm.apply(&itrc).output_traces().iter().map(|o| o.values().to_vec()).collect();
        let mut b: Vec<Vec<u32>> =
            obs.apply(&itrc).output_traces().iter().map(|o| o.values().to_vec()).collect();
        a.sort();
        b.sort();
        assert_eq!(a, b, "reaction to {itrc} differs");
    }
}

const REF_CSV: &str = "\
 ; e1 ; e2
\"s0\" ; \"s1 / a1\" ; \"s0 / a2\"
\"s1\" ; \"s2 / a2\" ; \"s0 / a1\"
\"s2\" ; \"s0 / a3\" ; \"s2 / a2\"
";

const ABS_CSV: &str = "\
 ; e1 ; e2
\"s0\" ; \"s1 / a1\" ; \"s0 / a2\"
\"s1\" ; \"s2 / a2\" ; \"s0 / a1\"
\"s2\" ; \"s0 / a1\" ; \"s2 / a2\"
";

fn csv_pair() -> (Dfsm, Dfsm) {
    let reference = Dfsm::parse_csv(REF_CSV, "ref").unwrap();
    let abstraction =
        Dfsm::parse_csv_with(ABS_CSV, "abs", reference.symbols()).unwrap();
    (reference, abstraction)
}

#[test]
fn test_safe_w_method() {
    let (mut reference, mut abstraction) = csv_pair();
    let suite = safe_w_method(&mut reference, &mut abstraction, 0).unwrap();
    assert!(!suite.is_empty());
    let checker = Dfsm::parse_csv(REF_CSV, "ref").unwrap();
    for case in suite.cases() {
        for io in case.to_io_traces() {
            assert!(checker.pass(&io), "reference rejects its own safe-W case {io}");
        }
    }
}

#[test]
fn test_safe_wp_method() {
    let (mut reference, mut abstraction) = csv_pair();
    let suite = safe_wp_method(&mut reference, &mut abstraction, 1).unwrap();
    assert!(!suite.is_empty());
    let checker = Dfsm::parse_csv(REF_CSV, "ref").unwrap();
    for case in suite.cases() {
        for io in case.to_io_traces() {
            assert!(checker.pass(&io), "reference rejects its own safe-Wp case {io}");
        }
    }
}

#[test]
fn test_safe_h_method() {
    let (mut reference, mut abstraction) = csv_pair();
    let suite = safe_h_method(&mut reference, &mut abstraction, 0).unwrap();
    assert!(!suite.is_empty());
    // The suite was generated over the minimised reference; the original
    // machine accepts it unchanged.
    let checker = Dfsm::parse_csv(REF_CSV, "ref").unwrap();
    for case in suite.cases() {
        for io in case.to_io_traces() {
            assert!(checker.pass(&io), "reference rejects its own safe-H case {io}");
        }
    }
}

#[test]
fn test_safe_h_detects_safety_fault() {
    // Mutate a transition the abstraction still observes distinctly.
    let (mut reference, mut abstraction) = csv_pair();
    let suite = safe_h_method(&mut reference, &mut abstraction, 0).unwrap();
    let faulty_csv = REF_CSV.replace("\"s2 / a2\"", "\"s2 / a1\"");
    let mutant = Dfsm::parse_csv(&faulty_csv, "mutant").unwrap();
    let detected = suite.cases().iter().any(|case| {
        case.to_io_traces().iter().any(|io| !mutant.pass(io))
    });
    assert!(detected, "safe-H suite missed an observable output fault");
}

#[test]
fn test_rendered_suite_uses_symbolic_names() {
    let mut reference = Dfsm::parse_csv(REF_CSV, "ref").unwrap();
    let traces = reference.w_method(0).unwrap();
    let reference = Dfsm::parse_csv(REF_CSV, "ref").unwrap();
    let suite = reference.create_test_suite(&traces);
    let rendered = suite.render(reference.symbols());
    assert!(rendered.contains("(e1/"), "missing input names in {rendered}");
    assert!(rendered.lines().count() >= suite.len());
}
