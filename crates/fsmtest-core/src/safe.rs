//! Safe-W / Safe-Wp / Safe-H: generators that fold a second, coarser
//! "abstraction" DFSM into the suite, so every fault visible in the
//! abstraction's observations is still revealed.

use crate::dfsm::Dfsm;
use crate::error::FsmError;
use crate::segmented::{SegmentedTrace, TraceSegment};
use crate::suite::TestSuite;
use crate::tree::{TraceSet, Tree};
use tracing::warn;

/// Insertion-cost ranking over pairs of tentative-add outcomes; keeping
/// the suite tree narrow beats lengthening, which beats branching.
const COST: [[u8; 3]; 3] = [[0, 1, 3], [1, 2, 4], [3, 4, 5]];

fn separated(dfsm: &Dfsm, i: usize, j: usize) -> bool {
    let last = dfsm.pk_tables().expect("Pk tables computed by minimisation").last();
    last.class_of[i] != last.class_of[j]
}

/// Safe-W: the reference suite `V·W` joined with the abstraction-derived
/// parts `V·W_s` and `V·Σ^{≤m+1}·W_s`.
pub fn safe_w_method(
    dfsm: &mut Dfsm,
    abstraction: &mut Dfsm,
    num_add_states: usize,
) -> Result<TestSuite, FsmError> {
    let mut ref_min = dfsm.minimise()?;
    let w = ref_min.characterisation_set()?;

    let mut abs_min = abstraction.minimise()?;
    let w_safe = abs_min.characterisation_set()?;

    let mut w1 = ref_min.fsm_mut().state_cover();
    w1.add(&w);

    let mut w21 = ref_min.fsm_mut().state_cover();
    w21.add(&w_safe);

    let mut w22 = ref_min.fsm_mut().state_cover();
    w22.add(&TraceSet::input_enumeration(dfsm.max_input(), 1, num_add_states + 1));
    w22.add(&w_safe);

    w1.union_tree(&w21);
    w1.union_tree(&w22);

    Ok(dfsm.create_test_suite(&w1.io_lists()))
}

/// Safe-Wp: `V·W ∪ V·Σ^{≤m}·W_s ∪ V·Σ^{m+1}⊕{W_s,i}`, the abstraction's
/// state identification sets spliced by the abstraction itself.
pub fn safe_wp_method(
    dfsm: &mut Dfsm,
    abstraction: &mut Dfsm,
    num_add_states: usize,
) -> Result<TestSuite, FsmError> {
    let mut ref_min = dfsm.fsm_mut().minimise_observable();
    let w = ref_min.characterisation_set()?;

    let mut abs_min = abstraction.minimise()?;
    let w_safe = abs_min.characterisation_set()?;
    abs_min.fsm_mut().calc_state_identification_sets()?;

    let mut w1 = ref_min.state_cover();
    w1.add(&w);

    let mut w2 = ref_min.state_cover();
    w2.add(&w_safe);
    if num_add_states > 0 {
        let mut w22 = ref_min.state_cover();
        w22.add(&TraceSet::input_enumeration(dfsm.max_input(), 1, num_add_states));
        w22.add(&w_safe);
        w2.union_tree(&w22);
    }

    let mut w3 = ref_min.state_cover();
    w3.add(&TraceSet::input_enumeration(
        dfsm.max_input(),
        num_add_states + 1,
        num_add_states + 1,
    ));
    abs_min.fsm().append_state_identification_sets(&mut w3);

    w1.union_tree(&w2);
    w1.union_tree(&w3);

    Ok(dfsm.create_test_suite(&w1.io_lists()))
}

/// Safe-H: the H-method seed over the minimised reference enriched with
/// distinguishing extensions for the pair sets A (state-cover pairs),
/// B (cover against extensions) and C (diverging extension prefixes),
/// pairs of B and C filtered by distinguishability in the abstraction.
/// Candidate extensions are ranked by the insertion-cost matrix.
pub fn safe_h_method(
    dfsm: &mut Dfsm,
    abstraction: &mut Dfsm,
    num_add_states: usize,
) -> Result<TestSuite, FsmError> {
    let mut ref_min = dfsm.minimise()?;
    ref_min.calculate_dist_matrix()?;

    // Translate minimised node ids back to representatives of the
    // unminimised machine; those ids coincide with the abstraction's.
    let pk_last = dfsm.pk_tables().expect("minimisation computed the Pk tables").last();
    let mut min2orig = vec![0usize; ref_min.size()];
    for n in 0..dfsm.size() {
        min2orig[pk_last.class_of[n]] = n;
    }

    // Computes the abstraction's Pk tables as a side effect.
    abstraction.minimise()?;

    let s0 = ref_min.initial_state();
    let mut suite_tree = Tree::new();

    let v = ref_min.fsm_mut().state_cover();
    let v_lists: Vec<Vec<u32>> = v.io_lists_with_prefixes().lists().to_vec();

    // The state cover as single-segment traces with their target states.
    let mut v_traces: Vec<SegmentedTrace> = Vec::new();
    for trace in &v_lists {
        let Some(&target) = ref_min.fsm().after_trace(s0, trace).first() else {
            warn!("state-cover trace leaves the machine");
            continue;
        };
        v_traces.push(SegmentedTrace::new(vec![TraceSegment::with_target(trace.clone(), target)]));
    }

    // A: state-cover pairs reaching distinct states.
    let mut a_pairs = Vec::new();
    for i in 0..v_traces.len() {
        for j in i + 1..v_traces.len() {
            if v_traces[i].target() != v_traces[j].target() {
                a_pairs.push((v_traces[i].clone(), v_traces[j].clone()));
            }
        }
    }

    // Cover traces extended by every input enumeration; these seed the
    // suite tree.
    let input_enum = TraceSet::input_enumeration(ref_min.max_input(), 1, num_add_states + 1);
    let mut v_enum_traces: Vec<SegmentedTrace> = Vec::new();
    for v_trace in &v_traces {
        for suffix in &input_enum {
            let from = v_trace.target().expect("cover traces carry targets");
            let Some(&target) = ref_min.fsm().after_trace(from, suffix).first() else {
                continue;
            };
            let mut extended = v_trace.clone();
            extended.push(TraceSegment::with_target(suffix.clone(), target));
            if !v_traces.contains(&extended) {
                suite_tree.add_to_root(&extended.flatten());
                v_enum_traces.push(extended);
            }
        }
    }

    // B: cover traces against extensions reaching a different state.
    let mut b_pairs = Vec::new();
    for v_trace in &v_traces {
        for u in &v_enum_traces {
            if v_trace.target() != u.target() {
                b_pairs.push((v_trace.clone(), u.clone()));
            }
        }
    }

    // C: proper prefixes of an extension that reach a different state
    // than the full extension.
    let mut c_pairs = Vec::new();
    for u in &v_enum_traces {
        let last_seg = u.back().expect("extensions have two segments").clone();
        let first_seg = u.front().expect("extensions have two segments").clone();
        for prefix in (1..last_seg.len()).rev() {
            let mut shortened = last_seg.clone();
            shortened.set_prefix(prefix);
            let from = first_seg.target().expect("cover traces carry targets");
            let Some(&target) = ref_min.fsm().after_trace(from, shortened.live()).first() else {
                continue;
            };
            if Some(target) != u.target() {
                shortened.set_target(target);
                let pref_trace = SegmentedTrace::new(vec![first_seg.clone(), shortened]);
                c_pairs.push((pref_trace, u.clone()));
            }
        }
    }

    add_sh_traces(&a_pairs, &ref_min, &ref_min, &mut suite_tree, None);
    add_sh_traces(&b_pairs, &ref_min, abstraction, &mut suite_tree, Some(&min2orig));
    add_sh_traces(&c_pairs, &ref_min, abstraction, &mut suite_tree, Some(&min2orig));

    Ok(ref_min.create_test_suite(&suite_tree.io_lists()))
}

/// Extend each pair by the cheapest distinguishing trace and add the
/// extensions to the suite tree. Pairs whose targets the distinguishing
/// machine cannot separate are skipped.
fn add_sh_traces(
    pairs: &[(SegmentedTrace, SegmentedTrace)],
    ref_min: &Dfsm,
    dist: &Dfsm,
    suite_tree: &mut Tree,
    min2orig: Option<&[usize]>,
) {
    for (tr1, tr2) in pairs {
        let (Some(s1), Some(s2)) = (tr1.target(), tr2.target()) else {
            continue;
        };
        let (d1, d2) = match min2orig {
            None => (s1, s2),
            Some(map) => (map[s1], map[s2]),
        };
        if !separated(dist, d1, d2) {
            continue;
        }

        let candidates = ref_min.dist_traces(s1, s2);
        let Some(first) = candidates.first() else {
            warn!(state_a = s1, state_b = s2, "no distinguishing trace recorded for pair");
            continue;
        };

        let extend = |base: &SegmentedTrace, gamma: &[u32]| {
            let mut ext = base.clone();
            ext.push(TraceSegment::new(gamma.to_vec()));
            ext
        };

        let mut best1 = extend(tr1, first);
        let mut best2 = extend(tr2, first);
        let mut effect1 = suite_tree.tentative_add_segmented(&best1);
        let mut effect2 = suite_tree.tentative_add_segmented(&best2);

        for cand in &candidates[1..] {
            if effect1 + effect2 == 0 {
                break;
            }
            let aux1 = extend(tr1, cand);
            let aux2 = extend(tr2, cand);
            let eff1 = suite_tree.tentative_add_segmented(&aux1);
            let eff2 = suite_tree.tentative_add_segmented(&aux2);
            if COST[eff1 as usize][eff2 as usize] < COST[effect1 as usize][effect2 as usize] {
                best1 = aux1;
                best2 = aux2;
                effect1 = eff1;
                effect2 = eff2;
            }
        }

        if effect1 > 0 {
            suite_tree.add_to_root(&best1.flatten());
        }
        if effect2 > 0 {
            suite_tree.add_to_root(&best2.flatten());
        }
    }
}
