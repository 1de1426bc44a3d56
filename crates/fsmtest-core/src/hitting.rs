use rustc_hash::FxHashSet;

/// Minimum-cardinality hitting set: the smallest set of elements meeting
/// every input set. Exact branch-and-bound, branching on the elements of
/// the first unhit set; the instances here are small (one set per state
/// pair, elements indexing characterisation-set traces).
///
/// Empty input sets are unhittable and are skipped. Ties are broken
/// towards smaller element values, so the result is deterministic.
pub fn min_cardinality_hitting_set(sets: &[FxHashSet<usize>]) -> FxHashSet<usize> {
    let sets: Vec<Vec<usize>> = sets
        .iter()
        .filter(|s| !s.is_empty())
        .map(|s| {
            let mut v: Vec<usize> = s.iter().copied().collect();
            v.sort_unstable();
            v
        })
        .collect();

    let mut best: Option<Vec<usize>> = None;
    let mut chosen = Vec::new();
    search(&sets, &mut chosen, &mut best);
    best.unwrap_or_default().into_iter().collect()
}

fn search(sets: &[Vec<usize>], chosen: &mut Vec<usize>, best: &mut Option<Vec<usize>>) {
    if let Some(b) = best {
        if chosen.len() >= b.len() {
            return;
        }
    }
    let unhit = sets.iter().find(|s| !s.iter().any(|e| chosen.contains(e)));
    let Some(unhit) = unhit else {
        *best = Some(chosen.clone());
        return;
    };
    for &e in unhit {
        chosen.push(e);
        search(sets, chosen, best);
        chosen.pop();
    }
}
