// src/collect/filter.rs
//
// Completion filter: keep a (draw, seed) pair only if it finished in every
// declared scenario.

use std::collections::{BTreeSet, HashMap};

use tracing::info;

use super::{Keyspace, RunRecord};

/// Drop records whose (draw, seed) did not complete in every scenario of the
/// keyspace. Records outside the keyspace are dropped too. Output is grouped
/// by draw in keyspace order; input order is kept within a draw.
pub fn filter_complete(records: Vec<RunRecord>, keyspace: &Keyspace) -> Vec<RunRecord> {
    let mut completed: HashMap<(u64, &str), BTreeSet<u64>> = HashMap::new();
    for r in &records {
        completed
            .entry((r.identity.input_draw, r.identity.scenario.as_str()))
            .or_default()
            .insert(r.identity.random_seed);
    }

    let mut survivors: HashMap<u64, BTreeSet<u64>> = HashMap::new();
    for &draw in &keyspace.input_draw {
        let mut seeds: BTreeSet<u64> = keyspace.random_seed.iter().copied().collect();
        for scenario in &keyspace.scenario {
            let done = completed.get(&(draw, scenario.as_str()));
            seeds.retain(|s| done.is_some_and(|d| d.contains(s)));
        }
        survivors.insert(draw, seeds);
    }

    let before = records.len();
    let mut by_draw: HashMap<u64, Vec<RunRecord>> = HashMap::new();
    for r in records {
        let keep = survivors
            .get(&r.identity.input_draw)
            .is_some_and(|seeds| seeds.contains(&r.identity.random_seed))
            && keyspace.scenario.contains(&r.identity.scenario);
        if keep {
            by_draw.entry(r.identity.input_draw).or_default().push(r);
        }
    }

    let mut out = Vec::with_capacity(before);
    for draw in &keyspace.input_draw {
        if let Some(rs) = by_draw.remove(draw) {
            out.extend(rs);
        }
    }

    info!(
        kept = out.len(),
        dropped = before - out.len(),
        "filtered incomplete draw/seed combinations"
    );
    out
}
