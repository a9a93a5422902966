//! Three-phase reconciliation of stored entities against incoming records.
//!
//! Matching is always scoped to one group and only ever compares the
//! normalized **primary** text. The result is a partial one-to-one matching
//! plus the leftovers on each side.
//!
//! # Phases
//!
//! 1. **Exact key.** Incoming records, in input order, take the oldest
//!    unmatched stored entity whose normalized primary text is identical
//!    (FIFO per text, so duplicate stored texts resolve deterministically).
//!    Confidence `2.0`.
//! 2. **Greedy high confidence.** Every remaining pair is scored, pairs are
//!    sorted by score descending (ties: incoming index, then existing index,
//!    ascending) and accepted while the score is at least
//!    [`MatchPolicy::accept_threshold`] and both sides are still free.
//! 3. **Forced leftovers.** While both pools are non-empty, the single best
//!    remaining pair is accepted regardless of score (ties: first found
//!    scanning incoming-major). Disabled by
//!    [`MatchPolicy::force_leftovers`].
//!
//! Phase 2 is a greedy approximation of maximum-weight bipartite matching.
//! It is not globally optimal; it prefers certain pairings over slightly
//! better alternative assignments, and it is deterministic. Keep it that
//! way: callers and operators rely on its exact tie-breaking.
//!
//! The engine never fails and performs no I/O.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::models::{IncomingRecord, StoredEntity};
use crate::normalize::normalize;
use crate::similarity::{score, EXACT_SCORE};

/// Tunable matching policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchPolicy {
    /// Minimum score for a phase-2 acceptance.
    pub accept_threshold: f64,
    /// Pairings scoring below this are surfaced for manual audit.
    pub review_threshold: f64,
    /// Run phase 3. When off, leftovers become new / stale instead.
    pub force_leftovers: bool,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            accept_threshold: 0.60,
            review_threshold: 0.75,
            force_leftovers: true,
        }
    }
}

/// Which phase accepted a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    Exact,
    Scored,
    Forced,
}

/// One accepted incoming → existing pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Index into the `incoming` slice passed to [`reconcile`].
    pub incoming_index: usize,
    /// Index into the `existing` slice passed to [`reconcile`].
    pub existing_index: usize,
    /// Score in `[0, 2.0]`.
    pub confidence: f64,
    pub phase: MatchPhase,
}

/// Outcome of reconciling one group.
///
/// Every in-group incoming index appears exactly once across `matched`
/// and `new_incoming`; every in-group existing index exactly once across
/// `matched` and `stale_existing`. Indexes are only meaningful against the
/// exact slices the plan was computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationPlan {
    pub group_key: String,
    /// Matches in acceptance order.
    pub matched: Vec<MatchResult>,
    pub new_incoming: BTreeSet<usize>,
    pub stale_existing: BTreeSet<usize>,
}

impl ReconciliationPlan {
    /// Matches an operator should audit: every forced match, plus any
    /// match scoring below `review_threshold`.
    pub fn needs_review<'a>(
        &'a self,
        policy: &'a MatchPolicy,
    ) -> impl Iterator<Item = &'a MatchResult> + 'a {
        self.matched
            .iter()
            .filter(|m| m.phase == MatchPhase::Forced || m.confidence < policy.review_threshold)
    }

    pub fn count_phase(&self, phase: MatchPhase) -> usize {
        self.matched.iter().filter(|m| m.phase == phase).count()
    }
}

/// Reconcile the members of `group_key` in `existing` against those in
/// `incoming`. Members of other groups are ignored.
pub fn reconcile(
    existing: &[StoredEntity],
    incoming: &[IncomingRecord],
    group_key: &str,
    policy: &MatchPolicy,
) -> ReconciliationPlan {
    let ex_side = Side::new(
        existing
            .iter()
            .enumerate()
            .filter(|(_, e)| e.group_key == group_key)
            .map(|(i, e)| (i, normalize(&e.content.primary))),
    );
    let in_side = Side::new(
        incoming
            .iter()
            .enumerate()
            .filter(|(_, r)| r.group_key == group_key)
            .map(|(i, r)| (i, normalize(&r.content.primary))),
    );

    let mut pools = Pools {
        incoming: (0..in_side.len()).collect(),
        existing: (0..ex_side.len()).collect(),
        matched: Vec::new(),
    };

    exact_phase(&in_side, &ex_side, &mut pools);
    let exact = pools.matched.len();

    let scores = ScoreGrid::compute(&in_side, &ex_side, &pools);
    scored_phase(&scores, policy, &mut pools);
    let scored = pools.matched.len() - exact;

    if policy.force_leftovers {
        forced_phase(&scores, &mut pools);
    }
    let forced = pools.matched.len() - exact - scored;

    tracing::debug!(
        group = group_key,
        existing = ex_side.len(),
        incoming = in_side.len(),
        exact,
        scored,
        forced,
        new = pools.incoming.len(),
        stale = pools.existing.len(),
        "reconciled group"
    );

    ReconciliationPlan {
        group_key: group_key.to_string(),
        matched: pools
            .matched
            .into_iter()
            .map(|(i, e, confidence, phase)| MatchResult {
                incoming_index: in_side.global[i],
                existing_index: ex_side.global[e],
                confidence,
                phase,
            })
            .collect(),
        new_incoming: pools.incoming.iter().map(|&i| in_side.global[i]).collect(),
        stale_existing: pools.existing.iter().map(|&e| ex_side.global[e]).collect(),
    }
}

/// One side of the problem, addressed by local position.
struct Side {
    global: Vec<usize>,
    texts: Vec<String>,
}

impl Side {
    fn new(members: impl Iterator<Item = (usize, String)>) -> Self {
        let (global, texts) = members.unzip();
        Self { global, texts }
    }

    fn len(&self) -> usize {
        self.global.len()
    }
}

/// Unmatched local positions on both sides, plus accepted matches.
struct Pools {
    incoming: BTreeSet<usize>,
    existing: BTreeSet<usize>,
    matched: Vec<(usize, usize, f64, MatchPhase)>,
}

impl Pools {
    fn accept(&mut self, inc: usize, ex: usize, confidence: f64, phase: MatchPhase) {
        self.incoming.remove(&inc);
        self.existing.remove(&ex);
        self.matched.push((inc, ex, confidence, phase));
    }

    fn is_free(&self, inc: usize, ex: usize) -> bool {
        self.incoming.contains(&inc) && self.existing.contains(&ex)
    }
}

fn exact_phase(in_side: &Side, ex_side: &Side, pools: &mut Pools) {
    let mut by_text: HashMap<&str, VecDeque<usize>> = HashMap::new();
    for (pos, text) in ex_side.texts.iter().enumerate() {
        by_text.entry(text.as_str()).or_default().push_back(pos);
    }
    for (inc, text) in in_side.texts.iter().enumerate() {
        if let Some(ex) = by_text.get_mut(text.as_str()).and_then(VecDeque::pop_front) {
            pools.accept(inc, ex, EXACT_SCORE, MatchPhase::Exact);
        }
    }
}

/// Scores for every pair left after phase 1; phase 3 only ever looks at a
/// subset of these.
struct ScoreGrid {
    width: usize,
    cells: Vec<f64>,
    pairs: Vec<(usize, usize)>,
}

impl ScoreGrid {
    fn compute(in_side: &Side, ex_side: &Side, pools: &Pools) -> Self {
        let width = ex_side.len();
        let mut cells = vec![0.0; in_side.len() * width];
        let mut pairs = Vec::with_capacity(pools.incoming.len() * pools.existing.len());
        for &inc in &pools.incoming {
            for &ex in &pools.existing {
                cells[inc * width + ex] = score(&in_side.texts[inc], &ex_side.texts[ex]);
                pairs.push((inc, ex));
            }
        }
        Self {
            width,
            cells,
            pairs,
        }
    }

    fn get(&self, inc: usize, ex: usize) -> f64 {
        self.cells[inc * self.width + ex]
    }
}

fn scored_phase(scores: &ScoreGrid, policy: &MatchPolicy, pools: &mut Pools) {
    let mut ranked: Vec<(f64, usize, usize)> = scores
        .pairs
        .iter()
        .map(|&(inc, ex)| (scores.get(inc, ex), inc, ex))
        .collect();
    ranked.sort_by(|a, b| {
        b.0.total_cmp(&a.0)
            .then_with(|| a.1.cmp(&b.1))
            .then_with(|| a.2.cmp(&b.2))
    });

    for (s, inc, ex) in ranked {
        if s < policy.accept_threshold {
            break;
        }
        if pools.is_free(inc, ex) {
            pools.accept(inc, ex, s, MatchPhase::Scored);
        }
    }
}

fn forced_phase(scores: &ScoreGrid, pools: &mut Pools) {
    while !pools.incoming.is_empty() && !pools.existing.is_empty() {
        let mut best: Option<(f64, usize, usize)> = None;
        for &inc in &pools.incoming {
            for &ex in &pools.existing {
                let s = scores.get(inc, ex);
                if best.map_or(true, |(b, _, _)| s > b) {
                    best = Some((s, inc, ex));
                }
            }
        }
        let Some((s, inc, ex)) = best else { break };
        pools.accept(inc, ex, s, MatchPhase::Forced);
    }
}
