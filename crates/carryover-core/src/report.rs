//! Operator-facing summaries of reconciliation runs.
//!
//! A [`GroupSummary`] carries per-group counts plus every pairing an
//! operator should audit before it becomes permanent. [`plan_digest`]
//! fingerprints a set of plans so a reviewed dry run can be tied to the
//! run that applies it.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::apply::content_changed;
use crate::models::{IncomingRecord, MalformedRecord, StoredEntity};
use crate::normalize::normalize;
use crate::reconcile::{MatchPhase, MatchPolicy, ReconciliationPlan};

/// A pairing flagged for manual audit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewItem {
    pub existing_id: String,
    pub existing_text: String,
    pub incoming_index: usize,
    pub incoming_text: String,
    pub score: f64,
    pub phase: MatchPhase,
}

/// Per-group counts and audit listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GroupSummary {
    pub group_key: String,
    pub existing: usize,
    pub incoming: usize,
    pub exact: usize,
    pub scored: usize,
    pub forced: usize,
    pub updated: usize,
    pub inserted: usize,
    pub deleted: usize,
    pub review: Vec<ReviewItem>,
    pub malformed: Vec<MalformedRecord>,
}

impl GroupSummary {
    pub fn writes(&self) -> usize {
        self.updated + self.inserted + self.deleted
    }
}

/// Summarize a plan before it is applied. `updated` counts the matches
/// whose content would actually change.
pub fn summarize(
    plan: &ReconciliationPlan,
    existing: &[StoredEntity],
    incoming: &[IncomingRecord],
    policy: &MatchPolicy,
) -> GroupSummary {
    let in_group_existing = existing
        .iter()
        .filter(|e| e.group_key == plan.group_key)
        .count();
    let in_group_incoming = incoming
        .iter()
        .filter(|r| r.group_key == plan.group_key)
        .count();

    let updated = plan
        .matched
        .iter()
        .filter(|m| content_changed(&existing[m.existing_index], &incoming[m.incoming_index]))
        .count();

    let review = plan
        .needs_review(policy)
        .map(|m| ReviewItem {
            existing_id: existing[m.existing_index].id.clone(),
            existing_text: existing[m.existing_index].content.primary.clone(),
            incoming_index: m.incoming_index,
            incoming_text: incoming[m.incoming_index].content.primary.clone(),
            score: m.confidence,
            phase: m.phase,
        })
        .collect();

    GroupSummary {
        group_key: plan.group_key.clone(),
        existing: in_group_existing,
        incoming: in_group_incoming,
        exact: plan.count_phase(MatchPhase::Exact),
        scored: plan.count_phase(MatchPhase::Scored),
        forced: plan.count_phase(MatchPhase::Forced),
        updated,
        inserted: plan.new_incoming.len(),
        deleted: plan.stale_existing.len(),
        review,
        malformed: Vec::new(),
    }
}

/// One group's plan together with the snapshot it was computed from.
pub struct PlannedGroup<'a> {
    pub plan: &'a ReconciliationPlan,
    pub existing: &'a [StoredEntity],
    pub incoming: &'a [IncomingRecord],
}

/// SHA-256 (hex) over the decisions of every plan: which stored id each
/// incoming text maps to, which texts are new, and which ids are deleted.
///
/// Two runs over the same snapshot and source produce the same digest;
/// any change to stored ids, texts, or matching outcome changes it.
pub fn plan_digest(groups: &[PlannedGroup<'_>]) -> String {
    let mut hasher = Sha256::new();
    for g in groups {
        hasher.update(b"group\0");
        hasher.update(g.plan.group_key.as_bytes());
        for m in &g.plan.matched {
            let line = format!(
                "\nmatch\0{}\0{}\0{:?}\0{:.6}",
                g.existing[m.existing_index].id,
                normalize(&g.incoming[m.incoming_index].content.primary),
                m.phase,
                m.confidence
            );
            hasher.update(line.as_bytes());
            if content_changed(&g.existing[m.existing_index], &g.incoming[m.incoming_index]) {
                hasher.update(b"\0changed");
            }
        }
        for &i in &g.plan.new_incoming {
            hasher.update(b"\nnew\0");
            hasher.update(normalize(&g.incoming[i].content.primary).as_bytes());
        }
        for &e in &g.plan.stale_existing {
            hasher.update(b"\nstale\0");
            hasher.update(g.existing[e].id.as_bytes());
        }
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Content;
    use crate::reconcile::reconcile;
    use serde_json::Map;

    fn entity(id: &str, primary: &str) -> StoredEntity {
        StoredEntity {
            id: id.into(),
            group_key: "g".into(),
            content: Content::new(primary, "a"),
            metadata: Map::new(),
            updated_at: 0,
        }
    }

    fn record(primary: &str, secondary: &str) -> IncomingRecord {
        IncomingRecord {
            group_key: "g".into(),
            content: Content::new(primary, secondary),
            sequence_hint: 0,
            extra: Map::new(),
        }
    }

    #[test]
    fn test_summary_counts_and_review_listing() {
        let existing = vec![
            entity("A", "What is CO2?"),
            entity("B", "photosynthesis in plants"),
            entity("C", "Obsolete"),
        ];
        let incoming = vec![record("What is CO2?", "changed"), record("zzz qqq", "a")];
        let policy = MatchPolicy::default();
        let plan = reconcile(&existing, &incoming, "g", &policy);
        let s = summarize(&plan, &existing, &incoming, &policy);
        assert_eq!((s.existing, s.incoming), (3, 2));
        assert_eq!((s.exact, s.scored, s.forced), (1, 0, 1));
        assert_eq!((s.updated, s.inserted, s.deleted), (2, 0, 1));
        assert_eq!(s.review.len(), 1);
        assert_eq!(s.review[0].incoming_text, "zzz qqq");
        assert_eq!(s.review[0].phase, MatchPhase::Forced);
    }

    #[test]
    fn test_digest_is_stable_and_sensitive() {
        let existing = vec![entity("A", "What is CO2?")];
        let incoming = vec![record("What is CO2?", "a")];
        let policy = MatchPolicy::default();
        let plan = reconcile(&existing, &incoming, "g", &policy);
        let group = PlannedGroup {
            plan: &plan,
            existing: &existing,
            incoming: &incoming,
        };
        let d1 = plan_digest(&[group]);
        let group = PlannedGroup {
            plan: &plan,
            existing: &existing,
            incoming: &incoming,
        };
        assert_eq!(d1, plan_digest(&[group]));
        assert_eq!(d1.len(), 64);

        let changed = vec![record("What is CO2?", "different answer")];
        let group = PlannedGroup {
            plan: &plan,
            existing: &existing,
            incoming: &changed,
        };
        assert_ne!(d1, plan_digest(&[group]));
    }
}
