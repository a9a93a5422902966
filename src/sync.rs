//! Plan and sync orchestration.
//!
//! Coordinates the full flow: content source → per-group listing →
//! reconciliation → (backup) → per-group application → post-update counts.
//! `plan` stops after reconciliation and prints what `sync` would do.

use anyhow::{bail, Result};
use chrono::{DateTime, Local, Utc};
use serde::Serialize;

use carryover_core::apply::{apply, check_template, ApplyContext, ApplyOutcome};
use carryover_core::error::SyncError;
use carryover_core::models::{MalformedRecord, StoredEntity};
use carryover_core::reconcile::{reconcile, ReconciliationPlan};
use carryover_core::report::{plan_digest, summarize, GroupSummary, PlannedGroup};
use carryover_core::store::EntityStore;

use crate::backup;
use crate::config::Config;
use crate::db;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::source::{load_source, GroupInput};
use crate::sqlite_store::SqliteStore;

/// Options for `carryover sync`.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Skip the pre-write database backup.
    pub no_backup: bool,
    /// Refuse to write unless the computed plan digest equals this.
    pub expect_digest: Option<String>,
}

/// One group, reconciled and ready to apply.
struct GroupRun {
    input: GroupInput,
    existing: Vec<StoredEntity>,
    plan: ReconciliationPlan,
    summary: GroupSummary,
}

/// A stored group with no records in the source. It is left as it is.
#[derive(Debug, Serialize)]
struct UntouchedGroup {
    group_key: String,
    stored: i64,
}

struct Prepared {
    groups: Vec<GroupRun>,
    /// Groups that cannot be applied; the rest of the run proceeds.
    failed: Vec<SyncError>,
    /// Flat-shape cards that name no group.
    unassigned: Vec<MalformedRecord>,
    untouched: Vec<UntouchedGroup>,
    digest: String,
}

impl Prepared {
    fn writes(&self) -> usize {
        self.groups.iter().map(|g| g.summary.writes()).sum()
    }
}

#[derive(Serialize)]
struct PlanReport<'a> {
    digest: &'a str,
    groups: Vec<&'a GroupSummary>,
    failed: Vec<String>,
    unassigned: &'a [MalformedRecord],
    untouched: &'a [UntouchedGroup],
}

async fn prepare(
    config: &Config,
    store: &SqliteStore,
    now: DateTime<Utc>,
    progress: &dyn ProgressReporter,
) -> Result<Prepared> {
    progress.report(ProgressEvent::Loading {
        source: config.source.path.display().to_string(),
    });
    let batch = load_source(config)?;

    let policy = config.matching.policy();
    let collections = config.collections.all();
    let template = config.template.template();
    let ctx = ApplyContext {
        collections: &collections,
        template: &template,
        require_template: config.template.require_existing,
        now,
    };
    let primary = config.collections.primary.as_str();

    let stored = store.count_by_group(primary).await?;
    let untouched: Vec<UntouchedGroup> = stored
        .into_iter()
        .filter_map(|(key, count)| match key {
            Some(key) if !batch.groups.contains_key(&key) => Some(UntouchedGroup {
                group_key: key,
                stored: count,
            }),
            _ => None,
        })
        .collect();
    for u in &untouched {
        tracing::warn!(group = %u.group_key, stored = u.stored, "stored group absent from source");
    }

    let total = batch.groups.len() as u64;
    let mut groups = Vec::with_capacity(batch.groups.len());
    let mut failed = batch.unmapped;
    let unassigned = batch.unassigned;

    for (n, (key, input)) in batch.groups.into_iter().enumerate() {
        progress.report(ProgressEvent::Reconciling {
            group: key.clone(),
            n: n as u64 + 1,
            total,
        });

        let existing = store
            .list_by_group(primary, &key)
            .await
            .map_err(|source| SyncError::StoreRead {
                collection: primary.to_string(),
                group: key.clone(),
                source,
            })?;

        let plan = reconcile(&existing, &input.records, &key, &policy);
        if let Err(e) = check_template(&plan, &existing, &ctx) {
            tracing::warn!(group = %key, error = %e, "skipping group");
            failed.push(e);
            continue;
        }

        let mut summary = summarize(&plan, &existing, &input.records, &policy);
        summary.malformed = input.malformed.clone();
        for item in &summary.review {
            tracing::warn!(
                group = %key,
                id = %item.existing_id,
                score = item.score,
                phase = ?item.phase,
                "pairing needs review"
            );
        }

        groups.push(GroupRun {
            input,
            existing,
            plan,
            summary,
        });
    }

    let planned: Vec<PlannedGroup<'_>> = groups
        .iter()
        .map(|g| PlannedGroup {
            plan: &g.plan,
            existing: &g.existing,
            incoming: &g.input.records,
        })
        .collect();
    let digest = plan_digest(&planned);

    Ok(Prepared {
        groups,
        failed,
        unassigned,
        untouched,
        digest,
    })
}

fn failure_error(failed: &[SyncError]) -> anyhow::Error {
    let list = failed
        .iter()
        .map(|e| format!("  {}", e))
        .collect::<Vec<_>>()
        .join("\n");
    anyhow::anyhow!("{} group(s) were not applied:\n{}", failed.len(), list)
}

/// Dry run: reconcile every group and print the plan.
pub async fn run_plan(config: &Config, json: bool, progress: &dyn ProgressReporter) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone(), config.layout.clone());
    let prepared = prepare(config, &store, Utc::now(), progress).await?;
    pool.close().await;

    if json {
        let report = PlanReport {
            digest: &prepared.digest,
            groups: prepared.groups.iter().map(|g| &g.summary).collect(),
            failed: prepared.failed.iter().map(|e| e.to_string()).collect(),
            unassigned: &prepared.unassigned,
            untouched: &prepared.untouched,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_plan(config, &prepared);
    }

    if !prepared.failed.is_empty() {
        return Err(failure_error(&prepared.failed));
    }
    Ok(())
}

fn print_plan(config: &Config, prepared: &Prepared) {
    println!("plan {} (dry-run)", config.source.path.display());
    for g in &prepared.groups {
        let s = &g.summary;
        println!(
            "  {}: existing={} incoming={} exact={} scored={} forced={} update={} insert={} delete={}",
            s.group_key,
            s.existing,
            s.incoming,
            s.exact,
            s.scored,
            s.forced,
            s.updated,
            s.inserted,
            s.deleted
        );
        print_details(s);
    }
    print_leftovers(prepared);
    for e in &prepared.failed {
        println!("  failed: {}", e);
    }
    let (updated, inserted, deleted) = prepared.groups.iter().fold((0, 0, 0), |acc, g| {
        (
            acc.0 + g.summary.updated,
            acc.1 + g.summary.inserted,
            acc.2 + g.summary.deleted,
        )
    });
    println!(
        "  total: update={} insert={} delete={}",
        updated, inserted, deleted
    );
    println!("  digest: {}", prepared.digest);
}

/// Pairings to review and malformed records, indented under a group line.
fn print_details(s: &GroupSummary) {
    for item in &s.review {
        println!(
            "    review [{:?} {:.3}] {:?} <- {:?} ({})",
            item.phase, item.score, item.incoming_text, item.existing_text, item.existing_id
        );
    }
    for m in &s.malformed {
        println!("    malformed {}#{}: {}", m.label, m.position, m.reason);
    }
}

/// Source cards that reached no group, and stored groups the run leaves alone.
fn print_leftovers(prepared: &Prepared) {
    for m in &prepared.unassigned {
        println!("  malformed {}#{}: {}", m.label, m.position, m.reason);
    }
    for u in &prepared.untouched {
        println!(
            "  untouched: {} ({} stored, absent from source)",
            u.group_key, u.stored
        );
    }
}

/// Reconcile and apply every group, then print post-update counts.
pub async fn run_sync(
    config: &Config,
    opts: &SyncOptions,
    progress: &dyn ProgressReporter,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone(), config.layout.clone());
    let now = Utc::now();
    let mut prepared = prepare(config, &store, now, progress).await?;

    if let Some(expected) = &opts.expect_digest {
        if !expected.eq_ignore_ascii_case(&prepared.digest) {
            bail!(
                "plan digest mismatch: expected {}, computed {}; re-run `carryover plan` and review",
                expected,
                prepared.digest
            );
        }
    }

    if config.backup.enabled && !opts.no_backup && prepared.writes() > 0 {
        let path = backup::backup_database(&pool, &config.db.path, now.with_timezone(&Local)).await?;
        println!("backup: {}", path.display());
    }

    let collections = config.collections.all();
    let template = config.template.template();
    let ctx = ApplyContext {
        collections: &collections,
        template: &template,
        require_template: config.template.require_existing,
        now,
    };

    let total = prepared.groups.len() as u64;
    let mut failed = std::mem::take(&mut prepared.failed);
    let mut totals = ApplyOutcome::default();

    println!("sync {}", config.source.path.display());
    for (n, g) in prepared.groups.iter().enumerate() {
        progress.report(ProgressEvent::Applying {
            group: g.plan.group_key.clone(),
            n: n as u64 + 1,
            total,
        });

        let outcome = match apply(&g.plan, &g.existing, &g.input.records, &store, &ctx).await {
            Ok(outcome) => outcome,
            Err(e @ SyncError::GroupNotFound { .. }) => {
                tracing::warn!(group = %g.plan.group_key, error = %e, "skipping group");
                failed.push(e);
                continue;
            }
            Err(e) => {
                pool.close().await;
                return Err(e.into());
            }
        };

        println!(
            "  {}: existing={} incoming={} updated={} inserted={} deleted={} review={} malformed={}",
            g.plan.group_key,
            g.summary.existing,
            g.summary.incoming,
            outcome.updated,
            outcome.inserted,
            outcome.deleted,
            g.summary.review.len(),
            g.summary.malformed.len()
        );
        print_details(&g.summary);
        totals.updated += outcome.updated;
        totals.inserted += outcome.inserted;
        totals.deleted += outcome.deleted;
    }
    print_leftovers(&prepared);
    for e in &failed {
        println!("  failed: {}", e);
    }
    println!(
        "  mutations: updated={} inserted={} deleted={}",
        totals.updated, totals.inserted, totals.deleted
    );

    println!("post-update counts:");
    let counts = store.count_by_group(&config.collections.primary).await?;
    let mut synced_total = 0;
    for g in &prepared.groups {
        let count = counts
            .iter()
            .find(|(key, _)| key.as_deref() == Some(g.plan.group_key.as_str()))
            .map(|(_, c)| *c)
            .unwrap_or(0);
        synced_total += count;
        println!("  {}: {}", g.plan.group_key, count);
    }
    println!("  total: {}", synced_total);

    pool.close().await;

    if !failed.is_empty() {
        return Err(failure_error(&failed));
    }
    println!("ok");
    Ok(())
}
