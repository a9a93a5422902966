//! Sync applier: turn a [`ReconciliationPlan`] into store mutations.
//!
//! | Plan entry | Mutation |
//! |------------|----------|
//! | match, content differs after normalization | update content in place, keep id and metadata, refresh `meta.updatedAt` |
//! | match, content identical after normalization | none |
//! | new incoming | insert with a freshly minted id and template metadata |
//! | stale existing | delete |
//!
//! Each mutation is replicated to every configured collection (primary
//! first, then mirrors). One group's mutations go to the store as a single
//! batch; a failed batch is left for the operator to retry by re-running
//! the whole pipeline, which is always safe because unchanged matches never
//! write.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::models::{IncomingRecord, StoredEntity};
use crate::normalize::normalize;
use crate::reconcile::ReconciliationPlan;
use crate::store::{EntityStore, Mutation};
use crate::template::{touch, MetadataTemplate};

/// Everything the applier needs besides the plan and its inputs.
#[derive(Debug, Clone)]
pub struct ApplyContext<'a> {
    /// Target collections; the first one is listed and checked for id
    /// collisions, the rest mirror it.
    pub collections: &'a [String],
    pub template: &'a MetadataTemplate,
    /// Fail with [`SyncError::GroupNotFound`] instead of using built-in
    /// defaults when a group has new records but no entity to copy from.
    pub require_template: bool,
    /// Timestamp stamped on every write of this run.
    pub now: DateTime<Utc>,
}

impl ApplyContext<'_> {
    fn primary(&self) -> &str {
        self.collections.first().map(String::as_str).unwrap_or_default()
    }
}

/// Counts of entities written for one group. Mirrors are not counted twice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub updated: usize,
    pub inserted: usize,
    pub deleted: usize,
    pub inserted_ids: Vec<String>,
}

impl ApplyOutcome {
    pub fn writes(&self) -> usize {
        self.updated + self.inserted + self.deleted
    }
}

/// Whether applying `record` to `entity` would change its normalized content.
pub fn content_changed(entity: &StoredEntity, record: &IncomingRecord) -> bool {
    normalize(&entity.content.primary) != normalize(&record.content.primary)
        || normalize(&entity.content.secondary) != normalize(&record.content.secondary)
}

/// The entity new records of the plan's group copy structure from.
pub fn template_source<'a>(
    plan: &ReconciliationPlan,
    existing: &'a [StoredEntity],
) -> Option<&'a StoredEntity> {
    existing.iter().find(|e| e.group_key == plan.group_key)
}

/// Fail early if the plan inserts into a group that has nothing to copy
/// structure from and the context forbids falling back to defaults.
pub fn check_template(
    plan: &ReconciliationPlan,
    existing: &[StoredEntity],
    ctx: &ApplyContext<'_>,
) -> Result<()> {
    if ctx.require_template
        && !plan.new_incoming.is_empty()
        && template_source(plan, existing).is_none()
    {
        return Err(SyncError::GroupNotFound {
            group: plan.group_key.clone(),
            reason: format!(
                "{} new record(s) but no existing entity to derive metadata from",
                plan.new_incoming.len()
            ),
        });
    }
    Ok(())
}

/// Build the ordered mutation list for one group.
///
/// Updates and inserts come in incoming order, deletes after them in
/// existing order. `new_ids` supplies one id per `plan.new_incoming` entry,
/// in ascending index order.
pub fn build_mutations(
    plan: &ReconciliationPlan,
    existing: &[StoredEntity],
    incoming: &[IncomingRecord],
    ctx: &ApplyContext<'_>,
    new_ids: &[String],
) -> Result<Vec<Mutation>> {
    check_template(plan, existing, ctx)?;
    let sibling = template_source(plan, existing);
    let now_ms = ctx.now.timestamp_millis();

    let matched: std::collections::HashMap<usize, usize> = plan
        .matched
        .iter()
        .map(|m| (m.incoming_index, m.existing_index))
        .collect();
    let order: BTreeSet<usize> = matched
        .keys()
        .copied()
        .chain(plan.new_incoming.iter().copied())
        .collect();
    let mut ids = new_ids.iter();

    let mut writes: Vec<(bool, StoredEntity)> = Vec::new();
    for inc in order {
        let record = &incoming[inc];
        if let Some(&ex) = matched.get(&inc) {
            let current = &existing[ex];
            if !content_changed(current, record) {
                continue;
            }
            let mut entity = current.clone();
            entity.group_key = plan.group_key.clone();
            entity.content = record.content.clone();
            entity.updated_at = now_ms;
            touch(&mut entity.metadata, ctx.now);
            writes.push((false, entity));
        } else {
            let id = ids.next().cloned().unwrap_or_else(|| Uuid::new_v4().to_string());
            writes.push((
                true,
                StoredEntity {
                    id,
                    group_key: plan.group_key.clone(),
                    content: record.content.clone(),
                    metadata: ctx.template.instantiate(sibling, &record.extra, ctx.now),
                    updated_at: now_ms,
                },
            ));
        }
    }

    let mut mutations = Vec::with_capacity((writes.len() + plan.stale_existing.len()) * ctx.collections.len());
    for (is_insert, entity) in writes {
        for collection in ctx.collections {
            let collection = collection.clone();
            let entity = entity.clone();
            mutations.push(if is_insert {
                Mutation::Insert { collection, entity }
            } else {
                Mutation::Update { collection, entity }
            });
        }
    }
    for &ex in &plan.stale_existing {
        for collection in ctx.collections {
            mutations.push(Mutation::Delete {
                collection: collection.clone(),
                id: existing[ex].id.clone(),
            });
        }
    }
    Ok(mutations)
}

/// Apply `plan` to `store`.
///
/// New ids are random v4 UUIDs, re-drawn on the (practically impossible)
/// collision with an id already present in the group or the primary
/// collection.
pub async fn apply<S: EntityStore + ?Sized>(
    plan: &ReconciliationPlan,
    existing: &[StoredEntity],
    incoming: &[IncomingRecord],
    store: &S,
    ctx: &ApplyContext<'_>,
) -> Result<ApplyOutcome> {
    check_template(plan, existing, ctx)?;

    let mut taken: HashSet<String> = existing.iter().map(|e| e.id.clone()).collect();
    let mut new_ids = Vec::with_capacity(plan.new_incoming.len());
    for _ in &plan.new_incoming {
        let id = mint_id(store, ctx.primary(), &plan.group_key, &taken).await?;
        taken.insert(id.clone());
        new_ids.push(id);
    }

    let mutations = build_mutations(plan, existing, incoming, ctx, &new_ids)?;
    for m in &mutations {
        tracing::debug!(group = %plan.group_key, op = %m.op(), collection = m.collection(), id = m.id(), "write");
    }
    store.apply_batch(&plan.group_key, &mutations).await?;

    let primary = ctx.primary();
    let mut outcome = ApplyOutcome::default();
    for m in mutations.iter().filter(|m| m.collection() == primary) {
        match m {
            Mutation::Update { .. } => outcome.updated += 1,
            Mutation::Insert { entity, .. } => {
                outcome.inserted += 1;
                outcome.inserted_ids.push(entity.id.clone());
            }
            Mutation::Delete { .. } => outcome.deleted += 1,
        }
    }
    tracing::info!(
        group = %plan.group_key,
        updated = outcome.updated,
        inserted = outcome.inserted,
        deleted = outcome.deleted,
        "applied group"
    );
    Ok(outcome)
}

async fn mint_id<S: EntityStore + ?Sized>(
    store: &S,
    collection: &str,
    group_key: &str,
    taken: &HashSet<String>,
) -> Result<String> {
    loop {
        let id = Uuid::new_v4().to_string();
        if taken.contains(&id) {
            continue;
        }
        let found = store
            .get(collection, &id)
            .await
            .map_err(|source| SyncError::StoreRead {
                collection: collection.to_string(),
                group: group_key.to_string(),
                source,
            })?;
        if found.is_none() {
            return Ok(id);
        }
    }
}
