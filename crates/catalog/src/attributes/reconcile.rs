//! Reconciliation of a version's attribute set
//!
//! Every operation here runs inside the unit of work handed in by the
//! caller. Nothing is committed or rolled back in this module; a failed
//! step returns an error and the owner of the transaction discards the
//! whole operation.

use chrono::Utc;
use sea_orm::sea_query::{Alias, Expr, Order, Query, SelectStatement};
use sea_orm::{ConnectionTrait, DatabaseTransaction, DbBackend, EntityTrait, QuerySelect};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info};
use uuid::Uuid;

use super::store::{AttributeStore, BATCH_SIZE, ID};
use super::{AttributeKind, AttributeMatcher, AttributePair, AttributeRecord};
use crate::entity::version;
use crate::error::{CatalogError, Result};

const VERSION_ID: &str = "version_id";
const CREATED_BY: &str = "created_by";
const CREATED_AT: &str = "created_at";

/// Result of one reconciliation step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    /// Attributes associated with the version once the step finished
    pub attributes: Vec<AttributeRecord>,
    /// Association rows added
    pub inserted: usize,
    /// Association rows removed from this version
    pub dissociated: usize,
    /// Orphaned attribute records deleted store-wide
    pub pruned: u64,
}

/// Keeps version associations for one attribute kind in step with the
/// sets callers provide.
#[derive(Debug, Clone, Copy)]
pub struct Reconciler {
    store: AttributeStore,
}

impl Reconciler {
    pub fn new(kind: AttributeKind) -> Self {
        Self {
            store: AttributeStore::new(kind),
        }
    }

    pub fn tags() -> Self {
        Self::new(AttributeKind::Tag)
    }

    pub fn metadata() -> Self {
        Self::new(AttributeKind::Metadata)
    }

    pub fn kind(&self) -> AttributeKind {
        self.store.kind()
    }

    pub fn store(&self) -> &AttributeStore {
        &self.store
    }

    /// Attributes currently associated with a version
    pub async fn current<C>(&self, db: &C, version_id: Uuid) -> Result<Vec<AttributeRecord>>
    where
        C: ConnectionTrait,
    {
        let tables = self.store.tables();
        let attribute = Alias::new(tables.attribute);
        let association = Alias::new(tables.association);

        let stmt = self
            .store
            .select_records()
            .inner_join(
                association.clone(),
                Expr::col((association.clone(), Alias::new(tables.foreign_key)))
                    .equals((attribute, Alias::new(ID))),
            )
            .and_where(Expr::col((association, Alias::new(VERSION_ID))).eq(version_id))
            .to_owned();
        self.store.fetch(db, &stmt).await
    }

    /// Converge the version's associations to exactly `incoming`.
    ///
    /// Associations whose (key, value) is absent from `incoming` are
    /// removed, missing pairs are resolved or created and joined with
    /// `actor` as creator, then orphans are pruned. Resolving before
    /// pruning keeps records this call reuses out of the prune.
    pub async fn replace(
        &self,
        txn: &DatabaseTransaction,
        version_id: Uuid,
        incoming: &[AttributePair],
        actor: Uuid,
    ) -> Result<Reconciliation> {
        let kind = self.kind();
        let incoming = kind.prepare(incoming)?;
        self.anchor_version(txn, version_id).await?;

        let current = self.current(txn, version_id).await?;
        let wanted: HashSet<(&str, &str)> = incoming
            .iter()
            .map(|pair| (pair.key.as_str(), pair.value.as_str()))
            .collect();
        let stale: Vec<i32> = current
            .iter()
            .filter(|record| !wanted.contains(&(record.key.as_str(), record.value.as_str())))
            .map(|record| record.id)
            .collect();

        let dissociated = self.delete_joins(txn, version_id, &stale).await?;

        let records = self.store.create_attributes(txn, &incoming).await?;
        let inserted = self
            .insert_missing_joins(txn, version_id, &current, &records, actor)
            .await?;
        let pruned = self.prune_orphaned(txn).await?;

        let attributes = self.current(txn, version_id).await?;
        info!(
            "Replaced {} set of version {}: +{} -{} (pruned {})",
            kind.label(),
            version_id,
            inserted,
            dissociated,
            pruned
        );

        Ok(Reconciliation {
            attributes,
            inserted,
            dissociated,
            pruned,
        })
    }

    /// Add `incoming` to the version without removing other associations.
    ///
    /// For metadata an existing association under the same key with a
    /// different value is replaced, so a key never carries two values.
    pub async fn associate(
        &self,
        txn: &DatabaseTransaction,
        version_id: Uuid,
        incoming: &[AttributePair],
        actor: Uuid,
    ) -> Result<Reconciliation> {
        let kind = self.kind();
        let incoming = kind.prepare(incoming)?;
        self.anchor_version(txn, version_id).await?;

        let current = self.current(txn, version_id).await?;

        let mut dissociated = 0;
        if kind.single_value_per_key() {
            let overwritten: Vec<i32> = current
                .iter()
                .filter(|record| {
                    incoming
                        .iter()
                        .any(|pair| pair.key == record.key && pair.value != record.value)
                })
                .map(|record| record.id)
                .collect();
            dissociated = self.delete_joins(txn, version_id, &overwritten).await?;
        }

        let records = self.store.create_attributes(txn, &incoming).await?;
        let inserted = self
            .insert_missing_joins(txn, version_id, &current, &records, actor)
            .await?;
        let pruned = if dissociated > 0 {
            self.prune_orphaned(txn).await?
        } else {
            0
        };

        let attributes = self.current(txn, version_id).await?;
        info!(
            "Associated {} {} pair(s) with version {}: +{} -{}",
            incoming.len(),
            kind.label(),
            version_id,
            inserted,
            dissociated
        );

        Ok(Reconciliation {
            attributes,
            inserted,
            dissociated,
            pruned,
        })
    }

    /// Remove associations selected by `matchers`, then prune orphans.
    ///
    /// A matcher without a value removes every value under its key.
    pub async fn dissociate(
        &self,
        txn: &DatabaseTransaction,
        version_id: Uuid,
        matchers: &[AttributeMatcher],
    ) -> Result<Reconciliation> {
        let kind = self.kind();
        let matchers = kind.prepare_matchers(matchers)?;
        self.anchor_version(txn, version_id).await?;

        let current = self.current(txn, version_id).await?;
        let doomed: Vec<i32> = current
            .iter()
            .filter(|record| matchers.iter().any(|m| m.matches(record)))
            .map(|record| record.id)
            .collect();

        let dissociated = self.delete_joins(txn, version_id, &doomed).await?;
        let pruned = self.prune_orphaned(txn).await?;
        let attributes = self.current(txn, version_id).await?;

        info!(
            "Dissociated {} {} record(s) from version {} (pruned {})",
            dissociated,
            kind.label(),
            version_id,
            pruned
        );

        Ok(Reconciliation {
            attributes,
            inserted: 0,
            dissociated,
            pruned,
        })
    }

    /// Delete every attribute record no version references.
    ///
    /// Unreferenced records are first selected and locked for update,
    /// which waits out any unit of work holding them for a join. They are
    /// then deleted by a second statement that checks the association
    /// table again, so a record joined by a concurrent committer survives.
    pub async fn prune_orphaned(&self, txn: &DatabaseTransaction) -> Result<u64> {
        let tables = self.store.tables();
        let backend = txn.get_database_backend();

        let mut candidates = Query::select()
            .column(Alias::new(ID))
            .from(Alias::new(tables.attribute))
            .and_where(Expr::col(Alias::new(ID)).not_in_subquery(self.referenced_ids()))
            .order_by(Alias::new(ID), Order::Asc)
            .to_owned();
        if backend != DbBackend::Sqlite {
            candidates.lock_exclusive();
        }

        let ids = txn
            .query_all(backend.build(&candidates))
            .await?
            .iter()
            .map(|row| row.try_get::<i32>("", ID))
            .collect::<std::result::Result<Vec<i32>, _>>()?;

        let mut pruned = 0;
        for chunk in ids.chunks(BATCH_SIZE) {
            let stmt = Query::delete()
                .from_table(Alias::new(tables.attribute))
                .and_where(Expr::col(Alias::new(ID)).is_in(chunk.iter().copied()))
                .and_where(Expr::col(Alias::new(ID)).not_in_subquery(self.referenced_ids()))
                .to_owned();
            pruned += txn.execute(backend.build(&stmt)).await?.rows_affected();
        }

        if pruned > 0 {
            debug!("Pruned {} orphaned {} record(s)", pruned, self.kind().label());
        }
        Ok(pruned)
    }

    fn referenced_ids(&self) -> SelectStatement {
        let tables = self.store.tables();
        Query::select()
            .column(Alias::new(tables.foreign_key))
            .from(Alias::new(tables.association))
            .to_owned()
    }

    /// Make sure the version exists; lock its row where the backend can,
    /// so reconciliations of the same version serialize.
    async fn anchor_version(&self, txn: &DatabaseTransaction, version_id: Uuid) -> Result<()> {
        let mut query = version::Entity::find_by_id(version_id);
        if txn.get_database_backend() != DbBackend::Sqlite {
            query = query.lock_exclusive();
        }
        query
            .one(txn)
            .await?
            .ok_or(CatalogError::VersionNotFound(version_id))?;
        Ok(())
    }

    async fn delete_joins(
        &self,
        txn: &DatabaseTransaction,
        version_id: Uuid,
        attribute_ids: &[i32],
    ) -> Result<usize> {
        if attribute_ids.is_empty() {
            return Ok(0);
        }

        let tables = self.store.tables();
        let backend = txn.get_database_backend();
        let mut removed = 0;
        for chunk in attribute_ids.chunks(BATCH_SIZE) {
            let stmt = Query::delete()
                .from_table(Alias::new(tables.association))
                .and_where(Expr::col(Alias::new(VERSION_ID)).eq(version_id))
                .and_where(Expr::col(Alias::new(tables.foreign_key)).is_in(chunk.iter().copied()))
                .to_owned();
            removed += txn.execute(backend.build(&stmt)).await?.rows_affected();
        }
        debug!(
            "Removed {} {} association(s) from version {}",
            removed,
            self.kind().label(),
            version_id
        );
        Ok(removed as usize)
    }

    async fn insert_missing_joins(
        &self,
        txn: &DatabaseTransaction,
        version_id: Uuid,
        current: &[AttributeRecord],
        records: &[AttributeRecord],
        actor: Uuid,
    ) -> Result<usize> {
        let joined: HashSet<i32> = current.iter().map(|c| c.id).collect();
        let missing: Vec<&AttributeRecord> = records
            .iter()
            .filter(|record| !joined.contains(&record.id))
            .collect();
        if missing.is_empty() {
            return Ok(0);
        }

        let tables = self.store.tables();
        let now = Utc::now();
        let backend = txn.get_database_backend();
        for chunk in missing.chunks(BATCH_SIZE) {
            let mut insert = Query::insert();
            insert.into_table(Alias::new(tables.association)).columns([
                Alias::new(VERSION_ID),
                Alias::new(tables.foreign_key),
                Alias::new(CREATED_BY),
                Alias::new(CREATED_AT),
            ]);
            for record in chunk {
                insert.values_panic([
                    version_id.into(),
                    record.id.into(),
                    actor.into(),
                    now.into(),
                ]);
            }
            txn.execute(backend.build(&insert)).await?;
        }
        debug!(
            "Joined {} {} record(s) to version {}",
            missing.len(),
            self.kind().label(),
            version_id
        );
        Ok(missing.len())
    }
}

/// Key-value view of a record list, for callers rendering responses
pub fn as_pairs(records: &[AttributeRecord]) -> Vec<AttributePair> {
    records
        .iter()
        .map(|r| AttributePair::new(r.key.clone(), r.value.clone()))
        .collect()
}

