//! Shared attribute dictionary access
//!
//! Records are created lazily on first use and never updated. Deletion
//! only happens through orphan pruning in the reconciler.

use sea_orm::sea_query::{Alias, Expr, OnConflict, Order, Query, SelectStatement};
use sea_orm::{Condition, ConnectionTrait, DatabaseTransaction, DbBackend, FromQueryResult};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use super::{AttributeKind, AttributePair, AttributeRecord, AttributeTables};
use crate::error::Result;

pub(crate) const ID: &str = "id";
pub(crate) const KEY: &str = "key";
pub(crate) const VALUE: &str = "value";

/// Rows or pairs handled per statement in batched lookups and writes
pub(crate) const BATCH_SIZE: usize = 200;

/// Data access for one attribute dictionary (tags or metadata)
#[derive(Debug, Clone, Copy)]
pub struct AttributeStore {
    kind: AttributeKind,
    tables: AttributeTables,
}

impl AttributeStore {
    pub fn new(kind: AttributeKind) -> Self {
        Self {
            kind,
            tables: kind.tables(),
        }
    }

    pub fn kind(&self) -> AttributeKind {
        self.kind
    }

    pub(crate) fn tables(&self) -> AttributeTables {
        self.tables
    }

    /// Base select of every attribute column, ordered by id
    pub(crate) fn select_records(&self) -> SelectStatement {
        let table = Alias::new(self.tables.attribute);
        Query::select()
            .columns([
                (table.clone(), Alias::new(ID)),
                (table.clone(), Alias::new(KEY)),
                (table.clone(), Alias::new(VALUE)),
            ])
            .from(table.clone())
            .order_by((table, Alias::new(ID)), Order::Asc)
            .to_owned()
    }

    pub(crate) async fn fetch<C>(&self, db: &C, stmt: &SelectStatement) -> Result<Vec<AttributeRecord>>
    where
        C: ConnectionTrait,
    {
        let backend = db.get_database_backend();
        Ok(AttributeRecord::find_by_statement(backend.build(stmt))
            .all(db)
            .await?)
    }

    /// Every record in the dictionary
    pub async fn find_all<C>(&self, db: &C) -> Result<Vec<AttributeRecord>>
    where
        C: ConnectionTrait,
    {
        self.fetch(db, &self.select_records()).await
    }

    /// The record holding exactly this (key, value), if any
    pub async fn find_existing<C>(&self, db: &C, key: &str, value: &str) -> Result<Option<AttributeRecord>>
    where
        C: ConnectionTrait,
    {
        let stmt = self
            .select_records()
            .and_where(Expr::col(Alias::new(KEY)).eq(key))
            .and_where(Expr::col(Alias::new(VALUE)).eq(value))
            .to_owned();
        Ok(self.fetch(db, &stmt).await?.into_iter().next())
    }

    /// Records holding any of `pairs`, looked up `BATCH_SIZE` pairs per
    /// statement. With `share` the rows are read under a shared lock.
    async fn find_pairs<C>(&self, db: &C, pairs: &[AttributePair], share: bool) -> Result<Vec<AttributeRecord>>
    where
        C: ConnectionTrait,
    {
        let backend = db.get_database_backend();
        let mut found = Vec::with_capacity(pairs.len());
        for chunk in pairs.chunks(BATCH_SIZE) {
            let mut any = Condition::any();
            for pair in chunk {
                any = any.add(
                    Condition::all()
                        .add(Expr::col(Alias::new(KEY)).eq(pair.key.as_str()))
                        .add(Expr::col(Alias::new(VALUE)).eq(pair.value.as_str())),
                );
            }
            let mut stmt = self.select_records().cond_where(any).to_owned();
            if share {
                share_lock(&mut stmt, backend);
            }
            found.extend(self.fetch(db, &stmt).await?);
        }
        Ok(found)
    }

    /// Re-read records by id under a shared lock, in ascending id order.
    ///
    /// Records deleted since the caller saw them are simply missing from
    /// the result.
    async fn share_ids(&self, txn: &DatabaseTransaction, ids: &[i32]) -> Result<Vec<AttributeRecord>> {
        let mut ids = ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let backend = txn.get_database_backend();
        let table = Alias::new(self.tables.attribute);
        let mut found = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(BATCH_SIZE) {
            let mut stmt = self
                .select_records()
                .and_where(Expr::col((table.clone(), Alias::new(ID))).is_in(chunk.iter().copied()))
                .to_owned();
            share_lock(&mut stmt, backend);
            found.extend(self.fetch(txn, &stmt).await?);
        }
        Ok(found)
    }

    /// Insert pairs that are not stored yet and return their records.
    ///
    /// Pairs already present are skipped, including ones a concurrent
    /// unit of work commits between the lookup and the insert; the
    /// returned records are held under a shared lock until `txn` ends.
    pub async fn insert_many(
        &self,
        txn: &DatabaseTransaction,
        pairs: &[AttributePair],
    ) -> Result<Vec<AttributeRecord>> {
        let mut seen = HashSet::new();
        let mut wanted: Vec<AttributePair> = pairs
            .iter()
            .filter(|pair| seen.insert(*pair))
            .cloned()
            .collect();

        let existing = self.find_pairs(txn, &wanted, false).await?;
        let stored: HashSet<(&str, &str)> = existing
            .iter()
            .map(|r| (r.key.as_str(), r.value.as_str()))
            .collect();
        wanted.retain(|pair| !stored.contains(&(pair.key.as_str(), pair.value.as_str())));
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        self.insert_rows(txn, &wanted).await?;

        let inserted = self.find_pairs(txn, &wanted, true).await?;
        debug!(
            "Inserted {} new {} record(s)",
            inserted.len(),
            self.kind.label()
        );
        Ok(inserted)
    }

    /// Batched insert where a pair that is already stored is left alone
    async fn insert_rows(&self, txn: &DatabaseTransaction, pairs: &[AttributePair]) -> Result<()> {
        let backend = txn.get_database_backend();
        let on_conflict = OnConflict::columns([Alias::new(KEY), Alias::new(VALUE)])
            .do_nothing_on([Alias::new(ID)])
            .to_owned();
        for chunk in pairs.chunks(BATCH_SIZE) {
            let mut insert = Query::insert();
            insert
                .into_table(Alias::new(self.tables.attribute))
                .columns([Alias::new(KEY), Alias::new(VALUE)])
                .on_conflict(on_conflict.clone());
            for pair in chunk {
                insert.values_panic([pair.key.clone().into(), pair.value.clone().into()]);
            }
            txn.execute(backend.build(&insert)).await?;
        }
        Ok(())
    }

    /// Resolve every pair to a record, creating the ones that are missing.
    ///
    /// Returns the existing matches followed by the newly inserted
    /// records, one record per distinct input pair. Every returned record
    /// is share-locked, so a concurrent prune waits for `txn` instead of
    /// deleting a record this unit of work is about to join.
    pub async fn create_attributes(
        &self,
        txn: &DatabaseTransaction,
        pairs: &[AttributePair],
    ) -> Result<Vec<AttributeRecord>> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }

        let all = self.find_all(txn).await?;
        let index: HashMap<(&str, &str), i32> = all
            .iter()
            .map(|r| ((r.key.as_str(), r.value.as_str()), r.id))
            .collect();
        let lookup = |pair: &AttributePair| index.get(&(pair.key.as_str(), pair.value.as_str())).copied();

        let candidates: Vec<i32> = pairs.iter().filter_map(|pair| lookup(pair)).collect();
        let mut matched = self.share_ids(txn, &candidates).await?;

        // Matches pruned since the scan are created again
        let kept: HashSet<i32> = matched.iter().map(|r| r.id).collect();
        let fresh: Vec<AttributePair> = pairs
            .iter()
            .filter(|pair| lookup(*pair).map_or(true, |id| !kept.contains(&id)))
            .cloned()
            .collect();

        let inserted = self.insert_many(txn, &fresh).await?;
        matched.extend(inserted);
        Ok(matched)
    }
}

fn share_lock(stmt: &mut SelectStatement, backend: DbBackend) {
    // SQLite serializes writers and has no row locks
    if backend != DbBackend::Sqlite {
        stmt.lock_shared();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::schema::create_schema;
    use sea_orm::{DatabaseConnection, TransactionTrait};

    async fn setup() -> DatabaseConnection {
        let db = Database::new("sqlite::memory:").await.unwrap();
        create_schema(db.connection()).await.unwrap();
        db.connection().clone()
    }

    #[tokio::test]
    async fn test_create_attributes_reuses_existing_records() {
        let db = setup().await;
        let store = AttributeStore::new(AttributeKind::Tag);

        let txn = db.begin().await.unwrap();
        let first = store
            .create_attributes(&txn, &[AttributePair::new("colour", "red")])
            .await
            .unwrap();
        let second = store
            .create_attributes(
                &txn,
                &[AttributePair::new("colour", "red"), AttributePair::new("colour", "blue")],
            )
            .await
            .unwrap();
        txn.commit().await.unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 2);
        assert_eq!(second[0], first[0]);
        assert_eq!(store.find_all(&db).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_insert_many_skips_stored_pairs() {
        let db = setup().await;
        let store = AttributeStore::new(AttributeKind::Metadata);

        let txn = db.begin().await.unwrap();
        store
            .insert_many(&txn, &[AttributePair::new("owner", "alice")])
            .await
            .unwrap();
        let inserted = store
            .insert_many(
                &txn,
                &[
                    AttributePair::new("owner", "alice"),
                    AttributePair::new("owner", "bob"),
                    AttributePair::new("owner", "bob"),
                ],
            )
            .await
            .unwrap();
        txn.commit().await.unwrap();

        assert_eq!(inserted.len(), 1);
        assert_eq!(inserted[0].value, "bob");

        let found = store.find_existing(&db, "owner", "alice").await.unwrap();
        assert!(found.is_some());
        assert!(store.find_existing(&db, "owner", "carol").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_kinds_are_disjoint_namespaces() {
        let db = setup().await;
        let tags = AttributeStore::new(AttributeKind::Tag);
        let metadata = AttributeStore::new(AttributeKind::Metadata);

        let txn = db.begin().await.unwrap();
        tags.create_attributes(&txn, &[AttributePair::new("a", "1")])
            .await
            .unwrap();
        txn.commit().await.unwrap();

        assert_eq!(tags.find_all(&db).await.unwrap().len(), 1);
        assert!(metadata.find_all(&db).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insert_rows_tolerates_stored_pairs() {
        let db = setup().await;
        let store = AttributeStore::new(AttributeKind::Tag);

        let txn = db.begin().await.unwrap();
        let first = store
            .insert_many(&txn, &[AttributePair::new("env", "prod")])
            .await
            .unwrap();
        // Same state as another unit of work committing the pair after our lookup
        store
            .insert_rows(
                &txn,
                &[AttributePair::new("env", "prod"), AttributePair::new("env", "dev")],
            )
            .await
            .unwrap();
        txn.commit().await.unwrap();

        let stored = store.find_all(&db).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.contains(&first[0]));
    }

    #[tokio::test]
    async fn test_many_pairs_resolve_in_batches() {
        let db = setup().await;
        let store = AttributeStore::new(AttributeKind::Tag);
        let pairs: Vec<AttributePair> = (0..BATCH_SIZE * 3 + 7)
            .map(|i| AttributePair::new(format!("k{}", i), "v"))
            .collect();

        let txn = db.begin().await.unwrap();
        let created = store.create_attributes(&txn, &pairs).await.unwrap();
        let again = store.create_attributes(&txn, &pairs).await.unwrap();
        txn.commit().await.unwrap();

        assert_eq!(created.len(), pairs.len());
        assert_eq!(again.len(), pairs.len());
        assert_eq!(store.find_all(&db).await.unwrap().len(), pairs.len());
    }
}
