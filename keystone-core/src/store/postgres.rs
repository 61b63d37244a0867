//! PostgreSQL document store
//!
//! Items are JSONB documents in `keystone_items`, addressed by the canonical string form
//! of their primary key. Every write runs in a SERIALIZABLE transaction that locks the
//! addressed rows with `SELECT ... FOR UPDATE`, evaluates the leg conditions in-process
//! and only then applies the effects. Serialization failures surface as
//! [`StoreError::TransactionConflict`].

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use tokio::sync::RwLock;

use crate::attr::{item_size, Item};
use crate::capacity::{read_units, write_units, AccessMode, ConsumedCapacity};
use crate::expr::eval::condition_holds;
use crate::expr::Expression;
use crate::index::{KeyCondition, Query, TableDescription};

use super::{
    apply_write, write_key, CancellationReason, GetOutput, QueryOutput, Store, StoreError,
    TableGet, TableWrite, TransactGetOutput, TransactWriteOutput, WriteEffect, WriteKind,
    WriteOutput, MAX_TRANSACTION_ITEMS,
};

/// PostgreSQL-backed document store
pub struct PostgresStore {
    pool: PgPool,
    descriptions: RwLock<HashMap<String, TableDescription>>,
}

/// A leg whose effect has been computed under row locks.
struct Planned {
    table_name: String,
    address: (String, String),
    effect: WriteEffect,
    size: usize,
}

impl PostgresStore {
    /// Connect to PostgreSQL
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        tracing::info!(max_connections, "Connected to PostgreSQL database");
        Ok(Self::from_pool(pool))
    }

    /// Create from an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            descriptions: RwLock::new(HashMap::new()),
        }
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        tracing::info!("Database migrations completed");
        Ok(())
    }

    async fn description(&self, table_name: &str) -> Result<TableDescription, StoreError> {
        if let Some(description) = self.descriptions.read().await.get(table_name) {
            return Ok(description.clone());
        }
        let value: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT description FROM keystone_tables WHERE table_name = $1")
                .bind(table_name)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?;
        let value = value.ok_or_else(|| StoreError::TableNotFound(table_name.to_string()))?;
        let description: TableDescription = serde_json::from_value(value)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.descriptions
            .write()
            .await
            .insert(table_name.to_string(), description.clone());
        Ok(description)
    }

    /// Lock the addressed rows, evaluate every leg and apply them only if all pass.
    ///
    /// Returns per-leg reasons when any condition fails; nothing is written then.
    async fn run_writes(
        &self,
        writes: &[TableWrite],
        mode: AccessMode,
    ) -> Result<Result<Vec<(Planned, Option<Item>)>, Vec<CancellationReason>>, StoreError> {
        let mut descriptions = Vec::with_capacity(writes.len());
        for write in writes {
            descriptions.push(self.description(&write.table_name).await?);
        }

        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        let mut seen = HashSet::new();
        let mut reasons = Vec::with_capacity(writes.len());
        let mut planned = Vec::with_capacity(writes.len());
        for (write, description) in writes.iter().zip(&descriptions) {
            let key = write_key(description, &write.kind)?;
            let address = description.address(&key).map_err(StoreError::Validation)?;
            if !seen.insert((write.table_name.as_str(), address.clone())) {
                return Err(StoreError::Validation(
                    "transaction contains multiple operations on one item".to_string(),
                ));
            }
            let current = lock_item(&mut tx, &write.table_name, &address).await?;
            match apply_write(description, current.as_ref(), &write.kind)? {
                Some(effect) => {
                    let size = match &effect {
                        WriteEffect::Upsert(item) => item_size(item),
                        _ => current.as_ref().map(item_size).unwrap_or(0),
                    };
                    reasons.push(CancellationReason::None);
                    planned.push((
                        Planned {
                            table_name: write.table_name.clone(),
                            address,
                            effect,
                            size,
                        },
                        current,
                    ));
                }
                None => reasons.push(CancellationReason::ConditionalCheckFailed),
            }
        }

        if reasons.iter().any(|r| *r != CancellationReason::None) {
            tx.rollback().await.map_err(map_sqlx)?;
            return Ok(Err(reasons));
        }

        for (leg, _) in &planned {
            match &leg.effect {
                WriteEffect::Upsert(item) => upsert_item(&mut tx, leg, item).await?,
                WriteEffect::Delete => delete_item(&mut tx, leg).await?,
                WriteEffect::Unchanged => {}
            }
        }
        tx.commit().await.map_err(map_sqlx)?;

        tracing::debug!(legs = writes.len(), ?mode, "Committed write transaction");
        Ok(Ok(planned))
    }

    async fn single_write(
        &self,
        table_name: &str,
        kind: WriteKind,
    ) -> Result<WriteOutput, StoreError> {
        let writes = [TableWrite {
            table_name: table_name.to_string(),
            kind,
        }];
        let mut planned = match self.run_writes(&writes, AccessMode::Standard).await? {
            Ok(planned) => planned,
            Err(_) => {
                return Err(StoreError::ConditionalCheckFailed {
                    table: table_name.to_string(),
                })
            }
        };
        let (leg, current) = planned
            .pop()
            .ok_or_else(|| StoreError::Query("write produced no result".to_string()))?;
        let attributes = match leg.effect {
            WriteEffect::Upsert(item) => Some(item),
            WriteEffect::Delete => None,
            WriteEffect::Unchanged => current,
        };
        Ok(WriteOutput {
            attributes,
            capacity: ConsumedCapacity::write(
                table_name,
                write_units(leg.size, AccessMode::Standard),
            ),
        })
    }
}

async fn lock_item(
    tx: &mut Transaction<'_, Postgres>,
    table_name: &str,
    (hash, range): &(String, String),
) -> Result<Option<Item>, StoreError> {
    let value: Option<serde_json::Value> = sqlx::query_scalar(
        r#"
        SELECT item FROM keystone_items
        WHERE table_name = $1 AND hash_key = $2 AND range_key = $3
        FOR UPDATE
        "#,
    )
    .bind(table_name)
    .bind(hash)
    .bind(range)
    .fetch_optional(&mut **tx)
    .await
    .map_err(map_sqlx)?;
    value.map(decode_item).transpose()
}

async fn upsert_item(
    tx: &mut Transaction<'_, Postgres>,
    leg: &Planned,
    item: &Item,
) -> Result<(), StoreError> {
    let document =
        serde_json::to_value(item).map_err(|e| StoreError::Serialization(e.to_string()))?;
    sqlx::query(
        r#"
        INSERT INTO keystone_items (table_name, hash_key, range_key, item)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (table_name, hash_key, range_key) DO UPDATE SET
            item = EXCLUDED.item,
            updated_at = NOW()
        "#,
    )
    .bind(&leg.table_name)
    .bind(&leg.address.0)
    .bind(&leg.address.1)
    .bind(&document)
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx)?;
    Ok(())
}

async fn delete_item(tx: &mut Transaction<'_, Postgres>, leg: &Planned) -> Result<(), StoreError> {
    sqlx::query(
        "DELETE FROM keystone_items WHERE table_name = $1 AND hash_key = $2 AND range_key = $3",
    )
    .bind(&leg.table_name)
    .bind(&leg.address.0)
    .bind(&leg.address.1)
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx)?;
    Ok(())
}

fn decode_item(value: serde_json::Value) -> Result<Item, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Map driver errors, treating serialization failures and deadlocks as conflicts.
fn map_sqlx(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if let Some(code) = db.code() {
            if matches!(code.as_ref(), "40001" | "40P01" | "23505") {
                return StoreError::TransactionConflict(db.message().to_string());
            }
        }
    }
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Connection(err.to_string())
        }
        other => StoreError::Query(other.to_string()),
    }
}

#[async_trait]
impl Store for PostgresStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn create_table(&self, description: &TableDescription) -> Result<(), StoreError> {
        let document = serde_json::to_value(description)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO keystone_tables (table_name, description)
            VALUES ($1, $2)
            ON CONFLICT (table_name) DO NOTHING
            "#,
        )
        .bind(&description.table_name)
        .bind(&document)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        self.descriptions
            .write()
            .await
            .remove(&description.table_name);
        let deployed = self.description(&description.table_name).await?;
        if deployed != *description {
            return Err(StoreError::Validation(format!(
                "table {} already exists with a different schema",
                description.table_name
            )));
        }
        tracing::info!(table = %description.table_name, "Table ready");
        Ok(())
    }

    async fn describe_table(&self, table_name: &str) -> Result<TableDescription, StoreError> {
        self.description(table_name).await
    }

    async fn get_item(
        &self,
        table_name: &str,
        key: &Item,
        _consistent: bool,
    ) -> Result<GetOutput, StoreError> {
        let description = self.description(table_name).await?;
        let (hash, range) = description.address(key).map_err(StoreError::Validation)?;
        let value: Option<serde_json::Value> = sqlx::query_scalar(
            r#"
            SELECT item FROM keystone_items
            WHERE table_name = $1 AND hash_key = $2 AND range_key = $3
            "#,
        )
        .bind(table_name)
        .bind(&hash)
        .bind(&range)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        let item = value.map(decode_item).transpose()?;
        let size = item.as_ref().map(item_size).unwrap_or(0);
        Ok(GetOutput {
            item,
            capacity: ConsumedCapacity::read(table_name, read_units(size, AccessMode::Standard)),
        })
    }

    async fn query(&self, table_name: &str, query: &Query) -> Result<QueryOutput, StoreError> {
        let description = self.description(table_name).await?;
        let schema = description
            .key_schema_for(query.index_name.as_deref())
            .ok_or_else(|| {
                StoreError::Validation(format!(
                    "table {table_name} has no index {:?}",
                    query.index_name
                ))
            })?;
        let (hash_key, hash_value) = match &query.condition {
            KeyCondition::Hash {
                hash_key,
                hash_value,
            }
            | KeyCondition::HashAndRange {
                hash_key,
                hash_value,
                ..
            } => (hash_key, hash_value),
        };
        if *hash_key != schema.hash_key {
            return Err(StoreError::Validation(format!(
                "query hash key '{hash_key}' is not the index hash key '{}'",
                schema.hash_key
            )));
        }

        let mut probe = Item::new();
        probe.insert(hash_key.clone(), hash_value.clone());
        let probe =
            serde_json::to_value(&probe).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let rows: Vec<serde_json::Value> = sqlx::query_scalar(
            r#"
            SELECT item FROM keystone_items
            WHERE table_name = $1 AND item @> $2
            ORDER BY hash_key, range_key
            "#,
        )
        .bind(table_name)
        .bind(&probe)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        // Containment matches the hash key; the range condition is evaluated here.
        let condition = query.as_condition();
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let item = decode_item(row)?;
            if condition_holds(&condition, Some(&item)) {
                items.push(item);
            }
        }
        if let Some(limit) = query.limit {
            items.truncate(limit);
        }
        let size = items.iter().map(item_size).sum();
        Ok(QueryOutput {
            items,
            capacity: ConsumedCapacity::read(table_name, read_units(size, AccessMode::Standard)),
        })
    }

    async fn put_item(
        &self,
        table_name: &str,
        item: &Item,
        condition: Option<&Expression>,
    ) -> Result<WriteOutput, StoreError> {
        self.single_write(
            table_name,
            WriteKind::Put {
                item: item.clone(),
                condition: condition.cloned(),
            },
        )
        .await
    }

    async fn update_item(
        &self,
        table_name: &str,
        key: &Item,
        expression: &Expression,
    ) -> Result<WriteOutput, StoreError> {
        self.single_write(
            table_name,
            WriteKind::Update {
                key: key.clone(),
                expression: expression.clone(),
            },
        )
        .await
    }

    async fn delete_item(
        &self,
        table_name: &str,
        key: &Item,
        condition: Option<&Expression>,
    ) -> Result<WriteOutput, StoreError> {
        self.single_write(
            table_name,
            WriteKind::Delete {
                key: key.clone(),
                condition: condition.cloned(),
            },
        )
        .await
    }

    async fn transact_write(
        &self,
        writes: &[TableWrite],
    ) -> Result<TransactWriteOutput, StoreError> {
        if writes.is_empty() || writes.len() > MAX_TRANSACTION_ITEMS {
            return Err(StoreError::Validation(format!(
                "transaction must have 1..={MAX_TRANSACTION_ITEMS} legs, got {}",
                writes.len()
            )));
        }
        let planned = self
            .run_writes(writes, AccessMode::Transactional)
            .await?
            .map_err(|reasons| StoreError::TransactionCanceled { reasons })?;
        let capacity = planned
            .into_iter()
            .map(|(leg, _)| {
                ConsumedCapacity::write(
                    leg.table_name,
                    write_units(leg.size, AccessMode::Transactional),
                )
            })
            .collect();
        Ok(TransactWriteOutput { capacity })
    }

    async fn transact_get(&self, gets: &[TableGet]) -> Result<TransactGetOutput, StoreError> {
        if gets.len() > MAX_TRANSACTION_ITEMS {
            return Err(StoreError::Validation(format!(
                "transactional get must have at most {MAX_TRANSACTION_ITEMS} legs"
            )));
        }
        let mut addresses = Vec::with_capacity(gets.len());
        for get in gets {
            let description = self.description(&get.table_name).await?;
            addresses.push(description.address(&get.key).map_err(StoreError::Validation)?);
        }

        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        let mut items = Vec::with_capacity(gets.len());
        let mut capacity = Vec::with_capacity(gets.len());
        for (get, (hash, range)) in gets.iter().zip(&addresses) {
            let value: Option<serde_json::Value> = sqlx::query_scalar(
                r#"
                SELECT item FROM keystone_items
                WHERE table_name = $1 AND hash_key = $2 AND range_key = $3
                "#,
            )
            .bind(&get.table_name)
            .bind(hash)
            .bind(range)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx)?;
            let item = value.map(decode_item).transpose()?;
            let size = item.as_ref().map(item_size).unwrap_or(0);
            capacity.push(ConsumedCapacity::read(
                get.table_name.clone(),
                read_units(size, AccessMode::Transactional),
            ));
            items.push(item);
        }
        tx.commit().await.map_err(map_sqlx)?;
        Ok(TransactGetOutput { items, capacity })
    }

    async fn check_health(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }
}
