//! In-memory document store
//!
//! Thread-safe store for tests and local development. All tables live behind one
//! mutex, which makes every transaction trivially atomic and isolated. Data is lost on
//! restart.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

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

type Address = (String, String);

struct MemoryTable {
    description: TableDescription,
    items: BTreeMap<Address, Item>,
}

/// In-memory store
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, MemoryTable>>,
    calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of store calls issued so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of items stored in a table.
    pub fn item_count(&self, table_name: &str) -> usize {
        self.lock()
            .get(table_name)
            .map(|t| t.items.len())
            .unwrap_or(0)
    }

    /// Best-effort TTL sweep, removing items whose TTL attribute is at or before `now`.
    ///
    /// Nothing in the engine depends on this running; expiry is always re-checked by
    /// the operation that reads an item.
    pub fn sweep_expired(&self, now: i64) -> usize {
        let mut tables = self.lock();
        let mut removed = 0;
        for table in tables.values_mut() {
            let Some(ttl) = table.description.ttl_attribute.clone() else {
                continue;
            };
            let before = table.items.len();
            table.items.retain(|_, item| {
                item.get(&ttl)
                    .and_then(|v| v.as_i64())
                    .map(|expires| expires > now)
                    .unwrap_or(true)
            });
            removed += before - table.items.len();
        }
        removed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, MemoryTable>> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn single_write(
        &self,
        table_name: &str,
        kind: &WriteKind,
    ) -> Result<WriteOutput, StoreError> {
        self.record_call();
        let mut tables = self.lock();
        let table = tables
            .get_mut(table_name)
            .ok_or_else(|| StoreError::TableNotFound(table_name.to_string()))?;
        let key = write_key(&table.description, kind)?;
        let address = table
            .description
            .address(&key)
            .map_err(StoreError::Validation)?;
        let current = table.items.get(&address);
        let effect = apply_write(&table.description, current, kind)?.ok_or_else(|| {
            StoreError::ConditionalCheckFailed {
                table: table_name.to_string(),
            }
        })?;

        let size = match &effect {
            WriteEffect::Upsert(item) => item_size(item),
            _ => current.map(item_size).unwrap_or(0),
        };
        let attributes = match effect {
            WriteEffect::Upsert(item) => {
                table.items.insert(address, item.clone());
                Some(item)
            }
            WriteEffect::Delete => {
                table.items.remove(&address);
                None
            }
            WriteEffect::Unchanged => current.cloned(),
        };
        Ok(WriteOutput {
            attributes,
            capacity: ConsumedCapacity::write(table_name, write_units(size, AccessMode::Standard)),
        })
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn create_table(&self, description: &TableDescription) -> Result<(), StoreError> {
        self.record_call();
        let mut tables = self.lock();
        match tables.get(&description.table_name) {
            Some(existing) if existing.description != *description => {
                Err(StoreError::Validation(format!(
                    "table {} already exists with a different schema",
                    description.table_name
                )))
            }
            Some(_) => Ok(()),
            None => {
                tables.insert(
                    description.table_name.clone(),
                    MemoryTable {
                        description: description.clone(),
                        items: BTreeMap::new(),
                    },
                );
                tracing::debug!(table = %description.table_name, "Created in-memory table");
                Ok(())
            }
        }
    }

    async fn describe_table(&self, table_name: &str) -> Result<TableDescription, StoreError> {
        self.record_call();
        self.lock()
            .get(table_name)
            .map(|t| t.description.clone())
            .ok_or_else(|| StoreError::TableNotFound(table_name.to_string()))
    }

    async fn get_item(
        &self,
        table_name: &str,
        key: &Item,
        _consistent: bool,
    ) -> Result<GetOutput, StoreError> {
        self.record_call();
        let tables = self.lock();
        let table = tables
            .get(table_name)
            .ok_or_else(|| StoreError::TableNotFound(table_name.to_string()))?;
        let address = table
            .description
            .address(key)
            .map_err(StoreError::Validation)?;
        let item = table.items.get(&address).cloned();
        let size = item.as_ref().map(item_size).unwrap_or(0);
        Ok(GetOutput {
            item,
            capacity: ConsumedCapacity::read(table_name, read_units(size, AccessMode::Standard)),
        })
    }

    async fn query(&self, table_name: &str, query: &Query) -> Result<QueryOutput, StoreError> {
        self.record_call();
        let tables = self.lock();
        let table = tables
            .get(table_name)
            .ok_or_else(|| StoreError::TableNotFound(table_name.to_string()))?;
        let schema = table
            .description
            .key_schema_for(query.index_name.as_deref())
            .ok_or_else(|| {
                StoreError::Validation(format!(
                    "table {table_name} has no index {:?}",
                    query.index_name
                ))
            })?;
        let hash_key = match &query.condition {
            KeyCondition::Hash { hash_key, .. } | KeyCondition::HashAndRange { hash_key, .. } => {
                hash_key
            }
        };
        if *hash_key != schema.hash_key {
            return Err(StoreError::Validation(format!(
                "query hash key '{hash_key}' is not the index hash key '{}'",
                schema.hash_key
            )));
        }

        let condition = query.as_condition();
        let mut items: Vec<Item> = table
            .items
            .values()
            .filter(|item| condition_holds(&condition, Some(item)))
            .cloned()
            .collect();
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
            &WriteKind::Put {
                item: item.clone(),
                condition: condition.cloned(),
            },
        )
    }

    async fn update_item(
        &self,
        table_name: &str,
        key: &Item,
        expression: &Expression,
    ) -> Result<WriteOutput, StoreError> {
        self.single_write(
            table_name,
            &WriteKind::Update {
                key: key.clone(),
                expression: expression.clone(),
            },
        )
    }

    async fn delete_item(
        &self,
        table_name: &str,
        key: &Item,
        condition: Option<&Expression>,
    ) -> Result<WriteOutput, StoreError> {
        self.single_write(
            table_name,
            &WriteKind::Delete {
                key: key.clone(),
                condition: condition.cloned(),
            },
        )
    }

    async fn transact_write(
        &self,
        writes: &[TableWrite],
    ) -> Result<TransactWriteOutput, StoreError> {
        self.record_call();
        if writes.is_empty() || writes.len() > MAX_TRANSACTION_ITEMS {
            return Err(StoreError::Validation(format!(
                "transaction must have 1..={MAX_TRANSACTION_ITEMS} legs, got {}",
                writes.len()
            )));
        }

        let mut tables = self.lock();

        // Validate and compute every effect before touching anything.
        let mut seen = HashSet::new();
        let mut reasons = Vec::with_capacity(writes.len());
        let mut planned = Vec::with_capacity(writes.len());
        for write in writes {
            let table = tables
                .get(&write.table_name)
                .ok_or_else(|| StoreError::TableNotFound(write.table_name.clone()))?;
            let key = write_key(&table.description, &write.kind)?;
            let address = table
                .description
                .address(&key)
                .map_err(StoreError::Validation)?;
            if !seen.insert((write.table_name.clone(), address.clone())) {
                return Err(StoreError::Validation(
                    "transaction contains multiple operations on one item".to_string(),
                ));
            }
            let current = table.items.get(&address);
            match apply_write(&table.description, current, &write.kind)? {
                Some(effect) => {
                    let size = match &effect {
                        WriteEffect::Upsert(item) => item_size(item),
                        _ => current.map(item_size).unwrap_or(0),
                    };
                    reasons.push(CancellationReason::None);
                    planned.push((write.table_name.clone(), address, effect, size));
                }
                None => reasons.push(CancellationReason::ConditionalCheckFailed),
            }
        }

        if reasons
            .iter()
            .any(|r| *r != CancellationReason::None)
        {
            return Err(StoreError::TransactionCanceled { reasons });
        }

        let mut capacity = Vec::with_capacity(planned.len());
        for (table_name, address, effect, size) in planned {
            if let Some(table) = tables.get_mut(&table_name) {
                match effect {
                    WriteEffect::Upsert(item) => {
                        table.items.insert(address, item);
                    }
                    WriteEffect::Delete => {
                        table.items.remove(&address);
                    }
                    WriteEffect::Unchanged => {}
                }
            }
            capacity.push(ConsumedCapacity::write(
                table_name,
                write_units(size, AccessMode::Transactional),
            ));
        }
        Ok(TransactWriteOutput { capacity })
    }

    async fn transact_get(&self, gets: &[TableGet]) -> Result<TransactGetOutput, StoreError> {
        self.record_call();
        if gets.len() > MAX_TRANSACTION_ITEMS {
            return Err(StoreError::Validation(format!(
                "transactional get must have at most {MAX_TRANSACTION_ITEMS} legs"
            )));
        }
        let tables = self.lock();
        let mut items = Vec::with_capacity(gets.len());
        let mut capacity = Vec::with_capacity(gets.len());
        for get in gets {
            let table = tables
                .get(&get.table_name)
                .ok_or_else(|| StoreError::TableNotFound(get.table_name.clone()))?;
            let address = table
                .description
                .address(&get.key)
                .map_err(StoreError::Validation)?;
            let item = table.items.get(&address).cloned();
            let size = item.as_ref().map(item_size).unwrap_or(0);
            capacity.push(ConsumedCapacity::read(
                get.table_name.clone(),
                read_units(size, AccessMode::Transactional),
            ));
            items.push(item);
        }
        Ok(TransactGetOutput { items, capacity })
    }

    async fn check_health(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.lock();
        let mut names: Vec<&String> = tables.keys().collect();
        names.sort();
        f.debug_struct("MemoryStore")
            .field("tables", &names)
            .field("calls", &self.call_count())
            .finish()
    }
}
