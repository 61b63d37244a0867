//! Transactions over logical tables.
//!
//! A [`Transaction`] bundles write legs addressed to [`LogicalTable`]s with the
//! [`Precondition`]s that must hold before any of them is submitted. Execution is:
//!
//! 1. resolve every leg to a concrete table (unresolved tables fail before any store
//!    call),
//! 2. run the preconditions in order,
//! 3. submit the legs atomically. A single leg is sent as a direct
//!    put/update/delete (or a consistent read for a lone condition check), which has
//!    the same outcome at half the cost.
//!
//! Stores cap atomic batches at [`MAX_TRANSACTION_ITEMS`] legs; [`combine`] merges
//! several transactions and splits them into chunks that fit.

use std::sync::Arc;

use crate::attr::Item;
use crate::capacity::{CapacityAccumulator, ConsumedCapacity};
use crate::context::Context;
use crate::expr::eval::condition_holds;
use crate::expr::Expression;
use crate::precondition::{check_preconditions, Precondition};
use crate::resolver::{LogicalTable, TableResolver};
use crate::store::{
    Store, StoreError, TableGet, TableWrite, Write, WriteKind, MAX_TRANSACTION_ITEMS,
};

/// Result of executing a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionOutcome {
    Committed(TransactionOutput),
    /// A precondition failed; nothing was written.
    PreconditionFailed { precondition: String },
}

impl TransactionOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionOutput {
    /// Item after the write, for transactions sent as a single direct write.
    pub attributes: Option<Item>,
    pub capacity: Vec<ConsumedCapacity>,
}

#[derive(Debug, Clone, Default)]
pub struct Transaction {
    writes: Vec<Write>,
    preconditions: Vec<Arc<dyn Precondition>>,
    resolved: Option<Vec<TableWrite>>,
    capacity: CapacityAccumulator,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record consumed capacity into a caller-owned accumulator.
    pub fn with_capacity(capacity: CapacityAccumulator) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn write(mut self, write: Write) -> Self {
        self.writes.push(write);
        self.resolved = None;
        self
    }

    pub fn put(self, table: LogicalTable, item: Item, condition: Option<Expression>) -> Self {
        self.write(Write {
            table,
            kind: WriteKind::Put { item, condition },
        })
    }

    pub fn update(self, table: LogicalTable, key: Item, expression: Expression) -> Self {
        self.write(Write {
            table,
            kind: WriteKind::Update { key, expression },
        })
    }

    pub fn delete(self, table: LogicalTable, key: Item, condition: Option<Expression>) -> Self {
        self.write(Write {
            table,
            kind: WriteKind::Delete { key, condition },
        })
    }

    pub fn condition_check(self, table: LogicalTable, key: Item, condition: Expression) -> Self {
        self.write(Write {
            table,
            kind: WriteKind::ConditionCheck { key, condition },
        })
    }

    pub fn precondition(mut self, precondition: Arc<dyn Precondition>) -> Self {
        self.preconditions.push(precondition);
        self
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn preconditions(&self) -> &[Arc<dyn Precondition>] {
        &self.preconditions
    }

    pub fn capacity(&self) -> &CapacityAccumulator {
        &self.capacity
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Concrete legs, once [`Transaction::resolve_tables`] has succeeded.
    pub fn resolved(&self) -> Option<&[TableWrite]> {
        self.resolved.as_deref()
    }

    /// Resolve every leg's logical table; fails closed on the first unresolved one.
    pub fn resolve_tables(&mut self, resolver: &TableResolver) -> Result<(), StoreError> {
        let resolved = self
            .writes
            .iter()
            .map(|write| {
                Ok(TableWrite {
                    table_name: resolver.require(write.table)?.to_string(),
                    kind: write.kind.clone(),
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        self.resolved = Some(resolved);
        Ok(())
    }

    pub async fn execute(
        &mut self,
        ctx: &Context,
        store: &dyn Store,
        resolver: &TableResolver,
    ) -> Result<TransactionOutcome, StoreError> {
        if self.writes.is_empty() {
            return Err(StoreError::Validation("transaction has no writes".to_string()));
        }
        if self.writes.len() > MAX_TRANSACTION_ITEMS {
            return Err(StoreError::Validation(format!(
                "transaction has {} writes, at most {MAX_TRANSACTION_ITEMS} are allowed; use combine",
                self.writes.len()
            )));
        }
        if let Err(err) = self.resolve_tables(resolver) {
            tracing::error!(error = %err, "Transaction references an unresolved table");
            return Err(err);
        }

        if let Some(precondition) = check_preconditions(ctx, store, resolver, self).await? {
            return Ok(TransactionOutcome::PreconditionFailed { precondition });
        }

        let legs = self.resolved.as_deref().unwrap_or_default();
        let output = match legs {
            [single] => execute_single(ctx, store, single).await?,
            legs => {
                let output = ctx
                    .run("transact_write", store.transact_write(legs))
                    .await?;
                TransactionOutput {
                    attributes: None,
                    capacity: output.capacity,
                }
            }
        };
        self.capacity.extend(&output.capacity);
        tracing::debug!(
            legs = legs.len(),
            backend = store.backend(),
            "Transaction committed"
        );
        Ok(TransactionOutcome::Committed(output))
    }
}

async fn execute_single(
    ctx: &Context,
    store: &dyn Store,
    leg: &TableWrite,
) -> Result<TransactionOutput, StoreError> {
    let table = leg.table_name.as_str();
    let output = match &leg.kind {
        WriteKind::Put { item, condition } => {
            ctx.run("put_item", store.put_item(table, item, condition.as_ref()))
                .await?
        }
        WriteKind::Update { key, expression } => {
            ctx.run("update_item", store.update_item(table, key, expression))
                .await?
        }
        WriteKind::Delete { key, condition } => {
            ctx.run("delete_item", store.delete_item(table, key, condition.as_ref()))
                .await?
        }
        WriteKind::ConditionCheck { key, condition } => {
            let read = ctx
                .run("condition check", store.get_item(table, key, true))
                .await?;
            let holds = condition
                .condition()
                .map(|c| condition_holds(c, read.item.as_ref()))
                .unwrap_or(true);
            if !holds {
                return Err(StoreError::ConditionalCheckFailed {
                    table: table.to_string(),
                });
            }
            return Ok(TransactionOutput {
                attributes: read.item,
                capacity: vec![read.capacity],
            });
        }
    };
    Ok(TransactionOutput {
        attributes: output.attributes,
        capacity: vec![output.capacity],
    })
}

/// Merge transactions and split them into chunks of at most [`MAX_TRANSACTION_ITEMS`]
/// writes.
///
/// Write order is preserved. Each chunk carries the preconditions of every source
/// transaction that contributed a write to it (a source with preconditions but no
/// writes contributes to the chunk being filled at that point). All chunks record
/// capacity into the first source's accumulator. Chunks commit independently.
pub fn combine(transactions: Vec<Transaction>) -> Vec<Transaction> {
    let capacity = transactions
        .first()
        .map(|tx| tx.capacity.clone())
        .unwrap_or_default();

    let mut chunks: Vec<Transaction> = Vec::new();
    let mut current = Transaction::with_capacity(capacity.clone());
    for source in transactions {
        if source.writes.is_empty() {
            attach(&mut current, &source.preconditions);
            continue;
        }
        let mut attached = false;
        for write in source.writes {
            if current.writes.len() == MAX_TRANSACTION_ITEMS {
                chunks.push(std::mem::replace(
                    &mut current,
                    Transaction::with_capacity(capacity.clone()),
                ));
                attached = false;
            }
            if !attached {
                attach(&mut current, &source.preconditions);
                attached = true;
            }
            current.writes.push(write);
        }
    }
    if !current.writes.is_empty() || !current.preconditions.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn attach(chunk: &mut Transaction, preconditions: &[Arc<dyn Precondition>]) {
    for precondition in preconditions {
        if !chunk
            .preconditions
            .iter()
            .any(|existing| Arc::ptr_eq(existing, precondition))
        {
            chunk.preconditions.push(Arc::clone(precondition));
        }
    }
}

/// Execute chunks in order, stopping at the first one that does not commit.
pub async fn execute_all(
    ctx: &Context,
    store: &dyn Store,
    resolver: &TableResolver,
    chunks: &mut [Transaction],
) -> Result<Vec<TransactionOutcome>, StoreError> {
    let mut outcomes = Vec::with_capacity(chunks.len());
    for chunk in chunks.iter_mut() {
        let outcome = chunk.execute(ctx, store, resolver).await?;
        let committed = outcome.is_committed();
        outcomes.push(outcome);
        if !committed {
            break;
        }
    }
    Ok(outcomes)
}

/// Consistent multi-item read.
#[derive(Debug, Clone, Default)]
pub struct ReadTransaction {
    gets: Vec<(LogicalTable, Item)>,
    capacity: CapacityAccumulator,
}

impl ReadTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: CapacityAccumulator) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn get(mut self, table: LogicalTable, key: Item) -> Self {
        self.gets.push((table, key));
        self
    }

    pub fn capacity(&self) -> &CapacityAccumulator {
        &self.capacity
    }

    /// Items in request order, `None` for absent ones.
    pub async fn execute(
        &self,
        ctx: &Context,
        store: &dyn Store,
        resolver: &TableResolver,
    ) -> Result<Vec<Option<Item>>, StoreError> {
        let gets = self
            .gets
            .iter()
            .map(|(table, key)| {
                Ok(TableGet {
                    table_name: resolver.require(*table)?.to_string(),
                    key: key.clone(),
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        match gets.as_slice() {
            [] => Ok(Vec::new()),
            [single] => {
                let output = ctx
                    .run(
                        "get_item",
                        store.get_item(&single.table_name, &single.key, true),
                    )
                    .await?;
                self.capacity.add(&output.capacity);
                Ok(vec![output.item])
            }
            gets => {
                let output = ctx.run("transact_get", store.transact_get(gets)).await?;
                self.capacity.extend(&output.capacity);
                Ok(output.items)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::attr::ScalarType;
    use crate::expr::{Condition, ExpressionBuilder};
    use crate::index::{AttributeDefinition, Index, KeySchema, TableDescription};
    use crate::precondition::DoesNotExist;
    use crate::store::MemoryStore;

    async fn setup() -> (MemoryStore, TableResolver) {
        let resolver = TableResolver::with_naming("tx", "test");
        let store = MemoryStore::new();
        for (table, hash) in [
            (LogicalTable::Ceremonies, "challenge_id"),
            (LogicalTable::Credentials, "credential_id"),
            (LogicalTable::Users, "user_id"),
        ] {
            store
                .create_table(&TableDescription {
                    table_name: resolver.require(table).unwrap().to_string(),
                    key_schema: KeySchema::hash(hash),
                    attribute_definitions: vec![AttributeDefinition::new(hash, ScalarType::S)],
                    secondary_indexes: vec![],
                    ttl_attribute: None,
                })
                .await
                .unwrap();
        }
        (store, resolver)
    }

    fn user(id: &str) -> Item {
        Index::primary("user_id", id).key()
    }

    fn create_once() -> Option<Expression> {
        Some(Expression::condition_only(Condition::not_exists("user_id")))
    }

    #[tokio::test]
    async fn test_single_write_is_sent_directly() {
        let (store, resolver) = setup().await;
        let mut tx = Transaction::new().put(LogicalTable::Users, user("u1"), create_once());
        let outcome = tx
            .execute(&Context::background(), &store, &resolver)
            .await
            .unwrap();
        let TransactionOutcome::Committed(output) = outcome else {
            panic!("expected commit");
        };
        assert_eq!(output.attributes, Some(user("u1")));
        assert_eq!(store.item_count("tx-users-test"), 1);
        // Standard put, not a transactional write.
        assert_eq!(tx.capacity().totals(), (0.0, 1.0));

        let mut again = Transaction::new().put(LogicalTable::Users, user("u1"), create_once());
        let err = again
            .execute(&Context::background(), &store, &resolver)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ConditionalCheckFailed { .. }));
    }

    #[tokio::test]
    async fn test_single_condition_check_reads() {
        let (store, resolver) = setup().await;
        let check = Expression::condition_only(Condition::exists("user_id"));
        let mut tx =
            Transaction::new().condition_check(LogicalTable::Users, user("u1"), check.clone());
        let err = tx
            .execute(&Context::background(), &store, &resolver)
            .await
            .unwrap_err();
        assert!(err.is_conditional_failure());

        store.put_item("tx-users-test", &user("u1"), None).await.unwrap();
        let mut tx = Transaction::new().condition_check(LogicalTable::Users, user("u1"), check);
        assert!(tx
            .execute(&Context::background(), &store, &resolver)
            .await
            .unwrap()
            .is_committed());
    }

    #[tokio::test]
    async fn test_multi_leg_failure_names_leg() {
        let (store, resolver) = setup().await;
        store.put_item("tx-users-test", &user("u2"), None).await.unwrap();

        let mut tx = Transaction::new()
            .put(LogicalTable::Users, user("u1"), create_once())
            .put(LogicalTable::Users, user("u2"), create_once());
        let err = tx
            .execute(&Context::background(), &store, &resolver)
            .await
            .unwrap_err();
        assert_eq!(err.failed_leg(), Some(1));
        assert_eq!(store.item_count("tx-users-test"), 1);
    }

    #[tokio::test]
    async fn test_unresolved_table_fails_before_any_call() {
        let (store, _) = setup().await;
        let mut resolver = TableResolver::new();
        resolver
            .set_table(LogicalTable::Users, "tx-users-test")
            .unwrap();

        let mut tx = Transaction::new()
            .put(LogicalTable::Users, user("u1"), None)
            .put(
                LogicalTable::Credentials,
                Index::primary("credential_id", "c1").key(),
                None,
            )
            .precondition(Arc::new(DoesNotExist::new(
                LogicalTable::Users,
                user("u1"),
                "user_id",
            )));
        let calls = store.call_count();
        let err = tx
            .execute(&Context::background(), &store, &resolver)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unresolved(_)));
        assert_eq!(store.call_count(), calls);
        assert!(tx.resolved().is_none());
    }

    #[tokio::test]
    async fn test_precondition_failure_writes_nothing() {
        let (store, resolver) = setup().await;
        store.put_item("tx-users-test", &user("u1"), None).await.unwrap();

        let mut tx = Transaction::new()
            .update(
                LogicalTable::Users,
                user("u1"),
                ExpressionBuilder::new().assign("flag", true).build(),
            )
            .precondition(Arc::new(DoesNotExist::new(
                LogicalTable::Users,
                user("u1"),
                "user_id",
            )));
        let outcome = tx
            .execute(&Context::background(), &store, &resolver)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            TransactionOutcome::PreconditionFailed {
                precondition: "DoesNotExist".into()
            }
        );
        let stored = store
            .get_item("tx-users-test", &user("u1"), true)
            .await
            .unwrap()
            .item
            .unwrap();
        assert!(!stored.contains_key("flag"));
    }

    #[tokio::test]
    async fn test_combine_chunks_in_order() {
        let sources: Vec<Transaction> = (0..3)
            .map(|batch| {
                (0..20).fold(Transaction::new(), |tx, i| {
                    tx.put(
                        LogicalTable::Users,
                        user(&format!("u{}", batch * 20 + i)),
                        None,
                    )
                })
            })
            .collect();
        let expected: Vec<Write> = sources.iter().flat_map(|tx| tx.writes().to_vec()).collect();

        let chunks = combine(sources);
        assert_eq!(chunks.len(), 60usize.div_ceil(MAX_TRANSACTION_ITEMS));
        assert!(chunks.iter().all(|c| c.len() <= MAX_TRANSACTION_ITEMS));
        let merged: Vec<Write> = chunks.iter().flat_map(|c| c.writes().to_vec()).collect();
        assert_eq!(merged, expected);
    }

    #[tokio::test]
    async fn test_combine_carries_preconditions_per_chunk() {
        let guard: Arc<dyn Precondition> = Arc::new(DoesNotExist::new(
            LogicalTable::Users,
            user("u0"),
            "user_id",
        ));
        let big = (0..30).fold(Transaction::new().precondition(guard.clone()), |tx, i| {
            tx.put(LogicalTable::Users, user(&format!("a{i}")), None)
        });
        let small = Transaction::new().put(LogicalTable::Users, user("b0"), None);

        let chunks = combine(vec![big, small]);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].preconditions().len(), 1);
        // Second chunk holds the tail of `big` and all of `small`.
        assert_eq!(chunks[1].len(), 6);
        assert_eq!(chunks[1].preconditions().len(), 1);
        assert!(Arc::ptr_eq(&chunks[1].preconditions()[0], &guard));
    }

    #[tokio::test]
    async fn test_combined_chunks_execute() {
        let (store, resolver) = setup().await;
        let tx = (0..40).fold(Transaction::new(), |tx, i| {
            tx.put(LogicalTable::Users, user(&format!("u{i}")), create_once())
        });
        let mut chunks = combine(vec![tx]);
        let outcomes = execute_all(&Context::background(), &store, &resolver, &mut chunks)
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(store.item_count("tx-users-test"), 40);
        // Both chunks share one accumulator: 40 transactional writes at two units each.
        assert_eq!(chunks[0].capacity().totals(), (0.0, 80.0));
    }

    #[tokio::test]
    async fn test_oversized_transaction_is_rejected() {
        let (store, resolver) = setup().await;
        let mut tx = (0..26).fold(Transaction::new(), |tx, i| {
            tx.put(LogicalTable::Users, user(&format!("u{i}")), None)
        });
        let err = tx
            .execute(&Context::background(), &store, &resolver)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_read_transaction() {
        let (store, resolver) = setup().await;
        store.put_item("tx-users-test", &user("u1"), None).await.unwrap();

        let read = ReadTransaction::new()
            .get(LogicalTable::Users, user("u1"))
            .get(
                LogicalTable::Credentials,
                Index::primary("credential_id", "missing").key(),
            );
        let items = read
            .execute(&Context::background(), &store, &resolver)
            .await
            .unwrap();
        assert_eq!(items, vec![Some(user("u1")), None]);
        assert_eq!(read.capacity().totals(), (4.0, 0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_context_makes_no_call() {
        let (store, resolver) = setup().await;
        let ctx = Context::with_timeout(Duration::from_millis(10));
        tokio::time::advance(Duration::from_millis(20)).await;

        let mut tx = Transaction::new().put(
            LogicalTable::Users,
            user("u1"),
            Some(Expression::condition_only(Condition::not_exists("user_id"))),
        );
        let calls = store.call_count();
        let err = tx.execute(&ctx, &store, &resolver).await.unwrap_err();
        assert!(matches!(err, StoreError::Cancelled(_)));
        assert_eq!(store.call_count(), calls);
        assert_eq!(
            store.item_count("tx-users-test"),
            0,
            "abandoned write must not be applied"
        );
    }
}
