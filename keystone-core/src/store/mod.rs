//! Document store abstraction.
//!
//! The engine needs a store with single-item conditional writes and multi-item atomic
//! transactions. Two backends are provided:
//!
//! - **Memory** (`MemoryStore`): tests and local development; every transaction runs
//!   under one lock.
//! - **PostgreSQL** (`PostgresStore`, feature `postgres`): documents in a JSONB table,
//!   each transaction in a SERIALIZABLE SQL transaction with row locks.
//!
//! Neither backend has a native expression engine, so both apply writes through
//! [`apply_write`], which evaluates conditions and updates with [`crate::expr::eval`].

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

use std::fmt;

use async_trait::async_trait;

use crate::attr::Item;
use crate::capacity::ConsumedCapacity;
use crate::expr::eval::{apply_update, condition_holds};
use crate::expr::Expression;
use crate::index::{Query, TableDescription};
use crate::resolver::LogicalTable;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Conditional check failed on table {table}")]
    ConditionalCheckFailed { table: String },

    #[error("Transaction canceled: {}", format_reasons(.reasons))]
    TransactionCanceled { reasons: Vec<CancellationReason> },

    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    #[error("Unresolved table: {0}")]
    Unresolved(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Throttled: {0}")]
    Throttled(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Database migration error: {0}")]
    Migration(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether the error is a condition failure (on any leg of a transaction).
    pub fn is_conditional_failure(&self) -> bool {
        match self {
            Self::ConditionalCheckFailed { .. } => true,
            Self::TransactionCanceled { reasons } => reasons
                .iter()
                .any(|r| *r == CancellationReason::ConditionalCheckFailed),
            _ => false,
        }
    }

    /// Whether the given transaction leg failed its condition.
    pub fn leg_failed(&self, leg: usize) -> bool {
        match self {
            Self::TransactionCanceled { reasons } => {
                reasons.get(leg) == Some(&CancellationReason::ConditionalCheckFailed)
            }
            _ => false,
        }
    }

    /// Index of the first transaction leg that failed its condition.
    pub fn failed_leg(&self) -> Option<usize> {
        match self {
            Self::TransactionCanceled { reasons } => reasons
                .iter()
                .position(|r| *r == CancellationReason::ConditionalCheckFailed),
            Self::ConditionalCheckFailed { .. } => Some(0),
            _ => None,
        }
    }
}

/// Per-leg outcome of a canceled transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationReason {
    None,
    ConditionalCheckFailed,
    ValidationError,
}

impl fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "None",
            Self::ConditionalCheckFailed => "ConditionalCheckFailed",
            Self::ValidationError => "ValidationError",
        })
    }
}

fn format_reasons(reasons: &[CancellationReason]) -> String {
    let rendered: Vec<String> = reasons.iter().map(ToString::to_string).collect();
    format!("[{}]", rendered.join(", "))
}

/// The body of a write leg.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteKind {
    Put {
        item: Item,
        condition: Option<Expression>,
    },
    Update {
        key: Item,
        expression: Expression,
    },
    Delete {
        key: Item,
        condition: Option<Expression>,
    },
    ConditionCheck {
        key: Item,
        condition: Expression,
    },
}

impl WriteKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Put { .. } => "Put",
            Self::Update { .. } => "Update",
            Self::Delete { .. } => "Delete",
            Self::ConditionCheck { .. } => "ConditionCheck",
        }
    }

    /// Condition guarding this leg, if any.
    pub fn condition(&self) -> Option<&Expression> {
        match self {
            Self::Put { condition, .. } | Self::Delete { condition, .. } => condition.as_ref(),
            Self::Update { expression, .. } => Some(expression),
            Self::ConditionCheck { condition, .. } => Some(condition),
        }
    }
}

/// A write leg addressed to a logical table.
#[derive(Debug, Clone, PartialEq)]
pub struct Write {
    pub table: LogicalTable,
    pub kind: WriteKind,
}

/// A write leg addressed to a concrete table, as handed to a store.
#[derive(Debug, Clone, PartialEq)]
pub struct TableWrite {
    pub table_name: String,
    pub kind: WriteKind,
}

/// A read leg of a transactional get.
#[derive(Debug, Clone, PartialEq)]
pub struct TableGet {
    pub table_name: String,
    pub key: Item,
}

#[derive(Debug, Clone, Default)]
pub struct GetOutput {
    pub item: Option<Item>,
    pub capacity: ConsumedCapacity,
}

#[derive(Debug, Clone, Default)]
pub struct WriteOutput {
    /// Item after the write (absent for deletes).
    pub attributes: Option<Item>,
    pub capacity: ConsumedCapacity,
}

#[derive(Debug, Clone, Default)]
pub struct TransactWriteOutput {
    pub capacity: Vec<ConsumedCapacity>,
}

#[derive(Debug, Clone, Default)]
pub struct TransactGetOutput {
    pub items: Vec<Option<Item>>,
    pub capacity: Vec<ConsumedCapacity>,
}

#[derive(Debug, Clone, Default)]
pub struct QueryOutput {
    pub items: Vec<Item>,
    pub capacity: ConsumedCapacity,
}

/// Maximum legs in one atomic transaction.
pub const MAX_TRANSACTION_ITEMS: usize = 25;

/// Store operations used by the engine.
///
/// Implementations must be thread-safe (`Send + Sync`). Single-item writes and
/// transactions return [`StoreError::ConditionalCheckFailed`] /
/// [`StoreError::TransactionCanceled`] when a condition does not hold.
#[async_trait]
pub trait Store: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    async fn create_table(&self, description: &TableDescription) -> Result<(), StoreError>;

    async fn describe_table(&self, table_name: &str) -> Result<TableDescription, StoreError>;

    async fn get_item(
        &self,
        table_name: &str,
        key: &Item,
        consistent: bool,
    ) -> Result<GetOutput, StoreError>;

    async fn query(&self, table_name: &str, query: &Query) -> Result<QueryOutput, StoreError>;

    async fn put_item(
        &self,
        table_name: &str,
        item: &Item,
        condition: Option<&Expression>,
    ) -> Result<WriteOutput, StoreError>;

    async fn update_item(
        &self,
        table_name: &str,
        key: &Item,
        expression: &Expression,
    ) -> Result<WriteOutput, StoreError>;

    async fn delete_item(
        &self,
        table_name: &str,
        key: &Item,
        condition: Option<&Expression>,
    ) -> Result<WriteOutput, StoreError>;

    /// Apply all writes atomically, or none.
    async fn transact_write(&self, writes: &[TableWrite])
        -> Result<TransactWriteOutput, StoreError>;

    /// Read several items from one consistent snapshot.
    async fn transact_get(&self, gets: &[TableGet]) -> Result<TransactGetOutput, StoreError>;

    async fn check_health(&self) -> Result<(), StoreError>;
}

/// What a write leg does to its item.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteEffect {
    Upsert(Item),
    Delete,
    Unchanged,
}

/// Compute the effect of a write against the item currently stored under its key.
///
/// Returns `Ok(None)` when the leg's condition does not hold.
pub fn apply_write(
    description: &TableDescription,
    current: Option<&Item>,
    kind: &WriteKind,
) -> Result<Option<WriteEffect>, StoreError> {
    if let Some(condition) = kind.condition().and_then(Expression::condition) {
        if !condition_holds(condition, current) {
            return Ok(None);
        }
    }
    let effect = match kind {
        WriteKind::Put { item, .. } => WriteEffect::Upsert(item.clone()),
        WriteKind::Update { key, expression } => {
            let mut item = match current {
                Some(existing) => existing.clone(),
                None => key.clone(),
            };
            apply_update(expression, &mut item)?;
            let new_key = description.key_of(&item).map_err(StoreError::Validation)?;
            if &new_key != key {
                return Err(StoreError::Validation(
                    "update expression cannot modify key attributes".to_string(),
                ));
            }
            WriteEffect::Upsert(item)
        }
        WriteKind::Delete { .. } => WriteEffect::Delete,
        WriteKind::ConditionCheck { .. } => WriteEffect::Unchanged,
    };
    Ok(Some(effect))
}

/// Key addressed by a write leg.
pub fn write_key(description: &TableDescription, kind: &WriteKind) -> Result<Item, StoreError> {
    match kind {
        WriteKind::Put { item, .. } => description.key_of(item).map_err(StoreError::Validation),
        WriteKind::Update { key, .. }
        | WriteKind::Delete { key, .. }
        | WriteKind::ConditionCheck { key, .. } => Ok(key.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::{AttributeValue, ScalarType};
    use crate::expr::{Condition, ExpressionBuilder};
    use crate::index::{AttributeDefinition, KeySchema};

    fn table() -> TableDescription {
        TableDescription {
            table_name: "t".into(),
            key_schema: KeySchema::hash("id"),
            attribute_definitions: vec![AttributeDefinition::new("id", ScalarType::S)],
            secondary_indexes: vec![],
            ttl_attribute: None,
        }
    }

    fn key(id: &str) -> Item {
        Item::from([("id".to_string(), AttributeValue::from(id))])
    }

    #[test]
    fn test_update_creates_item_from_key() {
        let kind = WriteKind::Update {
            key: key("a"),
            expression: ExpressionBuilder::new().assign("n", 1u32).build(),
        };
        let effect = apply_write(&table(), None, &kind).unwrap().unwrap();
        let WriteEffect::Upsert(item) = effect else {
            panic!("expected upsert");
        };
        assert_eq!(item["id"], AttributeValue::from("a"));
        assert_eq!(item["n"], AttributeValue::number(1));
    }

    #[test]
    fn test_failed_condition_yields_none() {
        let kind = WriteKind::Put {
            item: key("a"),
            condition: Some(Expression::condition_only(Condition::not_exists("id"))),
        };
        let existing = key("a");
        assert_eq!(apply_write(&table(), Some(&existing), &kind).unwrap(), None);
    }

    #[test]
    fn test_update_cannot_rewrite_key() {
        let kind = WriteKind::Update {
            key: key("a"),
            expression: ExpressionBuilder::new().assign("id", "b").build(),
        };
        assert!(matches!(
            apply_write(&table(), Some(&key("a")), &kind),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn test_failed_leg_index() {
        let err = StoreError::TransactionCanceled {
            reasons: vec![
                CancellationReason::None,
                CancellationReason::ConditionalCheckFailed,
            ],
        };
        assert!(err.is_conditional_failure());
        assert_eq!(err.failed_leg(), Some(1));
        assert!(err.leg_failed(1));
        assert!(!err.leg_failed(0));
        assert_eq!(
            err.to_string(),
            "Transaction canceled: [None, ConditionalCheckFailed]"
        );
    }
}
