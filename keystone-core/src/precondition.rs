//! Read-and-check preconditions.
//!
//! A precondition reads the store out of band and decides whether a transaction may run
//! at all. They complement the native conditions carried by the write legs: a failed
//! precondition is reported by name, so callers can tell a replayed counter apart from
//! any other conflict.

use std::fmt::Debug;

use async_trait::async_trait;

use crate::attr::Item;
use crate::context::Context;
use crate::expr::eval::get;
use crate::expr::FieldPath;
use crate::marker::Marker;
use crate::resolver::{LogicalTable, TableResolver};
use crate::store::{Store, StoreError};
use crate::transaction::Transaction;

#[async_trait]
pub trait Precondition: Send + Sync + Debug {
    /// Short name used in logs and in `PreconditionFailed` outcomes.
    fn name(&self) -> &str;

    /// `Ok(false)` means the transaction must not run.
    async fn check(
        &self,
        ctx: &Context,
        store: &dyn Store,
        resolver: &TableResolver,
        tx: &Transaction,
    ) -> Result<bool, StoreError>;
}

/// Passes iff the item, or the given field of it, is absent.
#[derive(Debug, Clone)]
pub struct DoesNotExist {
    pub table: LogicalTable,
    pub key: Item,
    pub field: FieldPath,
}

impl DoesNotExist {
    pub const NAME: &'static str = "DoesNotExist";

    pub fn new(table: LogicalTable, key: Item, field: impl Into<FieldPath>) -> Self {
        Self {
            table,
            key,
            field: field.into(),
        }
    }
}

#[async_trait]
impl Precondition for DoesNotExist {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn check(
        &self,
        ctx: &Context,
        store: &dyn Store,
        resolver: &TableResolver,
        tx: &Transaction,
    ) -> Result<bool, StoreError> {
        let item = read_current(ctx, store, resolver, tx, self.table, &self.key).await?;
        Ok(item
            .as_ref()
            .and_then(|item| get(item, &self.field))
            .is_none())
    }
}

/// Passes iff the item is absent or its marker field admits `marker`.
#[derive(Debug, Clone)]
pub struct LastModifier {
    pub table: LogicalTable,
    pub key: Item,
    pub field: FieldPath,
    pub marker: Marker,
}

impl LastModifier {
    pub const NAME: &'static str = "LastModifier";

    pub fn new(table: LogicalTable, key: Item, field: impl Into<FieldPath>, marker: Marker) -> Self {
        Self {
            table,
            key,
            field: field.into(),
            marker,
        }
    }
}

#[async_trait]
impl Precondition for LastModifier {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn check(
        &self,
        ctx: &Context,
        store: &dyn Store,
        resolver: &TableResolver,
        tx: &Transaction,
    ) -> Result<bool, StoreError> {
        let item = read_current(ctx, store, resolver, tx, self.table, &self.key).await?;
        let Some(item) = item else {
            return Ok(true);
        };
        let admitted = self.marker.admits(get(&item, &self.field));
        if !admitted {
            tracing::debug!(
                field = %self.field,
                marker = ?self.marker.at(),
                stored = ?get(&item, &self.field),
                "Marker rejected"
            );
        }
        Ok(admitted)
    }
}

/// Strongly consistent read feeding the transaction's capacity.
async fn read_current(
    ctx: &Context,
    store: &dyn Store,
    resolver: &TableResolver,
    tx: &Transaction,
    table: LogicalTable,
    key: &Item,
) -> Result<Option<Item>, StoreError> {
    let table_name = resolver.require(table)?;
    let output = ctx
        .run("precondition read", store.get_item(table_name, key, true))
        .await?;
    tx.capacity().add(&output.capacity);
    Ok(output.item)
}

/// Run every precondition of `tx` in order.
///
/// Returns the name of the first one that fails; errors stop the run immediately.
pub async fn check_preconditions(
    ctx: &Context,
    store: &dyn Store,
    resolver: &TableResolver,
    tx: &Transaction,
) -> Result<Option<String>, StoreError> {
    for precondition in tx.preconditions() {
        if !precondition.check(ctx, store, resolver, tx).await? {
            tracing::debug!(precondition = precondition.name(), "Precondition failed");
            return Ok(Some(precondition.name().to_string()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::attr::{AttributeValue, ScalarType};
    use crate::index::{AttributeDefinition, Index, KeySchema, TableDescription};
    use crate::store::MemoryStore;

    async fn setup() -> (MemoryStore, TableResolver) {
        let resolver = TableResolver::with_naming("test", "unit");
        let store = MemoryStore::new();
        store
            .create_table(&TableDescription {
                table_name: "test-credentials-unit".into(),
                key_schema: KeySchema::hash("credential_id"),
                attribute_definitions: vec![AttributeDefinition::new(
                    "credential_id",
                    ScalarType::S,
                )],
                secondary_indexes: vec![],
                ttl_attribute: None,
            })
            .await
            .unwrap();
        (store, resolver)
    }

    fn key() -> Item {
        Index::primary("credential_id", "cred-1").key()
    }

    async fn seed(store: &MemoryStore, sign_count: u32) {
        let mut item = key();
        item.insert("sign_count".into(), AttributeValue::number(sign_count));
        item.insert(
            "sign_history".into(),
            AttributeValue::L(vec![AttributeValue::number(sign_count)]),
        );
        store
            .put_item("test-credentials-unit", &item, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_does_not_exist() {
        let (store, resolver) = setup().await;
        let ctx = Context::background();
        let check = DoesNotExist::new(LogicalTable::Credentials, key(), "credential_id");
        let tx = Transaction::new();

        assert!(check.check(&ctx, &store, &resolver, &tx).await.unwrap());
        seed(&store, 0).await;
        assert!(!check.check(&ctx, &store, &resolver, &tx).await.unwrap());

        let missing_field = DoesNotExist::new(LogicalTable::Credentials, key(), "clone_warning");
        assert!(missing_field.check(&ctx, &store, &resolver, &tx).await.unwrap());
        assert!(tx.capacity().table("test-credentials-unit").is_some());
    }

    #[tokio::test]
    async fn test_last_modifier_scalar_and_list() {
        let (store, resolver) = setup().await;
        let ctx = Context::background();
        let tx = Transaction::new();
        seed(&store, 4).await;

        let newer = LastModifier::new(
            LogicalTable::Credentials,
            key(),
            "sign_count",
            Marker::scalar(5u32),
        );
        let replay = LastModifier::new(
            LogicalTable::Credentials,
            key(),
            "sign_count",
            Marker::scalar(4u32),
        );
        let seen = LastModifier::new(
            LogicalTable::Credentials,
            key(),
            "sign_history",
            Marker::list(4u32),
        );
        assert!(newer.check(&ctx, &store, &resolver, &tx).await.unwrap());
        assert!(!replay.check(&ctx, &store, &resolver, &tx).await.unwrap());
        assert!(!seen.check(&ctx, &store, &resolver, &tx).await.unwrap());
    }

    #[tokio::test]
    async fn test_check_preconditions_short_circuits() {
        let (store, resolver) = setup().await;
        let ctx = Context::background();
        seed(&store, 1).await;

        let tx = Transaction::new()
            .precondition(Arc::new(DoesNotExist::new(
                LogicalTable::Credentials,
                key(),
                "credential_id",
            )))
            .precondition(Arc::new(LastModifier::new(
                LogicalTable::Credentials,
                key(),
                "sign_count",
                Marker::scalar(2u32),
            )));
        let calls = store.call_count();
        let failed = check_preconditions(&ctx, &store, &resolver, &tx)
            .await
            .unwrap();
        assert_eq!(failed.as_deref(), Some("DoesNotExist"));
        assert_eq!(store.call_count(), calls + 1, "second check must not run");
    }

    #[tokio::test]
    async fn test_unresolved_table_is_an_error() {
        let (store, _) = setup().await;
        let check = DoesNotExist::new(LogicalTable::Credentials, key(), "credential_id");
        let err = check
            .check(
                &Context::background(),
                &store,
                &TableResolver::new(),
                &Transaction::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unresolved(_)));
    }
}
