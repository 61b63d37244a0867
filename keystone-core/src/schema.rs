//! Table bootstrap and schema-drift detection.

use crate::context::Context;
use crate::entity::{Ceremony, Credential, Indexable, User};
use crate::error::{KeystoneError, Result};
use crate::resolver::{LogicalTable, TableResolver};
use crate::store::{Store, StoreError};

fn description_for(
    table: LogicalTable,
    table_name: &str,
) -> crate::index::TableDescription {
    match table {
        LogicalTable::Ceremonies => Ceremony::table_description(table_name),
        LogicalTable::Credentials => Credential::table_description(table_name),
        LogicalTable::Users => User::table_description(table_name),
    }
}

/// Create every logical table, or validate it if it already exists.
pub async fn ensure_tables(
    ctx: &Context,
    store: &dyn Store,
    resolver: &TableResolver,
) -> Result<()> {
    for table in LogicalTable::ALL {
        let table_name = resolver.require(table)?;
        let description = description_for(table, table_name);
        ctx.run("create_table", store.create_table(&description))
            .await?;
        tracing::debug!(logical = %table, table = %table_name, "Table ensured");
    }
    Ok(())
}

/// Compare every entity's indexes with the deployed tables.
///
/// Returns one human-readable reason per mismatch; an empty list means no drift.
pub async fn verify_schema(
    ctx: &Context,
    store: &dyn Store,
    resolver: &TableResolver,
) -> Result<Vec<String>> {
    let mut reasons = Vec::new();
    for table in LogicalTable::ALL {
        let table_name = resolver.require(table)?;
        let deployed = match ctx
            .run("describe_table", store.describe_table(table_name))
            .await
        {
            Ok(deployed) => deployed,
            Err(StoreError::TableNotFound(_)) => {
                reasons.push(format!("{table}: table '{table_name}' does not exist"));
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        let checked = match table {
            LogicalTable::Ceremonies => Ceremony::check_schema(&deployed),
            LogicalTable::Credentials => Credential::check_schema(&deployed),
            LogicalTable::Users => User::check_schema(&deployed),
        };
        if let Err(found) = checked {
            reasons.extend(found.into_iter().map(|r| format!("{table}: {r}")));
        }
    }
    Ok(reasons)
}

/// [`verify_schema`], failing on any drift.
pub async fn require_schema(
    ctx: &Context,
    store: &dyn Store,
    resolver: &TableResolver,
) -> Result<()> {
    let reasons = verify_schema(ctx, store, resolver).await?;
    if reasons.is_empty() {
        return Ok(());
    }
    for reason in &reasons {
        tracing::error!(reason = %reason, "Schema drift");
    }
    Err(KeystoneError::Internal(format!(
        "schema drift detected: {}",
        reasons.join("; ")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::ScalarType;
    use crate::index::{AttributeDefinition, KeySchema, TableDescription};
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_ensure_then_verify_is_clean() {
        let store = MemoryStore::new();
        let resolver = TableResolver::with_naming("keystone", "test");
        let ctx = Context::background();
        ensure_tables(&ctx, &store, &resolver).await.unwrap();
        // Idempotent.
        ensure_tables(&ctx, &store, &resolver).await.unwrap();
        assert!(verify_schema(&ctx, &store, &resolver).await.unwrap().is_empty());
        require_schema(&ctx, &store, &resolver).await.unwrap();
    }

    #[tokio::test]
    async fn test_drift_is_reported_per_table() {
        let store = MemoryStore::new();
        let resolver = TableResolver::with_naming("keystone", "test");
        let ctx = Context::background();
        store
            .create_table(&TableDescription {
                table_name: "keystone-credentials-test".into(),
                key_schema: KeySchema::hash("credential_id"),
                attribute_definitions: vec![AttributeDefinition::new(
                    "credential_id",
                    ScalarType::B,
                )],
                secondary_indexes: vec![],
                ttl_attribute: None,
            })
            .await
            .unwrap();

        let reasons = verify_schema(&ctx, &store, &resolver).await.unwrap();
        assert!(reasons
            .iter()
            .any(|r| r.starts_with("ceremonies:") && r.contains("does not exist")));
        assert!(reasons
            .iter()
            .any(|r| r.starts_with("credentials:") && r.contains("is B in the deployed table")));
        assert!(reasons
            .iter()
            .any(|r| r.starts_with("credentials:") && r.contains("owner-index")));
        assert!(require_schema(&ctx, &store, &resolver).await.is_err());
    }

    #[tokio::test]
    async fn test_ensure_rejects_conflicting_table() {
        let store = MemoryStore::new();
        let resolver = TableResolver::with_naming("keystone", "test");
        store
            .create_table(&User::table_description("keystone-ceremonies-test"))
            .await
            .unwrap();
        assert!(ensure_tables(&Context::background(), &store, &resolver)
            .await
            .is_err());
    }
}
