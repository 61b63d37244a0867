//! Logical → concrete table resolution.
//!
//! Entities address tables by [`LogicalTable`]. The deployment decides the concrete
//! names, either from a `{prefix}-{logical}-{environment}` convention or explicit
//! overrides. A transaction referencing a table that does not resolve fails before any
//! store call.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::store::StoreError;

/// The fixed set of logical tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LogicalTable {
    Ceremonies,
    Credentials,
    Users,
}

impl LogicalTable {
    pub const ALL: [LogicalTable; 3] = [Self::Ceremonies, Self::Credentials, Self::Users];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ceremonies => "ceremonies",
            Self::Credentials => "credentials",
            Self::Users => "users",
        }
    }

    /// Environment variable holding an explicit concrete name for this table.
    pub fn env_var(&self) -> &'static str {
        match self {
            Self::Ceremonies => "KEYSTONE_TABLE_CEREMONIES",
            Self::Credentials => "KEYSTONE_TABLE_CREDENTIALS",
            Self::Users => "KEYSTONE_TABLE_USERS",
        }
    }
}

impl fmt::Display for LogicalTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct TableResolver {
    tables: HashMap<LogicalTable, String>,
    overridden: HashSet<LogicalTable>,
}

impl TableResolver {
    /// An empty resolver; nothing resolves until tables are set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every logical table as `{prefix}-{logical}-{environment}`.
    pub fn with_naming(prefix: &str, environment: &str) -> Self {
        let tables = LogicalTable::ALL
            .iter()
            .map(|table| (*table, format!("{prefix}-{}-{environment}", table.as_str())))
            .collect();
        Self {
            tables,
            overridden: HashSet::new(),
        }
    }

    /// Naming convention from `KEYSTONE_TABLE_PREFIX` / `KEYSTONE_ENVIRONMENT`, then
    /// per-table overrides from `KEYSTONE_TABLE_*`.
    pub fn from_env() -> Result<Self, StoreError> {
        let prefix = std::env::var("KEYSTONE_TABLE_PREFIX").unwrap_or_else(|_| "keystone".into());
        let environment =
            std::env::var("KEYSTONE_ENVIRONMENT").unwrap_or_else(|_| "dev".into());
        let mut resolver = Self::with_naming(&prefix, &environment);
        for table in LogicalTable::ALL {
            if let Ok(name) = std::env::var(table.env_var()) {
                if !name.trim().is_empty() {
                    resolver.set_table(table, name.trim())?;
                }
            }
        }
        Ok(resolver)
    }

    /// Override the concrete name of a logical table. Allowed once per table.
    pub fn set_table(&mut self, table: LogicalTable, name: &str) -> Result<(), StoreError> {
        if name.is_empty() {
            return Err(StoreError::Unresolved(format!(
                "empty table name for {table}"
            )));
        }
        if self.overridden.contains(&table) {
            return Err(StoreError::Validation(format!(
                "table {table} already overridden as {}",
                self.tables.get(&table).map(String::as_str).unwrap_or("")
            )));
        }
        tracing::debug!(logical = %table, concrete = %name, "Table override");
        self.tables.insert(table, name.to_string());
        self.overridden.insert(table);
        Ok(())
    }

    pub fn resolve(&self, table: LogicalTable) -> Option<&str> {
        self.tables.get(&table).map(String::as_str)
    }

    /// Resolve or fail closed.
    pub fn require(&self, table: LogicalTable) -> Result<&str, StoreError> {
        self.resolve(table)
            .ok_or_else(|| StoreError::Unresolved(table.to_string()))
    }

    /// True once every logical table resolves.
    pub fn is_initialized(&self) -> bool {
        LogicalTable::ALL
            .iter()
            .all(|table| self.tables.contains_key(table))
    }

    /// Logical tables that do not resolve yet.
    pub fn unresolved(&self) -> Vec<LogicalTable> {
        LogicalTable::ALL
            .into_iter()
            .filter(|table| !self.tables.contains_key(table))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_naming_convention() {
        let resolver = TableResolver::with_naming("passkey", "prod");
        assert_eq!(
            resolver.resolve(LogicalTable::Credentials),
            Some("passkey-credentials-prod")
        );
        assert!(resolver.is_initialized());
    }

    #[test]
    fn test_empty_resolver_fails_closed() {
        let resolver = TableResolver::new();
        assert!(!resolver.is_initialized());
        assert!(matches!(
            resolver.require(LogicalTable::Users),
            Err(StoreError::Unresolved(_))
        ));
        assert_eq!(resolver.unresolved().len(), 3);
    }

    #[test]
    fn test_override_only_once() {
        let mut resolver = TableResolver::with_naming("keystone", "dev");
        resolver
            .set_table(LogicalTable::Users, "shared-users")
            .unwrap();
        assert_eq!(resolver.resolve(LogicalTable::Users), Some("shared-users"));
        assert!(resolver
            .set_table(LogicalTable::Users, "other-users")
            .is_err());
        assert_eq!(resolver.resolve(LogicalTable::Users), Some("shared-users"));
    }

    #[test]
    fn test_partial_resolver_is_not_initialized() {
        let mut resolver = TableResolver::new();
        resolver
            .set_table(LogicalTable::Ceremonies, "c")
            .unwrap();
        assert!(!resolver.is_initialized());
        assert_eq!(
            resolver.unresolved(),
            vec![LogicalTable::Credentials, LogicalTable::Users]
        );
    }
}
