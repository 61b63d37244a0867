//! Index model and schema-drift detection.
//!
//! An [`Index`] is an entity's view of one of its keys: key names paired with the
//! entity's values. Comparing it with a deployed [`TableDescription`] catches drift
//! between code and infrastructure (renamed keys, changed key types, missing
//! secondary indexes). Mismatches come back as readable reasons so the checks can run
//! inside test assertions or at process start.

use serde::{Deserialize, Serialize};

use crate::attr::{AttributeValue, Item, ScalarType};
use crate::expr::{Condition, Expression};

#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    pub hash_key: String,
    pub hash_value: AttributeValue,
    pub range_key: Option<String>,
    pub range_value: Option<AttributeValue>,
    /// `None` for the table's primary index.
    pub index_name: Option<String>,
}

impl Index {
    pub fn primary(hash_key: impl Into<String>, hash_value: impl Into<AttributeValue>) -> Self {
        Self {
            hash_key: hash_key.into(),
            hash_value: hash_value.into(),
            range_key: None,
            range_value: None,
            index_name: None,
        }
    }

    pub fn secondary(
        index_name: impl Into<String>,
        hash_key: impl Into<String>,
        hash_value: impl Into<AttributeValue>,
    ) -> Self {
        Self {
            index_name: Some(index_name.into()),
            ..Self::primary(hash_key, hash_value)
        }
    }

    pub fn with_range(
        mut self,
        range_key: impl Into<String>,
        range_value: impl Into<AttributeValue>,
    ) -> Self {
        self.range_key = Some(range_key.into());
        self.range_value = Some(range_value.into());
        self
    }

    pub fn is_primary(&self) -> bool {
        self.index_name.is_none()
    }

    /// Key attributes as an item, as used to address a single item.
    pub fn key(&self) -> Item {
        let mut key = Item::new();
        key.insert(self.hash_key.clone(), self.hash_value.clone());
        if let (Some(name), Some(value)) = (&self.range_key, &self.range_value) {
            key.insert(name.clone(), value.clone());
        }
        key
    }

    /// Compare against a deployed key schema and its attribute definitions.
    pub fn matches_key_schema(
        &self,
        schema: &KeySchema,
        attributes: &[AttributeDefinition],
    ) -> Result<(), String> {
        let label = self.index_name.as_deref().unwrap_or("primary index");
        if schema.hash_key != self.hash_key {
            return Err(format!(
                "{label}: hash key is '{}' in the deployed table but '{}' in code",
                schema.hash_key, self.hash_key
            ));
        }
        check_type(label, &self.hash_key, &self.hash_value, attributes)?;

        match (&schema.range_key, &self.range_key, &self.range_value) {
            (None, None, _) => Ok(()),
            (Some(deployed), Some(ours), Some(value)) if deployed == ours => {
                check_type(label, ours, value, attributes)
            }
            (Some(deployed), Some(ours), _) if deployed != ours => Err(format!(
                "{label}: range key is '{deployed}' in the deployed table but '{ours}' in code"
            )),
            (Some(deployed), None, _) => Err(format!(
                "{label}: deployed table has range key '{deployed}' that code does not set"
            )),
            (None, Some(ours), _) => Err(format!(
                "{label}: code sets range key '{ours}' that the deployed table does not have"
            )),
            (Some(_), Some(ours), None) => {
                Err(format!("{label}: range key '{ours}' has no value"))
            }
            _ => Ok(()),
        }
    }

    /// Compare against a deployed secondary index.
    pub fn matches_secondary_index(
        &self,
        deployed: &SecondaryIndexDescription,
        attributes: &[AttributeDefinition],
    ) -> Result<(), String> {
        match &self.index_name {
            Some(name) if *name == deployed.index_name => {
                self.matches_key_schema(&deployed.key_schema, attributes)
            }
            Some(name) => Err(format!(
                "index '{name}' compared against deployed index '{}'",
                deployed.index_name
            )),
            None => Err("primary index compared against a secondary index".to_string()),
        }
    }

    /// Key condition selecting this index's items.
    pub fn build_query(&self) -> Query {
        let condition = match (&self.range_key, &self.range_value) {
            (Some(range_key), Some(range_value)) => KeyCondition::HashAndRange {
                hash_key: self.hash_key.clone(),
                hash_value: self.hash_value.clone(),
                range_key: range_key.clone(),
                range_value: range_value.clone(),
            },
            _ => KeyCondition::Hash {
                hash_key: self.hash_key.clone(),
                hash_value: self.hash_value.clone(),
            },
        };
        Query {
            index_name: self.index_name.clone(),
            condition,
            limit: None,
        }
    }
}

fn check_type(
    label: &str,
    name: &str,
    value: &AttributeValue,
    attributes: &[AttributeDefinition],
) -> Result<(), String> {
    let ours = value
        .scalar_type()
        .ok_or_else(|| format!("{label}: key '{name}' holds non-scalar {}", value.type_name()))?;
    let deployed = attributes
        .iter()
        .find(|a| a.name == name)
        .ok_or_else(|| format!("{label}: key '{name}' has no deployed attribute definition"))?;
    if deployed.attr_type != ours {
        return Err(format!(
            "{label}: key '{name}' is {} in the deployed table but {ours} in code",
            deployed.attr_type
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySchema {
    pub hash_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_key: Option<String>,
}

impl KeySchema {
    pub fn hash(hash_key: impl Into<String>) -> Self {
        Self {
            hash_key: hash_key.into(),
            range_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub name: String,
    pub attr_type: ScalarType,
}

impl AttributeDefinition {
    pub fn new(name: impl Into<String>, attr_type: ScalarType) -> Self {
        Self {
            name: name.into(),
            attr_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryIndexDescription {
    pub index_name: String,
    pub key_schema: KeySchema,
}

/// Deployed table schema as reported by a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescription {
    pub table_name: String,
    pub key_schema: KeySchema,
    pub attribute_definitions: Vec<AttributeDefinition>,
    #[serde(default)]
    pub secondary_indexes: Vec<SecondaryIndexDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_attribute: Option<String>,
}

impl TableDescription {
    pub fn secondary_index(&self, name: &str) -> Option<&SecondaryIndexDescription> {
        self.secondary_indexes.iter().find(|i| i.index_name == name)
    }

    /// Key schema of the primary index or a named secondary index.
    pub fn key_schema_for(&self, index_name: Option<&str>) -> Option<&KeySchema> {
        match index_name {
            None => Some(&self.key_schema),
            Some(name) => self.secondary_index(name).map(|i| &i.key_schema),
        }
    }

    /// Check an entity index against this table, dispatching on primary/secondary.
    pub fn check_index(&self, index: &Index) -> Result<(), String> {
        match &index.index_name {
            None => index.matches_key_schema(&self.key_schema, &self.attribute_definitions),
            Some(name) => {
                let deployed = self.secondary_index(name).ok_or_else(|| {
                    format!("table '{}' has no secondary index '{name}'", self.table_name)
                })?;
                index.matches_secondary_index(deployed, &self.attribute_definitions)
            }
        }
    }

    /// Extract the primary key attributes of an item.
    pub fn key_of(&self, item: &Item) -> Result<Item, String> {
        let mut key = Item::new();
        let hash = item.get(&self.key_schema.hash_key).ok_or_else(|| {
            format!("item is missing hash key '{}'", self.key_schema.hash_key)
        })?;
        key.insert(self.key_schema.hash_key.clone(), hash.clone());
        if let Some(range_key) = &self.key_schema.range_key {
            let range = item
                .get(range_key)
                .ok_or_else(|| format!("item is missing range key '{range_key}'"))?;
            key.insert(range_key.clone(), range.clone());
        }
        Ok(key)
    }

    /// Canonical `(hash, range)` address of a key, validating its shape.
    pub fn address(&self, key: &Item) -> Result<(String, String), String> {
        let hash = key
            .get(&self.key_schema.hash_key)
            .and_then(AttributeValue::key_string)
            .ok_or_else(|| format!("key is missing hash key '{}'", self.key_schema.hash_key))?;
        let range = match &self.key_schema.range_key {
            Some(range_key) => key
                .get(range_key)
                .and_then(AttributeValue::key_string)
                .ok_or_else(|| format!("key is missing range key '{range_key}'"))?,
            None => String::new(),
        };
        let expected = 1 + usize::from(self.key_schema.range_key.is_some());
        if key.len() != expected {
            return Err(format!(
                "key has {} attributes, table '{}' expects {expected}",
                key.len(),
                self.table_name
            ));
        }
        Ok((hash, range))
    }
}

/// Hash-only or hash+range key condition.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyCondition {
    Hash {
        hash_key: String,
        hash_value: AttributeValue,
    },
    HashAndRange {
        hash_key: String,
        hash_value: AttributeValue,
        range_key: String,
        range_value: AttributeValue,
    },
}

/// Query descriptor built from an [`Index`].
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub index_name: Option<String>,
    pub condition: KeyCondition,
    pub limit: Option<usize>,
}

impl Query {
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn as_condition(&self) -> Condition {
        match &self.condition {
            KeyCondition::Hash {
                hash_key,
                hash_value,
            } => Condition::eq(hash_key.as_str(), hash_value.clone()),
            KeyCondition::HashAndRange {
                hash_key,
                hash_value,
                range_key,
                range_value,
            } => Condition::eq(hash_key.as_str(), hash_value.clone())
                .and(Condition::eq(range_key.as_str(), range_value.clone())),
        }
    }

    /// Native key-condition expression.
    pub fn key_condition_expression(&self) -> Expression {
        Expression::condition_only(self.as_condition())
    }
}
