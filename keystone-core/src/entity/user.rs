use crate::attr::{AttributeValue, Item, ItemReader, ScalarType};
use crate::index::{AttributeDefinition, Index, KeySchema, TableDescription};
use crate::resolver::LogicalTable;
use crate::store::StoreError;

use super::Indexable;

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub user_id: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub credential_ids: Vec<String>,
}

impl User {
    pub const USER_ID: &'static str = "user_id";
    pub const CREATED_AT: &'static str = "created_at";
    pub const UPDATED_AT: &'static str = "updated_at";
    pub const CREDENTIAL_IDS: &'static str = "credential_ids";

    pub fn new(user_id: impl Into<String>, now: i64) -> Self {
        Self {
            user_id: user_id.into(),
            created_at: now,
            updated_at: now,
            credential_ids: Vec::new(),
        }
    }

    /// Random v4 user identifier.
    pub fn generate_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

impl Indexable for User {
    const TABLE: LogicalTable = LogicalTable::Users;
    const HASH_KEY: &'static str = Self::USER_ID;

    fn primary_index(&self) -> Index {
        Index::primary(Self::USER_ID, self.user_id.as_str())
    }

    fn to_item(&self) -> Item {
        let mut item = Item::new();
        item.insert(Self::USER_ID.into(), self.user_id.as_str().into());
        item.insert(Self::CREATED_AT.into(), self.created_at.into());
        item.insert(Self::UPDATED_AT.into(), self.updated_at.into());
        item.insert(
            Self::CREDENTIAL_IDS.into(),
            AttributeValue::L(
                self.credential_ids
                    .iter()
                    .map(|id| AttributeValue::from(id.as_str()))
                    .collect(),
            ),
        );
        item
    }

    fn from_item(item: &Item) -> Result<Self, StoreError> {
        let reader = ItemReader::new(item, "user");
        Ok(Self {
            user_id: reader.string(Self::USER_ID)?,
            created_at: reader.i64(Self::CREATED_AT)?,
            updated_at: reader.i64(Self::UPDATED_AT)?,
            credential_ids: reader.string_list(Self::CREDENTIAL_IDS),
        })
    }

    fn table_description(table_name: &str) -> TableDescription {
        TableDescription {
            table_name: table_name.to_string(),
            key_schema: KeySchema::hash(Self::USER_ID),
            attribute_definitions: vec![AttributeDefinition::new(Self::USER_ID, ScalarType::S)],
            secondary_indexes: vec![],
            ttl_attribute: None,
        }
    }

    fn schema_indexes() -> Vec<Index> {
        vec![Index::primary(Self::USER_ID, AttributeValue::S(String::new()))]
    }
}
