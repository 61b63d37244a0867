use crate::attr::{AttributeValue, Item, ItemReader, ScalarType};
use crate::index::{AttributeDefinition, Index, KeySchema, SecondaryIndexDescription, TableDescription};
use crate::resolver::LogicalTable;
use crate::store::StoreError;

use super::Indexable;

/// A registered public-key credential.
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub credential_id: String,
    pub owner_id: String,
    /// Verifier-owned key material, stored opaquely.
    pub public_key: Vec<u8>,
    pub sign_count: u32,
    pub clone_warning: bool,
    pub attestation_type: String,
    pub created_at: i64,
    pub updated_at: i64,
    /// Counters already applied, newest last.
    pub sign_history: Vec<u32>,
}

impl Credential {
    pub const CREDENTIAL_ID: &'static str = "credential_id";
    pub const OWNER_ID: &'static str = "owner_id";
    pub const PUBLIC_KEY: &'static str = "public_key";
    pub const SIGN_COUNT: &'static str = "sign_count";
    pub const CLONE_WARNING: &'static str = "clone_warning";
    pub const ATTESTATION_TYPE: &'static str = "attestation_type";
    pub const CREATED_AT: &'static str = "created_at";
    pub const UPDATED_AT: &'static str = "updated_at";
    pub const SIGN_HISTORY: &'static str = "sign_history";

    pub const OWNER_INDEX: &'static str = "owner-index";

    pub fn new(
        credential_id: impl Into<String>,
        owner_id: impl Into<String>,
        public_key: Vec<u8>,
        attestation_type: impl Into<String>,
        now: i64,
    ) -> Self {
        Self {
            credential_id: credential_id.into(),
            owner_id: owner_id.into(),
            public_key,
            sign_count: 0,
            clone_warning: false,
            attestation_type: attestation_type.into(),
            created_at: now,
            updated_at: now,
            sign_history: Vec::new(),
        }
    }

    /// Authenticators without counters report 0 forever.
    pub fn supports_counter(&self) -> bool {
        self.sign_count > 0
    }
}

impl Indexable for Credential {
    const TABLE: LogicalTable = LogicalTable::Credentials;
    const HASH_KEY: &'static str = Self::CREDENTIAL_ID;

    fn primary_index(&self) -> Index {
        Index::primary(Self::CREDENTIAL_ID, self.credential_id.as_str())
    }

    fn secondary_indexes(&self) -> Vec<Index> {
        vec![Index::secondary(
            Self::OWNER_INDEX,
            Self::OWNER_ID,
            self.owner_id.as_str(),
        )]
    }

    fn to_item(&self) -> Item {
        let mut item = Item::new();
        item.insert(Self::CREDENTIAL_ID.into(), self.credential_id.as_str().into());
        item.insert(Self::OWNER_ID.into(), self.owner_id.as_str().into());
        item.insert(Self::PUBLIC_KEY.into(), self.public_key.clone().into());
        item.insert(Self::SIGN_COUNT.into(), self.sign_count.into());
        item.insert(Self::CLONE_WARNING.into(), self.clone_warning.into());
        item.insert(
            Self::ATTESTATION_TYPE.into(),
            self.attestation_type.as_str().into(),
        );
        item.insert(Self::CREATED_AT.into(), self.created_at.into());
        item.insert(Self::UPDATED_AT.into(), self.updated_at.into());
        item.insert(
            Self::SIGN_HISTORY.into(),
            AttributeValue::L(
                self.sign_history
                    .iter()
                    .map(|n| AttributeValue::from(*n))
                    .collect(),
            ),
        );
        item
    }

    fn from_item(item: &Item) -> Result<Self, StoreError> {
        let reader = ItemReader::new(item, "credential");
        let sign_history = reader
            .number_list(Self::SIGN_HISTORY)
            .into_iter()
            .filter_map(|n| u32::try_from(n).ok())
            .collect();
        Ok(Self {
            credential_id: reader.string(Self::CREDENTIAL_ID)?,
            owner_id: reader.string(Self::OWNER_ID)?,
            public_key: reader.bytes(Self::PUBLIC_KEY)?,
            sign_count: reader.u32(Self::SIGN_COUNT)?,
            clone_warning: reader.bool_or(Self::CLONE_WARNING, false),
            attestation_type: reader.string(Self::ATTESTATION_TYPE)?,
            created_at: reader.i64(Self::CREATED_AT)?,
            updated_at: reader.i64(Self::UPDATED_AT)?,
            sign_history,
        })
    }

    fn table_description(table_name: &str) -> TableDescription {
        TableDescription {
            table_name: table_name.to_string(),
            key_schema: KeySchema::hash(Self::CREDENTIAL_ID),
            attribute_definitions: vec![
                AttributeDefinition::new(Self::CREDENTIAL_ID, ScalarType::S),
                AttributeDefinition::new(Self::OWNER_ID, ScalarType::S),
            ],
            secondary_indexes: vec![SecondaryIndexDescription {
                index_name: Self::OWNER_INDEX.into(),
                key_schema: KeySchema::hash(Self::OWNER_ID),
            }],
            ttl_attribute: None,
        }
    }

    fn schema_indexes() -> Vec<Index> {
        vec![
            Index::primary(Self::CREDENTIAL_ID, AttributeValue::S(String::new())),
            Index::secondary(
                Self::OWNER_INDEX,
                Self::OWNER_ID,
                AttributeValue::S(String::new()),
            ),
        ]
    }
}
