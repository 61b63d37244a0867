//! Ceremony entity: a single-use, session-bound challenge.

use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};

use crate::attr::{AttributeValue, Item, ItemReader, ScalarType};
use crate::error::KeystoneError;
use crate::index::{AttributeDefinition, Index, KeySchema, SecondaryIndexDescription, TableDescription};
use crate::resolver::LogicalTable;
use crate::store::StoreError;

use super::Indexable;

/// Random bytes in a challenge.
pub const CHALLENGE_BYTES: usize = 32;

/// Unguessable ceremony identifier: 32 random bytes, base64url without padding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChallengeId(String);

impl ChallengeId {
    /// Fresh identifier from the OS random source.
    pub fn generate() -> Result<Self, KeystoneError> {
        let mut bytes = [0u8; CHALLENGE_BYTES];
        getrandom::fill(&mut bytes)
            .map_err(|e| KeystoneError::Internal(format!("random source failed: {e}")))?;
        Ok(Self(URL_SAFE_NO_PAD.encode(bytes)))
    }

    /// Parse a caller-supplied identifier, rejecting anything that could not have been
    /// issued by [`ChallengeId::generate`].
    pub fn parse(value: &str) -> Result<Self, String> {
        let bytes = URL_SAFE_NO_PAD
            .decode(value)
            .map_err(|_| "challenge is not base64url".to_string())?;
        if bytes.len() != CHALLENGE_BYTES {
            return Err(format!(
                "challenge must be {CHALLENGE_BYTES} bytes, got {}",
                bytes.len()
            ));
        }
        Ok(Self(value.to_string()))
    }

    /// Encode raw challenge bytes produced elsewhere (e.g. by a WebAuthn library).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, String> {
        if bytes.len() != CHALLENGE_BYTES {
            return Err(format!(
                "challenge must be {CHALLENGE_BYTES} bytes, got {}",
                bytes.len()
            ));
        }
        Ok(Self(URL_SAFE_NO_PAD.encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        URL_SAFE_NO_PAD.decode(&self.0).unwrap_or_default()
    }
}

impl fmt::Display for ChallengeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ChallengeId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ChallengeId> for String {
    fn from(id: ChallengeId) -> Self {
        id.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CeremonyType {
    /// Registration (WebAuthn `navigator.credentials.create`).
    Create,
    /// Assertion (WebAuthn `navigator.credentials.get`).
    Get,
}

impl CeremonyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Get => "get",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "create" => Some(Self::Create),
            "get" => Some(Self::Get),
            _ => None,
        }
    }
}

impl fmt::Display for CeremonyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state, derived from the stored fields at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CeremonyState {
    Created,
    Redeemed,
    Expired,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ceremony {
    pub challenge_id: ChallengeId,
    pub session_id: String,
    /// Credential an assertion ceremony is bound to.
    pub credential_id: Option<String>,
    pub ceremony_type: CeremonyType,
    /// Expiry, epoch seconds.
    pub ttl: i64,
    pub created_at: i64,
    /// Opaque verifier state (e.g. a serialized WebAuthn registration state).
    pub verifier_state: Option<serde_json::Value>,
    pub consumed: bool,
    pub redeemed_at: Option<i64>,
}

impl Ceremony {
    pub const CHALLENGE_ID: &'static str = "challenge_id";
    pub const SESSION_ID: &'static str = "session_id";
    pub const CREDENTIAL_ID: &'static str = "credential_id";
    pub const CEREMONY_TYPE: &'static str = "ceremony_type";
    pub const TTL: &'static str = "ttl";
    pub const CREATED_AT: &'static str = "created_at";
    pub const VERIFIER_STATE: &'static str = "verifier_state";
    pub const CONSUMED: &'static str = "consumed";
    pub const REDEEMED_AT: &'static str = "redeemed_at";

    pub const SESSION_INDEX: &'static str = "session-index";

    pub fn new(
        challenge_id: ChallengeId,
        session_id: impl Into<String>,
        ceremony_type: CeremonyType,
        now: i64,
        ttl_secs: i64,
    ) -> Self {
        Self {
            challenge_id,
            session_id: session_id.into(),
            credential_id: None,
            ceremony_type,
            ttl: now.saturating_add(ttl_secs),
            created_at: now,
            verifier_state: None,
            consumed: false,
            redeemed_at: None,
        }
    }

    pub fn with_credential(mut self, credential_id: impl Into<String>) -> Self {
        self.credential_id = Some(credential_id.into());
        self
    }

    pub fn with_verifier_state(mut self, state: serde_json::Value) -> Self {
        self.verifier_state = Some(state);
        self
    }

    /// TTL is re-checked here; store-side sweeping is never relied upon.
    pub fn is_expired(&self, now: i64) -> bool {
        self.ttl <= now
    }

    pub fn state_at(&self, now: i64) -> CeremonyState {
        if self.consumed {
            CeremonyState::Redeemed
        } else if self.is_expired(now) {
            CeremonyState::Expired
        } else {
            CeremonyState::Created
        }
    }
}

impl Indexable for Ceremony {
    const TABLE: LogicalTable = LogicalTable::Ceremonies;
    const HASH_KEY: &'static str = Self::CHALLENGE_ID;

    fn primary_index(&self) -> Index {
        Index::primary(Self::CHALLENGE_ID, self.challenge_id.as_str())
    }

    fn secondary_indexes(&self) -> Vec<Index> {
        vec![Index::secondary(
            Self::SESSION_INDEX,
            Self::SESSION_ID,
            self.session_id.as_str(),
        )]
    }

    fn to_item(&self) -> Item {
        let mut item = Item::new();
        item.insert(Self::CHALLENGE_ID.into(), self.challenge_id.as_str().into());
        item.insert(Self::SESSION_ID.into(), self.session_id.as_str().into());
        if let Some(credential_id) = &self.credential_id {
            item.insert(Self::CREDENTIAL_ID.into(), credential_id.as_str().into());
        }
        item.insert(Self::CEREMONY_TYPE.into(), self.ceremony_type.as_str().into());
        item.insert(Self::TTL.into(), self.ttl.into());
        item.insert(Self::CREATED_AT.into(), self.created_at.into());
        if let Some(state) = &self.verifier_state {
            item.insert(Self::VERIFIER_STATE.into(), state.to_string().into());
        }
        item.insert(Self::CONSUMED.into(), self.consumed.into());
        if let Some(redeemed_at) = self.redeemed_at {
            item.insert(Self::REDEEMED_AT.into(), redeemed_at.into());
        }
        item
    }

    fn from_item(item: &Item) -> Result<Self, StoreError> {
        let reader = ItemReader::new(item, "ceremony");
        let challenge_id =
            ChallengeId::parse(&reader.string(Self::CHALLENGE_ID)?).map_err(StoreError::Serialization)?;
        let ceremony_type = CeremonyType::parse(&reader.string(Self::CEREMONY_TYPE)?)
            .ok_or_else(|| StoreError::Serialization("ceremony: unknown ceremony_type".into()))?;
        let verifier_state = reader
            .opt_string(Self::VERIFIER_STATE)
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|e| StoreError::Serialization(format!("ceremony: verifier_state: {e}")))?;
        Ok(Self {
            challenge_id,
            session_id: reader.string(Self::SESSION_ID)?,
            credential_id: reader.opt_string(Self::CREDENTIAL_ID),
            ceremony_type,
            ttl: reader.i64(Self::TTL)?,
            created_at: reader.i64(Self::CREATED_AT)?,
            verifier_state,
            consumed: reader.bool_or(Self::CONSUMED, false),
            redeemed_at: reader.i64(Self::REDEEMED_AT).ok(),
        })
    }

    fn table_description(table_name: &str) -> TableDescription {
        TableDescription {
            table_name: table_name.to_string(),
            key_schema: KeySchema::hash(Self::CHALLENGE_ID),
            attribute_definitions: vec![
                AttributeDefinition::new(Self::CHALLENGE_ID, ScalarType::S),
                AttributeDefinition::new(Self::SESSION_ID, ScalarType::S),
            ],
            secondary_indexes: vec![SecondaryIndexDescription {
                index_name: Self::SESSION_INDEX.into(),
                key_schema: KeySchema::hash(Self::SESSION_ID),
            }],
            ttl_attribute: Some(Self::TTL.into()),
        }
    }

    fn schema_indexes() -> Vec<Index> {
        vec![
            Index::primary(Self::CHALLENGE_ID, AttributeValue::S(String::new())),
            Index::secondary(
                Self::SESSION_INDEX,
                Self::SESSION_ID,
                AttributeValue::S(String::new()),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_is_fixed_width_and_unique() {
        let a = ChallengeId::generate().unwrap();
        let b = ChallengeId::generate().unwrap();
        assert_eq!(a.as_str().len(), 43);
        assert_eq!(a.to_bytes().len(), CHALLENGE_BYTES);
        assert_ne!(a, b);
        assert_eq!(ChallengeId::parse(a.as_str()).unwrap(), a);
    }

    #[test]
    fn test_forged_challenge_is_rejected() {
        assert!(ChallengeId::parse("c2").is_err());
        assert!(ChallengeId::parse("not base64 at all!").is_err());
        let short = URL_SAFE_NO_PAD.encode([7u8; 16]);
        assert!(ChallengeId::parse(&short).is_err());
    }

    #[test]
    fn test_challenge_from_raw_bytes() {
        let id = ChallengeId::from_bytes(&[1u8; CHALLENGE_BYTES]).unwrap();
        assert_eq!(id.to_bytes(), vec![1u8; CHALLENGE_BYTES]);
        assert_eq!(ChallengeId::parse(id.as_str()).unwrap(), id);
        assert!(ChallengeId::from_bytes(&[1u8; 16]).is_err());
    }

    #[test]
    fn test_oversized_ttl_saturates() {
        let ceremony = Ceremony::new(
            ChallengeId::generate().unwrap(),
            "session",
            CeremonyType::Create,
            1_700_000_000,
            i64::MAX,
        );
        assert_eq!(ceremony.ttl, i64::MAX);
        assert!(!ceremony.is_expired(1_700_000_001));
        assert_eq!(ceremony.state_at(1_700_000_001), CeremonyState::Created);
    }

    #[test]
    fn test_item_encoding() {
        let ceremony = Ceremony::new(
            ChallengeId::generate().unwrap(),
            "s1",
            CeremonyType::Get,
            1_000,
            300,
        )
        .with_credential("cred-1")
        .with_verifier_state(serde_json::json!({"rp": "example.com"}));

        let item = ceremony.to_item();
        assert_eq!(item[Ceremony::TTL], AttributeValue::number(1_300));
        assert_eq!(item[Ceremony::CONSUMED], AttributeValue::Bool(false));
        assert_eq!(Ceremony::from_item(&item).unwrap(), ceremony);
    }

    #[test]
    fn test_state_transitions() {
        let mut ceremony = Ceremony::new(
            ChallengeId::generate().unwrap(),
            "s1",
            CeremonyType::Create,
            1_000,
            60,
        );
        assert_eq!(ceremony.state_at(1_059), CeremonyState::Created);
        assert_eq!(ceremony.state_at(1_060), CeremonyState::Expired);
        ceremony.consumed = true;
        assert_eq!(ceremony.state_at(1_000), CeremonyState::Redeemed);
    }
}
