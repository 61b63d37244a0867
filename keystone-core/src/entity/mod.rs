//! Persisted entities.
//!
//! Each entity describes its own keys, item encoding and deployed table shape through
//! [`Indexable`]. Attribute names are associated constants on the entity, so update
//! expressions and conditions are built from typed paths rather than string literals
//! scattered through the lifecycle code.

mod ceremony;
mod credential;
mod user;

pub use ceremony::{Ceremony, CeremonyState, CeremonyType, ChallengeId, CHALLENGE_BYTES};
pub use credential::Credential;
pub use user::User;

use crate::attr::Item;
use crate::expr::{Condition, Expression};
use crate::index::{Index, TableDescription};
use crate::resolver::LogicalTable;
use crate::store::{StoreError, Write, WriteKind};

mod sealed {
    pub trait Sealed {}

    impl Sealed for super::Ceremony {}
    impl Sealed for super::Credential {}
    impl Sealed for super::User {}
}

/// Keys, encoding and schema of a persisted entity.
///
/// Implemented only by [`Ceremony`], [`Credential`] and [`User`].
pub trait Indexable: sealed::Sealed + Sized {
    const TABLE: LogicalTable;

    /// Name of the primary hash key attribute.
    const HASH_KEY: &'static str;

    fn primary_index(&self) -> Index;

    fn secondary_indexes(&self) -> Vec<Index> {
        Vec::new()
    }

    fn to_item(&self) -> Item;

    fn from_item(item: &Item) -> Result<Self, StoreError>;

    /// Deployed shape of this entity's table under the given concrete name.
    fn table_description(table_name: &str) -> TableDescription;

    /// Indexes with placeholder values of the right key types, for drift checks
    /// without a live entity.
    fn schema_indexes() -> Vec<Index>;

    fn key(&self) -> Item {
        self.primary_index().key()
    }

    /// Put leg that only succeeds if no item with this key exists yet.
    fn put_once(&self) -> Write {
        Write {
            table: Self::TABLE,
            kind: WriteKind::Put {
                item: self.to_item(),
                condition: Some(Expression::condition_only(Condition::not_exists(
                    Self::HASH_KEY,
                ))),
            },
        }
    }

    /// Compare every index of this entity against a deployed table.
    fn check_schema(deployed: &TableDescription) -> Result<(), Vec<String>> {
        let reasons: Vec<String> = Self::schema_indexes()
            .iter()
            .filter_map(|index| deployed.check_index(index).err())
            .collect();
        if reasons.is_empty() {
            Ok(())
        } else {
            Err(reasons)
        }
    }
}
