use std::sync::Arc;

use crate::capacity::CapacityAccumulator;
use crate::context::Context;
use crate::entity::{Ceremony, CeremonyState, CeremonyType, ChallengeId, Credential, Indexable};
use crate::error::{KeystoneError, Result};
use crate::expr::{Condition, ExpressionBuilder};
use crate::index::Index;
use crate::precondition::DoesNotExist;
use crate::resolver::LogicalTable;
use crate::store::{Write, WriteKind};
use crate::transaction::{ReadTransaction, Transaction, TransactionOutcome};

use super::{require_non_empty, Lifecycle};

/// Parameters of a new ceremony.
#[derive(Debug, Clone, PartialEq)]
pub struct InitRequest {
    pub session_id: String,
    pub ceremony_type: CeremonyType,
    /// Required for assertion ceremonies, forbidden for registration ones.
    pub credential_id: Option<String>,
    pub verifier_state: Option<serde_json::Value>,
    /// Challenge chosen by the verifier; a fresh one is generated when absent.
    pub challenge_id: Option<ChallengeId>,
}

impl InitRequest {
    pub fn create(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ceremony_type: CeremonyType::Create,
            credential_id: None,
            verifier_state: None,
            challenge_id: None,
        }
    }

    pub fn get(session_id: impl Into<String>, credential_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ceremony_type: CeremonyType::Get,
            credential_id: Some(credential_id.into()),
            verifier_state: None,
            challenge_id: None,
        }
    }

    pub fn with_verifier_state(mut self, state: serde_json::Value) -> Self {
        self.verifier_state = Some(state);
        self
    }

    pub fn with_challenge(mut self, challenge_id: ChallengeId) -> Self {
        self.challenge_id = Some(challenge_id);
        self
    }
}

impl Lifecycle {
    /// Issue a fresh ceremony bound to a session.
    pub async fn init_ceremony(
        &self,
        ctx: &Context,
        capacity: &CapacityAccumulator,
        request: InitRequest,
    ) -> Result<Ceremony> {
        require_non_empty("session id", &request.session_id)?;
        match (request.ceremony_type, request.credential_id.as_deref()) {
            (CeremonyType::Get, None) => {
                return Err(KeystoneError::invalid_input(
                    "assertion ceremonies require a credential id",
                ))
            }
            (CeremonyType::Create, Some(_)) => {
                return Err(KeystoneError::invalid_input(
                    "registration ceremonies cannot be bound to a credential",
                ))
            }
            (CeremonyType::Get, Some(credential_id)) => {
                require_non_empty("credential id", credential_id)?;
                self.get_credential(ctx, capacity, credential_id).await?;
            }
            (CeremonyType::Create, None) => {}
        }

        let now = self.now();
        let ttl_secs = i64::try_from(self.ceremony_ttl.as_secs()).unwrap_or(i64::MAX);
        let challenge_id = match request.challenge_id {
            Some(challenge_id) => challenge_id,
            None => ChallengeId::generate()?,
        };
        let mut ceremony = Ceremony::new(
            challenge_id,
            request.session_id,
            request.ceremony_type,
            now,
            ttl_secs,
        );
        ceremony.credential_id = request.credential_id;
        ceremony.verifier_state = request.verifier_state;

        let mut tx = Transaction::with_capacity(capacity.clone())
            .write(ceremony.put_once())
            .precondition(Arc::new(DoesNotExist::new(
                LogicalTable::Ceremonies,
                ceremony.key(),
                Ceremony::CHALLENGE_ID,
            )));
        match tx.execute(ctx, self.store(), self.resolver()).await? {
            TransactionOutcome::Committed(_) => {}
            TransactionOutcome::PreconditionFailed { .. } => {
                return Err(KeystoneError::conflict("challenge id already issued"));
            }
        }

        tracing::debug!(
            challenge_id = %ceremony.challenge_id,
            session_id = %ceremony.session_id,
            ceremony_type = %ceremony.ceremony_type,
            ttl = ceremony.ttl,
            "Ceremony created"
        );
        Ok(ceremony)
    }

    /// Read a ceremony by challenge, without redeeming it.
    pub async fn get_ceremony(
        &self,
        ctx: &Context,
        capacity: &CapacityAccumulator,
        challenge: &str,
    ) -> Result<Ceremony> {
        let challenge_id = parse_challenge(challenge)?;
        let items = ReadTransaction::with_capacity(capacity.clone())
            .get(LogicalTable::Ceremonies, ceremony_key(&challenge_id))
            .execute(ctx, self.store(), self.resolver())
            .await?;
        let item = items
            .into_iter()
            .next()
            .flatten()
            .ok_or_else(|| KeystoneError::not_found("ceremony not found"))?;
        Ok(Ceremony::from_item(&item)?)
    }

    /// Ceremonies of a session that can still be redeemed, through the session index.
    pub async fn list_session_ceremonies(
        &self,
        ctx: &Context,
        capacity: &CapacityAccumulator,
        session_id: &str,
    ) -> Result<Vec<Ceremony>> {
        require_non_empty("session id", session_id)?;
        let table = self.resolver().require(LogicalTable::Ceremonies)?;
        let query =
            Index::secondary(Ceremony::SESSION_INDEX, Ceremony::SESSION_ID, session_id).build_query();
        let output = ctx.run("query", self.store().query(table, &query)).await?;
        capacity.add(&output.capacity);

        let now = self.now();
        let mut pending = Vec::new();
        for item in &output.items {
            let ceremony = Ceremony::from_item(item)?;
            if ceremony.state_at(now) == CeremonyState::Created {
                pending.push(ceremony);
            }
        }
        Ok(pending)
    }

    /// Transactionally read a ceremony (and the credential an assertion is bound to)
    /// and check it may be redeemed by this caller now.
    pub(crate) async fn open_ceremony(
        &self,
        ctx: &Context,
        capacity: &CapacityAccumulator,
        challenge: &str,
        session_id: &str,
        expected: CeremonyType,
        credential_id: Option<&str>,
    ) -> Result<(Ceremony, Option<Credential>)> {
        require_non_empty("session id", session_id)?;
        let challenge_id = parse_challenge(challenge)?;

        let mut read = ReadTransaction::with_capacity(capacity.clone())
            .get(LogicalTable::Ceremonies, ceremony_key(&challenge_id));
        if let Some(credential_id) = credential_id {
            require_non_empty("credential id", credential_id)?;
            read = read.get(
                LogicalTable::Credentials,
                Index::primary(Credential::CREDENTIAL_ID, credential_id).key(),
            );
        }
        let mut items = read
            .execute(ctx, self.store(), self.resolver())
            .await?
            .into_iter();

        let ceremony = items
            .next()
            .flatten()
            .ok_or_else(|| KeystoneError::not_found("ceremony not found"))?;
        let ceremony = Ceremony::from_item(&ceremony)?;

        match ceremony.state_at(self.now()) {
            CeremonyState::Created => {}
            CeremonyState::Redeemed => {
                return Err(KeystoneError::conflict("ceremony already redeemed"));
            }
            CeremonyState::Expired => {
                return Err(KeystoneError::Expired {
                    expired_at: ceremony.ttl,
                });
            }
        }
        if ceremony.ceremony_type != expected {
            return Err(KeystoneError::invalid_input(format!(
                "ceremony is a {} ceremony, not {expected}",
                ceremony.ceremony_type
            )));
        }
        if ceremony.session_id != session_id {
            return Err(KeystoneError::invalid_input(
                "ceremony is bound to a different session",
            ));
        }
        if ceremony.credential_id.as_deref() != credential_id {
            return Err(KeystoneError::invalid_input(
                "ceremony is bound to a different credential",
            ));
        }

        let credential = match credential_id {
            Some(id) => {
                let item = items
                    .next()
                    .flatten()
                    .ok_or_else(|| KeystoneError::not_found(format!("credential {id} not found")))?;
                Some(Credential::from_item(&item)?)
            }
            None => None,
        };
        Ok((ceremony, credential))
    }
}

/// Leg that redeems a ceremony exactly once, and only before its TTL.
pub(crate) fn consume(ceremony: &Ceremony, now: i64) -> Write {
    let expression = ExpressionBuilder::new()
        .assign(Ceremony::CONSUMED, true)
        .assign(Ceremony::REDEEMED_AT, now)
        .condition(Condition::exists(Ceremony::CHALLENGE_ID))
        .condition(Condition::eq(Ceremony::CONSUMED, false))
        .condition(Condition::gt(Ceremony::TTL, now))
        .build();
    Write {
        table: LogicalTable::Ceremonies,
        kind: WriteKind::Update {
            key: ceremony.key(),
            expression,
        },
    }
}

fn ceremony_key(challenge_id: &ChallengeId) -> crate::attr::Item {
    Index::primary(Ceremony::CHALLENGE_ID, challenge_id.as_str()).key()
}

/// A malformed challenge cannot name any issued ceremony.
fn parse_challenge(challenge: &str) -> Result<ChallengeId> {
    ChallengeId::parse(challenge).map_err(|reason| {
        tracing::debug!(reason = %reason, "Rejected malformed challenge");
        KeystoneError::not_found("ceremony not found")
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, Ordering};

    use super::*;
    use crate::schema::ensure_tables;
    use crate::store::MemoryStore;
    use crate::resolver::TableResolver;

    async fn lifecycle() -> (Lifecycle, Arc<AtomicI64>) {
        let store = Arc::new(MemoryStore::new());
        let resolver = Arc::new(TableResolver::with_naming("keystone", "test"));
        ensure_tables(&Context::background(), store.as_ref(), &resolver)
            .await
            .unwrap();
        let now = Arc::new(AtomicI64::new(1_000));
        let clock = now.clone();
        let lifecycle = Lifecycle::new(store, resolver)
            .with_clock(Arc::new(move || clock.load(Ordering::SeqCst)));
        (lifecycle, now)
    }

    #[tokio::test]
    async fn test_init_returns_fresh_challenges() {
        let (lifecycle, _) = lifecycle().await;
        let ctx = Context::background();
        let capacity = CapacityAccumulator::new();

        let a = lifecycle
            .init_ceremony(&ctx, &capacity, InitRequest::create("s1"))
            .await
            .unwrap();
        let b = lifecycle
            .init_ceremony(&ctx, &capacity, InitRequest::create("s1"))
            .await
            .unwrap();
        assert_ne!(a.challenge_id, b.challenge_id);
        assert_eq!(a.ttl, 1_300);
        assert!(!capacity.is_empty());

        let stored = lifecycle
            .get_ceremony(&ctx, &capacity, a.challenge_id.as_str())
            .await
            .unwrap();
        assert_eq!(stored, a);
    }

    #[tokio::test]
    async fn test_init_validates_request() {
        let (lifecycle, _) = lifecycle().await;
        let ctx = Context::background();
        let capacity = CapacityAccumulator::new();

        let err = lifecycle
            .init_ceremony(&ctx, &capacity, InitRequest::create("  "))
            .await
            .unwrap_err();
        assert!(matches!(err, KeystoneError::InvalidInput(_)));

        let mut bound_create = InitRequest::create("s1");
        bound_create.credential_id = Some("cred".into());
        assert!(matches!(
            lifecycle.init_ceremony(&ctx, &capacity, bound_create).await,
            Err(KeystoneError::InvalidInput(_))
        ));

        let unknown = lifecycle
            .init_ceremony(&ctx, &capacity, InitRequest::get("s1", "missing"))
            .await
            .unwrap_err();
        assert!(matches!(unknown, KeystoneError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_verifier_chosen_challenge_is_issued_once() {
        let (lifecycle, _) = lifecycle().await;
        let ctx = Context::background();
        let capacity = CapacityAccumulator::new();
        let challenge = ChallengeId::from_bytes(&[7u8; 32]).unwrap();

        let ceremony = lifecycle
            .init_ceremony(
                &ctx,
                &capacity,
                InitRequest::create("s1").with_challenge(challenge.clone()),
            )
            .await
            .unwrap();
        assert_eq!(ceremony.challenge_id, challenge);

        let err = lifecycle
            .init_ceremony(&ctx, &capacity, InitRequest::create("s2").with_challenge(challenge))
            .await
            .unwrap_err();
        assert!(matches!(err, KeystoneError::ConditionalCheckFailed(_)));
    }

    #[tokio::test]
    async fn test_session_lists_pending_ceremonies() {
        let (lifecycle, now) = lifecycle().await;
        let ctx = Context::background();
        let capacity = CapacityAccumulator::new();

        let early = lifecycle
            .init_ceremony(&ctx, &capacity, InitRequest::create("s1"))
            .await
            .unwrap();
        now.store(1_200, Ordering::SeqCst);
        let late = lifecycle
            .init_ceremony(&ctx, &capacity, InitRequest::create("s1"))
            .await
            .unwrap();
        lifecycle
            .init_ceremony(&ctx, &capacity, InitRequest::create("s2"))
            .await
            .unwrap();

        let pending = lifecycle
            .list_session_ceremonies(&ctx, &capacity, "s1")
            .await
            .unwrap();
        assert_eq!(pending.len(), 2);

        // The first ceremony's TTL passes; no sweep has run.
        now.store(early.ttl, Ordering::SeqCst);
        let pending = lifecycle
            .list_session_ceremonies(&ctx, &capacity, "s1")
            .await
            .unwrap();
        assert_eq!(pending, vec![late]);
    }

    #[tokio::test]
    async fn test_open_checks_binding_and_ttl() {
        let (lifecycle, now) = lifecycle().await;
        let ctx = Context::background();
        let capacity = CapacityAccumulator::new();
        let ceremony = lifecycle
            .init_ceremony(&ctx, &capacity, InitRequest::create("s1"))
            .await
            .unwrap();
        let challenge = ceremony.challenge_id.as_str();

        let wrong_session = lifecycle
            .open_ceremony(&ctx, &capacity, challenge, "s2", CeremonyType::Create, None)
            .await
            .unwrap_err();
        assert!(matches!(wrong_session, KeystoneError::InvalidInput(_)));

        let wrong_type = lifecycle
            .open_ceremony(&ctx, &capacity, challenge, "s1", CeremonyType::Get, Some("c"))
            .await
            .unwrap_err();
        assert!(matches!(wrong_type, KeystoneError::InvalidInput(_)));

        assert!(lifecycle
            .open_ceremony(&ctx, &capacity, challenge, "s1", CeremonyType::Create, None)
            .await
            .is_ok());

        now.store(ceremony.ttl, Ordering::SeqCst);
        let expired = lifecycle
            .open_ceremony(&ctx, &capacity, challenge, "s1", CeremonyType::Create, None)
            .await
            .unwrap_err();
        assert!(matches!(expired, KeystoneError::Expired { expired_at } if expired_at == ceremony.ttl));
    }

    #[tokio::test]
    async fn test_forged_challenge_is_not_found() {
        let (lifecycle, _) = lifecycle().await;
        let capacity = CapacityAccumulator::new();
        let err = lifecycle
            .get_ceremony(&Context::background(), &capacity, "c2")
            .await
            .unwrap_err();
        assert!(matches!(err, KeystoneError::NotFound(_)));

        let unissued = ChallengeId::generate().unwrap();
        let err = lifecycle
            .get_ceremony(&Context::background(), &capacity, unissued.as_str())
            .await
            .unwrap_err();
        assert!(matches!(err, KeystoneError::NotFound(_)));
    }

    #[test]
    fn test_consume_condition() {
        let ceremony = Ceremony::new(
            ChallengeId::generate().unwrap(),
            "s1",
            CeremonyType::Create,
            1_000,
            60,
        );
        let Write {
            kind: WriteKind::Update { expression, .. },
            ..
        } = consume(&ceremony, 1_010)
        else {
            panic!("expected update");
        };
        assert_eq!(
            expression.condition_expression(),
            Some("attribute_exists(#n2) AND #n0 = :v2 AND #n3 > :v3")
        );
    }
}
