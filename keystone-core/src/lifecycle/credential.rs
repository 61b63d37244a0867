use std::sync::Arc;

use crate::capacity::CapacityAccumulator;
use crate::context::Context;
use crate::entity::{Ceremony, CeremonyType, Credential, Indexable, User};
use crate::error::{KeystoneError, Result};
use crate::expr::{Condition, ExpressionBuilder, FieldPath};
use crate::index::Index;
use crate::marker::Marker;
use crate::precondition::{DoesNotExist, LastModifier};
use crate::resolver::LogicalTable;
use crate::store::{StoreError, Write, WriteKind};
use crate::transaction::{ReadTransaction, Transaction, TransactionOutcome};
use crate::verifier::{AssertionVerifier, AttestationVerifier};

use super::ceremony::consume;
use super::{bounded, Lifecycle};

#[derive(Debug, Clone)]
pub struct RegisterRequest {
    pub challenge: String,
    pub session_id: String,
    /// Attestation payload handed to the verifier as-is.
    pub proof: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub credential: Credential,
    pub user: User,
}

#[derive(Debug, Clone)]
pub struct AssertRequest {
    pub challenge: String,
    pub session_id: String,
    pub credential_id: String,
    /// Assertion payload handed to the verifier as-is.
    pub proof: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assertion {
    pub credential_id: String,
    pub owner_id: String,
    pub sign_count: u32,
}

// Leg positions in the registration transaction.
const REGISTER_CREDENTIAL_LEG: usize = 0;
const REGISTER_USER_LEG: usize = 1;

// Leg positions in the assertion transaction.
const ASSERT_CREDENTIAL_LEG: usize = 0;
const ASSERT_CEREMONY_LEG: usize = 1;

enum Rejection {
    /// The counter did not advance or was already applied.
    Counter,
    /// Someone else redeemed the ceremony first.
    Ceremony,
}

impl Lifecycle {
    /// Redeem a registration ceremony: verify the attestation, then create the
    /// credential and its user and consume the ceremony in one atomic transaction.
    pub async fn register(
        &self,
        ctx: &Context,
        capacity: &CapacityAccumulator,
        request: RegisterRequest,
        verifier: &dyn AttestationVerifier,
    ) -> Result<Registration> {
        let (ceremony, _) = self
            .open_ceremony(
                ctx,
                capacity,
                &request.challenge,
                &request.session_id,
                CeremonyType::Create,
                None,
            )
            .await?;

        let verified = bounded(
            ctx,
            "verify_attestation",
            verifier.verify_attestation(&ceremony, &request.proof),
        )
        .await?;

        let now = self.now();
        let mut user = User::new(User::generate_id(), now);
        user.credential_ids.push(verified.credential_id.clone());
        let credential = Credential::new(
            verified.credential_id,
            user.user_id.clone(),
            verified.public_key,
            verified.attestation_type,
            now,
        );

        let mut tx = Transaction::with_capacity(capacity.clone())
            .write(credential.put_once())
            .write(user.put_once())
            .write(consume(&ceremony, now))
            .precondition(Arc::new(DoesNotExist::new(
                LogicalTable::Credentials,
                credential.key(),
                Credential::CREDENTIAL_ID,
            )));

        match tx.execute(ctx, self.store(), self.resolver()).await {
            Ok(TransactionOutcome::Committed(_)) => {}
            Ok(TransactionOutcome::PreconditionFailed { .. }) => {
                return Err(KeystoneError::conflict(format!(
                    "credential {} is already registered",
                    credential.credential_id
                )));
            }
            Err(err) => return Err(registration_conflict(err, &credential.credential_id)),
        }

        tracing::info!(
            credential_id = %credential.credential_id,
            user_id = %user.user_id,
            attestation_type = %credential.attestation_type,
            "Credential registered"
        );
        Ok(Registration { credential, user })
    }

    /// Redeem an assertion ceremony: verify the assertion, then advance the
    /// credential's counter and consume the ceremony in one atomic transaction.
    ///
    /// A counter that does not advance flags the credential as possibly cloned and
    /// returns [`KeystoneError::CloneDetected`]; the stored counter is left untouched.
    pub async fn assert(
        &self,
        ctx: &Context,
        capacity: &CapacityAccumulator,
        request: AssertRequest,
        verifier: &dyn AssertionVerifier,
    ) -> Result<Assertion> {
        let (ceremony, credential) = self
            .open_ceremony(
                ctx,
                capacity,
                &request.challenge,
                &request.session_id,
                CeremonyType::Get,
                Some(&request.credential_id),
            )
            .await?;
        let credential = credential.ok_or_else(|| {
            KeystoneError::not_found(format!("credential {} not found", request.credential_id))
        })?;

        let verified = bounded(
            ctx,
            "verify_assertion",
            verifier.verify_assertion(&ceremony, &request.proof, &credential.public_key),
        )
        .await?;
        let reported = verified.counter;

        let now = self.now();
        let guarded = Transaction::with_capacity(capacity.clone()).precondition(Arc::new(
            DoesNotExist::new(LogicalTable::Ceremonies, ceremony.key(), Ceremony::REDEEMED_AT),
        ));
        let mut tx = counter_update(guarded, &credential, reported, now)
            .write(consume(&ceremony, now));

        let outcome = tx.execute(ctx, self.store(), self.resolver()).await;
        let rejection = match &outcome {
            Ok(TransactionOutcome::Committed(_)) => None,
            Ok(TransactionOutcome::PreconditionFailed { precondition })
                if precondition == LastModifier::NAME =>
            {
                Some(Rejection::Counter)
            }
            Ok(TransactionOutcome::PreconditionFailed { .. }) => Some(Rejection::Ceremony),
            Err(err) if err.leg_failed(ASSERT_CEREMONY_LEG) => Some(Rejection::Ceremony),
            Err(err) if err.leg_failed(ASSERT_CREDENTIAL_LEG) => Some(Rejection::Counter),
            Err(_) => None,
        };
        let rejection = match rejection {
            // A concurrent redemption can win between our two preconditions.
            Some(Rejection::Counter)
                if self
                    .get_ceremony(ctx, capacity, ceremony.challenge_id.as_str())
                    .await?
                    .consumed =>
            {
                Some(Rejection::Ceremony)
            }
            other => other,
        };
        match rejection {
            Some(Rejection::Counter) => {
                self.flag_clone(ctx, capacity, &credential, now).await?;
                return Err(KeystoneError::CloneDetected {
                    credential_id: credential.credential_id,
                    stored: credential.sign_count,
                    reported,
                });
            }
            Some(Rejection::Ceremony) => {
                return Err(KeystoneError::conflict("ceremony already redeemed or expired"));
            }
            None => {}
        }
        outcome?;

        tracing::info!(
            credential_id = %credential.credential_id,
            sign_count = reported,
            "Assertion accepted"
        );
        Ok(Assertion {
            credential_id: credential.credential_id,
            owner_id: credential.owner_id,
            sign_count: reported,
        })
    }

    /// Mark a credential as possibly cloned, without touching its counter.
    async fn flag_clone(
        &self,
        ctx: &Context,
        capacity: &CapacityAccumulator,
        credential: &Credential,
        now: i64,
    ) -> Result<()> {
        let expression = ExpressionBuilder::new()
            .assign(Credential::CLONE_WARNING, true)
            .assign(Credential::UPDATED_AT, now)
            .condition(Condition::exists(Credential::CREDENTIAL_ID))
            .build();
        let mut tx = Transaction::with_capacity(capacity.clone()).update(
            LogicalTable::Credentials,
            credential.key(),
            expression,
        );
        tx.execute(ctx, self.store(), self.resolver()).await?;
        tracing::warn!(
            credential_id = %credential.credential_id,
            stored = credential.sign_count,
            "Signature counter did not advance; credential flagged as possibly cloned"
        );
        Ok(())
    }

    pub async fn get_credential(
        &self,
        ctx: &Context,
        capacity: &CapacityAccumulator,
        credential_id: &str,
    ) -> Result<Credential> {
        let items = ReadTransaction::with_capacity(capacity.clone())
            .get(
                LogicalTable::Credentials,
                Index::primary(Credential::CREDENTIAL_ID, credential_id).key(),
            )
            .execute(ctx, self.store(), self.resolver())
            .await?;
        let item = items
            .into_iter()
            .next()
            .flatten()
            .ok_or_else(|| KeystoneError::not_found(format!("credential {credential_id} not found")))?;
        Ok(Credential::from_item(&item)?)
    }

    /// Credentials owned by a user, through the owner index.
    pub async fn list_credentials(
        &self,
        ctx: &Context,
        capacity: &CapacityAccumulator,
        owner_id: &str,
    ) -> Result<Vec<Credential>> {
        let table = self.resolver().require(LogicalTable::Credentials)?;
        let query =
            Index::secondary(Credential::OWNER_INDEX, Credential::OWNER_ID, owner_id).build_query();
        let output = ctx
            .run("query", self.store().query(table, &query))
            .await?;
        capacity.add(&output.capacity);
        output
            .items
            .iter()
            .map(|item| Credential::from_item(item).map_err(KeystoneError::from))
            .collect()
    }

    pub async fn get_user(
        &self,
        ctx: &Context,
        capacity: &CapacityAccumulator,
        user_id: &str,
    ) -> Result<User> {
        let items = ReadTransaction::with_capacity(capacity.clone())
            .get(LogicalTable::Users, Index::primary(User::USER_ID, user_id).key())
            .execute(ctx, self.store(), self.resolver())
            .await?;
        let item = items
            .into_iter()
            .next()
            .flatten()
            .ok_or_else(|| KeystoneError::not_found(format!("user {user_id} not found")))?;
        Ok(User::from_item(&item)?)
    }
}

/// Credential leg (and its preconditions) for an assertion reporting `reported`.
///
/// Authenticators without counters report 0 against a stored 0; that is accepted
/// without markers. Any other counter must strictly advance the stored one and must
/// not have been applied before.
fn counter_update(
    mut tx: Transaction,
    credential: &Credential,
    reported: u32,
    now: i64,
) -> Transaction {
    let key = credential.key();
    let mut builder = ExpressionBuilder::new()
        .assign(Credential::UPDATED_AT, now)
        .condition(Condition::exists(Credential::CREDENTIAL_ID));

    if reported == 0 && credential.sign_count == 0 {
        builder = builder.condition(Condition::eq(Credential::SIGN_COUNT, 0u32));
    } else {
        let sign_count = FieldPath::attr(Credential::SIGN_COUNT);
        let history = FieldPath::attr(Credential::SIGN_HISTORY);
        for (field, marker) in [
            (sign_count, Marker::scalar(reported)),
            (history, Marker::list(reported)),
        ] {
            builder = builder.condition(marker.guard(&field));
            if let Some(record) = marker.record() {
                builder = builder.set(field.clone(), record);
            }
            tx = tx.precondition(Arc::new(LastModifier::new(
                LogicalTable::Credentials,
                key.clone(),
                field,
                marker,
            )));
        }
    }

    tx.write(Write {
        table: LogicalTable::Credentials,
        kind: WriteKind::Update {
            key,
            expression: builder.build(),
        },
    })
}

fn registration_conflict(err: StoreError, credential_id: &str) -> KeystoneError {
    match err.failed_leg() {
        Some(REGISTER_CREDENTIAL_LEG) => {
            KeystoneError::conflict(format!("credential {credential_id} is already registered"))
        }
        Some(REGISTER_USER_LEG) => KeystoneError::conflict("user already exists"),
        Some(_) => KeystoneError::conflict("ceremony already redeemed or expired"),
        None => err.into(),
    }
}
