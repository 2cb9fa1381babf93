//! State persistence layer
//!
//! Storage sits behind a trait so the in-memory reference store can be
//! replaced with a database-backed one. The trait surface is deliberately
//! small: point reads, the queries the conflict checker and sweeper need,
//! and compare-and-swap updates so racing writers lose deterministically.

use crate::error::EngineError;
use crate::models::{Advisory, AdvisoryState, Payment, PaymentState};
use crate::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Outcome of a conditional update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The expected source state matched and the update was applied
    Applied,
    /// The advisory was no longer in the expected state
    AdvisoryStale(AdvisoryState),
    /// The payment was no longer in the expected state
    PaymentStale(PaymentState),
}

/// Trait for engine persistence
#[async_trait::async_trait]
pub trait EngineStore: Send + Sync {
    /// Insert a new advisory. Fails with `Conflict` when its payment is
    /// already bound to another advisory (1:1 invariant).
    async fn insert_advisory(&self, advisory: Advisory) -> Result<()>;

    /// Insert a new payment. Fails with `Conflict` on a duplicate external
    /// transaction id.
    async fn insert_payment(&self, payment: Payment) -> Result<()>;

    async fn get_advisory(&self, advisory_id: Uuid) -> Result<Option<Advisory>>;
    async fn get_payment(&self, payment_id: Uuid) -> Result<Option<Payment>>;

    /// Advisories for an expert whose state blocks the schedule
    async fn blocking_advisories_for_expert(&self, expert_id: Uuid) -> Result<Vec<Advisory>>;

    /// Confirmed advisories where the party is client or expert
    async fn confirmed_for_party(&self, party_id: Uuid) -> Result<Vec<Advisory>>;

    /// Confirmed advisories whose end time lies before the cutoff
    async fn confirmed_ended_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Advisory>>;

    /// Write the payment only if it is still in the expected state
    async fn update_payment_if(
        &self,
        updated: Payment,
        expected: PaymentState,
    ) -> Result<CasOutcome>;

    /// Write the advisory only if it is still in the expected state
    async fn update_advisory_if(
        &self,
        updated: Advisory,
        expected: AdvisoryState,
    ) -> Result<CasOutcome>;

    /// Write advisory and payment together, all-or-nothing, only if both
    /// are still in their expected states.
    async fn update_pair_if(
        &self,
        advisory: Advisory,
        expected_advisory: AdvisoryState,
        payment: Payment,
        expected_payment: PaymentState,
    ) -> Result<CasOutcome>;
}

/// In-memory reference store. One lock over all records makes the pair
/// commit and the binding-uniqueness check atomic.
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    advisories: HashMap<Uuid, Advisory>,
    payments: HashMap<Uuid, Payment>,
    /// payment id → advisory id (1:1 binding)
    payment_binding: HashMap<Uuid, Uuid>,
    /// external transaction id → payment id
    external_txns: HashMap<String, Uuid>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl EngineStore for InMemoryStore {
    async fn insert_advisory(&self, advisory: Advisory) -> Result<()> {
        let mut inner = self.inner.write().await;

        if let Some(existing) = inner.payment_binding.get(&advisory.payment_ref) {
            return Err(EngineError::Conflict(format!(
                "payment {} is already bound to advisory {}",
                advisory.payment_ref, existing
            )));
        }
        if inner.advisories.contains_key(&advisory.advisory_id) {
            return Err(EngineError::Conflict(format!(
                "advisory {} already exists",
                advisory.advisory_id
            )));
        }

        inner
            .payment_binding
            .insert(advisory.payment_ref, advisory.advisory_id);
        inner.advisories.insert(advisory.advisory_id, advisory);
        Ok(())
    }

    async fn insert_payment(&self, payment: Payment) -> Result<()> {
        let mut inner = self.inner.write().await;

        if let Some(txn) = &payment.external_txn_id {
            if inner.external_txns.contains_key(txn) {
                return Err(EngineError::Conflict(format!(
                    "external transaction id {} already registered",
                    txn
                )));
            }
            inner.external_txns.insert(txn.clone(), payment.payment_id);
        }

        inner.payments.insert(payment.payment_id, payment);
        Ok(())
    }

    async fn get_advisory(&self, advisory_id: Uuid) -> Result<Option<Advisory>> {
        let inner = self.inner.read().await;
        Ok(inner.advisories.get(&advisory_id).cloned())
    }

    async fn get_payment(&self, payment_id: Uuid) -> Result<Option<Payment>> {
        let inner = self.inner.read().await;
        Ok(inner.payments.get(&payment_id).cloned())
    }

    async fn blocking_advisories_for_expert(&self, expert_id: Uuid) -> Result<Vec<Advisory>> {
        let inner = self.inner.read().await;
        Ok(inner
            .advisories
            .values()
            .filter(|a| a.expert.party_id == expert_id && a.state.is_blocking())
            .cloned()
            .collect())
    }

    async fn confirmed_for_party(&self, party_id: Uuid) -> Result<Vec<Advisory>> {
        let inner = self.inner.read().await;
        Ok(inner
            .advisories
            .values()
            .filter(|a| a.state == AdvisoryState::Confirmada && a.involves(party_id))
            .cloned()
            .collect())
    }

    async fn confirmed_ended_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Advisory>> {
        let inner = self.inner.read().await;
        Ok(inner
            .advisories
            .values()
            .filter(|a| a.state == AdvisoryState::Confirmada && a.end_time < cutoff)
            .cloned()
            .collect())
    }

    async fn update_payment_if(
        &self,
        updated: Payment,
        expected: PaymentState,
    ) -> Result<CasOutcome> {
        let mut inner = self.inner.write().await;

        let current = inner.payments.get(&updated.payment_id).ok_or_else(|| {
            EngineError::NotFound(format!("payment {}", updated.payment_id))
        })?;
        if current.state != expected {
            return Ok(CasOutcome::PaymentStale(current.state));
        }

        inner.payments.insert(updated.payment_id, updated);
        Ok(CasOutcome::Applied)
    }

    async fn update_advisory_if(
        &self,
        updated: Advisory,
        expected: AdvisoryState,
    ) -> Result<CasOutcome> {
        let mut inner = self.inner.write().await;

        let current = inner.advisories.get(&updated.advisory_id).ok_or_else(|| {
            EngineError::NotFound(format!("advisory {}", updated.advisory_id))
        })?;
        if current.state != expected {
            return Ok(CasOutcome::AdvisoryStale(current.state));
        }

        inner.advisories.insert(updated.advisory_id, updated);
        Ok(CasOutcome::Applied)
    }

    async fn update_pair_if(
        &self,
        advisory: Advisory,
        expected_advisory: AdvisoryState,
        payment: Payment,
        expected_payment: PaymentState,
    ) -> Result<CasOutcome> {
        let mut inner = self.inner.write().await;

        let current_advisory = inner.advisories.get(&advisory.advisory_id).ok_or_else(|| {
            EngineError::NotFound(format!("advisory {}", advisory.advisory_id))
        })?;
        if current_advisory.state != expected_advisory {
            return Ok(CasOutcome::AdvisoryStale(current_advisory.state));
        }

        let current_payment = inner.payments.get(&payment.payment_id).ok_or_else(|| {
            EngineError::NotFound(format!("payment {}", payment.payment_id))
        })?;
        if current_payment.state != expected_payment {
            return Ok(CasOutcome::PaymentStale(current_payment.state));
        }

        // Both checks passed under the same write lock; commit both.
        inner.advisories.insert(advisory.advisory_id, advisory);
        inner.payments.insert(payment.payment_id, payment);
        Ok(CasOutcome::Applied)
    }
}
