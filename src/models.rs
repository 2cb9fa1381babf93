//! Core data models for advisories and escrow payments
//!
//! Records are immutable-by-default values. Every lifecycle change goes
//! through an explicit transition function returning a new record; nothing
//! outside this module assigns state fields directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

use crate::error::EngineError;
use crate::interval::TimeInterval;
use crate::Result;

/// Session lengths offered for booking, in minutes
pub const ALLOWED_DURATION_MINUTES: &[i64] = &[30, 60, 90];

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AdvisoryState {
    #[serde(rename = "pendiente-pago")]
    PendientePago,
    #[serde(rename = "confirmada")]
    Confirmada,
    #[serde(rename = "completada")]
    Completada,
    #[serde(rename = "cancelada")]
    Cancelada,
    #[serde(rename = "rechazada")]
    Rechazada,
}

impl AdvisoryState {
    /// Terminal states have no outgoing transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AdvisoryState::Completada | AdvisoryState::Cancelada | AdvisoryState::Rechazada
        )
    }

    /// Blocking states count toward schedule-conflict detection
    pub fn is_blocking(&self) -> bool {
        matches!(self, AdvisoryState::Confirmada | AdvisoryState::Completada)
    }
}

impl fmt::Display for AdvisoryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AdvisoryState::PendientePago => "pendiente-pago",
            AdvisoryState::Confirmada => "confirmada",
            AdvisoryState::Completada => "completada",
            AdvisoryState::Cancelada => "cancelada",
            AdvisoryState::Rechazada => "rechazada",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaymentState {
    #[serde(rename = "pendiente")]
    Pendiente,
    #[serde(rename = "retenido")]
    Retenido,
    #[serde(rename = "liberado")]
    Liberado,
    #[serde(rename = "reembolsado")]
    Reembolsado,
    #[serde(rename = "reembolsado-parcial")]
    ReembolsadoParcial,
}

impl PaymentState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentState::Liberado | PaymentState::Reembolsado | PaymentState::ReembolsadoParcial
        )
    }

    /// States from which funds can still be refunded
    pub fn is_refundable(&self) -> bool {
        matches!(self, PaymentState::Retenido | PaymentState::Liberado)
    }
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentState::Pendiente => "pendiente",
            PaymentState::Retenido => "retenido",
            PaymentState::Liberado => "liberado",
            PaymentState::Reembolsado => "reembolsado",
            PaymentState::ReembolsadoParcial => "reembolsado-parcial",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RefundMode {
    Full,
    Partial,
}

//
// ================= Party Snapshot =================
//

/// Party identity captured by value at booking time. Later profile edits
/// never retroactively alter historical bookings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartySnapshot {
    pub party_id: Uuid,
    pub email: String,
    pub display_name: String,
}

//
// ================= Review =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Review {
    pub rating: u8,
    pub comment: Option<String>,
}

impl Review {
    pub fn new(rating: u8, comment: Option<String>) -> Result<Self> {
        if !(1..=5).contains(&rating) {
            return Err(EngineError::Validation(format!(
                "rating must be between 1 and 5, got {}",
                rating
            )));
        }
        Ok(Self { rating, comment })
    }
}

//
// ================= Advisory =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Advisory {
    pub advisory_id: Uuid,
    /// Human-readable code, generated once at creation, globally unique
    pub code: String,
    pub title: String,
    pub category: String,
    pub client: PartySnapshot,
    pub expert: PartySnapshot,
    pub start_time: DateTime<Utc>,
    /// Fixed at creation from start + duration; never recomputed
    pub end_time: DateTime<Utc>,
    pub duration_minutes: i64,
    pub state: AdvisoryState,
    /// Exactly one associated payment; 1:1, enforced by the store
    pub payment_ref: Uuid,
    pub review: Option<Review>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Advisory {
    /// Build a confirmed advisory. Preconditions (role checks, conflict
    /// check, payment ownership) are the engine's responsibility; this
    /// constructor only fixes the value state.
    #[allow(clippy::too_many_arguments)]
    pub fn book(
        title: String,
        category: String,
        client: PartySnapshot,
        expert: PartySnapshot,
        interval: TimeInterval,
        payment_ref: Uuid,
        now: DateTime<Utc>,
    ) -> Self {
        let advisory_id = Uuid::new_v4();
        let code = generate_code(&advisory_id, now);

        Self {
            advisory_id,
            code,
            title,
            category,
            client,
            expert,
            start_time: interval.start,
            end_time: interval.end,
            duration_minutes: interval.duration_minutes(),
            state: AdvisoryState::Confirmada,
            payment_ref,
            review: None,
            created_at: now,
            completed_at: None,
            closed_at: None,
        }
    }

    pub fn interval(&self) -> TimeInterval {
        TimeInterval::from_bounds(self.start_time, self.end_time)
    }

    /// True when the given party is the client or the expert
    pub fn involves(&self, party_id: Uuid) -> bool {
        self.client.party_id == party_id || self.expert.party_id == party_id
    }

    /// `confirmada → completada`
    pub fn finalize(&self, now: DateTime<Utc>) -> Result<Advisory> {
        if self.state != AdvisoryState::Confirmada {
            return Err(EngineError::InvalidTransition(format!(
                "advisory {} cannot be finalized from state {}",
                self.code, self.state
            )));
        }
        Ok(Advisory {
            state: AdvisoryState::Completada,
            completed_at: Some(now),
            ..self.clone()
        })
    }

    /// `confirmada → cancelada`
    pub fn cancel(&self, now: DateTime<Utc>) -> Result<Advisory> {
        if self.state != AdvisoryState::Confirmada {
            return Err(EngineError::InvalidTransition(format!(
                "advisory {} cannot be cancelled from state {}",
                self.code, self.state
            )));
        }
        Ok(Advisory {
            state: AdvisoryState::Cancelada,
            closed_at: Some(now),
            ..self.clone()
        })
    }

    /// `pendiente-pago | confirmada → rechazada`
    pub fn reject(&self, now: DateTime<Utc>) -> Result<Advisory> {
        if !matches!(
            self.state,
            AdvisoryState::PendientePago | AdvisoryState::Confirmada
        ) {
            return Err(EngineError::InvalidTransition(format!(
                "advisory {} cannot be rejected from state {}",
                self.code, self.state
            )));
        }
        Ok(Advisory {
            state: AdvisoryState::Rechazada,
            closed_at: Some(now),
            ..self.clone()
        })
    }

    /// Attach a review; only completed advisories can be reviewed
    pub fn with_review(&self, review: Review) -> Result<Advisory> {
        if self.state != AdvisoryState::Completada {
            return Err(EngineError::InvalidTransition(format!(
                "advisory {} cannot be reviewed in state {}",
                self.code, self.state
            )));
        }
        Ok(Advisory {
            review: Some(review),
            ..self.clone()
        })
    }
}

/// Derive the public advisory code from the advisory id and the creation
/// instant. Uniqueness follows from the id.
fn generate_code(advisory_id: &Uuid, created_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(advisory_id.as_bytes());
    hasher.update(created_at.timestamp_millis().to_be_bytes());
    let digest = hasher.finalize();
    format!("ASE-{}", hex::encode(&digest[..5]).to_uppercase())
}

//
// ================= Payment (escrow record) =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: Uuid,
    /// Gateway transaction id; None until a gateway confirms one
    pub external_txn_id: Option<String>,
    pub client_id: Uuid,
    pub expert_id: Uuid,
    /// Gross amount in cents; immutable after creation
    pub amount: i64,
    pub commission: i64,
    pub expert_amount: i64,
    pub method: String,
    pub state: PaymentState,
    pub created_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub refund_mode: Option<RefundMode>,
}

impl Payment {
    /// Create an escrow record with funds notionally captured. Amount
    /// bounds and commission arithmetic are the engine's responsibility.
    #[allow(clippy::too_many_arguments)]
    pub fn hold(
        client_id: Uuid,
        expert_id: Uuid,
        amount: i64,
        commission: i64,
        expert_amount: i64,
        method: String,
        external_txn_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            payment_id: Uuid::new_v4(),
            external_txn_id,
            client_id,
            expert_id,
            amount,
            commission,
            expert_amount,
            method,
            state: PaymentState::Retenido,
            created_at: now,
            released_at: None,
            refunded_at: None,
            refund_mode: None,
        }
    }

    /// `retenido → liberado`. Releasing an already-released payment is a
    /// no-op success; a manual finalize and the sweeper may race here.
    pub fn release(&self, now: DateTime<Utc>) -> Result<Payment> {
        match self.state {
            PaymentState::Liberado => Ok(self.clone()),
            PaymentState::Retenido => Ok(Payment {
                state: PaymentState::Liberado,
                released_at: Some(now),
                ..self.clone()
            }),
            other => Err(EngineError::InvalidTransition(format!(
                "payment {} cannot be released from state {}",
                self.payment_id, other
            ))),
        }
    }

    /// `retenido | liberado → reembolsado | reembolsado-parcial`. A
    /// released payment can still be refunded after a dispute.
    pub fn refund(&self, mode: RefundMode, now: DateTime<Utc>) -> Result<Payment> {
        if !self.state.is_refundable() {
            return Err(EngineError::InvalidTransition(format!(
                "payment {} cannot be refunded from state {}",
                self.payment_id, self.state
            )));
        }
        Ok(Payment {
            state: match mode {
                RefundMode::Full => PaymentState::Reembolsado,
                RefundMode::Partial => PaymentState::ReembolsadoParcial,
            },
            refunded_at: Some(now),
            refund_mode: Some(mode),
            ..self.clone()
        })
    }
}
