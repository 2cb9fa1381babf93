//! Advisory Booking & Payment Escrow Engine
//!
//! Brokers paid, time-boxed advisory sessions between a client and an
//! expert:
//! - decides whether a requested slot can legally be booked for an expert
//! - drives each advisory through mutually exclusive lifecycle states
//! - keeps the tied escrow record (held, released, refunded) consistent
//!   with that lifecycle, under concurrent requests and a timer-driven
//!   sweep that force-resolves stale bookings
//!
//! FLOW:
//! HOLD PAYMENT → CONFLICT CHECK → BOOK (confirmada) → FINALIZE/CANCEL →
//! RELEASE/REFUND — with the sweeper driving the same finalize path for
//! stale bookings.

pub mod api;
pub mod clock;
pub mod commission;
pub mod config;
pub mod conflict;
pub mod directory;
pub mod engine;
pub mod error;
pub mod interval;
pub mod models;
pub mod notify;
pub mod store;
pub mod sweeper;

pub use error::Result;

// Re-export common types
pub use engine::{Actor, BookingEngine, CreateAdvisoryInput, HoldPaymentInput};
pub use models::{Advisory, AdvisoryState, Payment, PaymentState, RefundMode};
