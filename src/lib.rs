//! # boxoffice-gateway
//!
//! Ticket checkout backend. Prevents overselling finite ticket stock while
//! payment happens out of band at an external gateway.
//!
//! A checkout atomically holds capacity for every line of a cart, creates a
//! pending purchase, and hands the buyer to a hosted payment page. When the
//! gateway reports the payment complete, the purchase is settled in one
//! ledger transaction and the hold is returned. Holds that are never paid
//! for lapse after a configurable TTL.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP)            Payment gateway (webhook)
//!     │                             │
//!     ├── REST Handlers (api/) ◄────┘
//!     │
//!     ├── ReservationCoordinator ─┐
//!     ├── FulfillmentReconciler ──┼── Compensator (service/)
//!     ├── AvailabilityService ────┘
//!     │
//!     ├── HoldStore (hold_store/)     Redis + Lua, or in-memory
//!     ├── Ledger (persistence/)       PostgreSQL, or in-memory
//!     ├── PaymentGateway (payment/)   Stripe Checkout, or mock
//!     └── ConfirmationSender (notify/)
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod hold_store;
pub mod notify;
pub mod payment;
pub mod persistence;
pub mod service;
