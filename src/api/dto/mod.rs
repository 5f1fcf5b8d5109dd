//! Data Transfer Objects for REST request/response serialization.
//!
//! Money is serialized as integer cents.

pub mod checkout_dto;
pub mod purchase_dto;
pub mod webhook_dto;

pub use checkout_dto::*;
pub use purchase_dto::*;
pub use webhook_dto::*;
