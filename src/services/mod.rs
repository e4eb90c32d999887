//! Business logic services.
//!
//! Services contain core business logic separated from HTTP handlers.
//! They talk to storage only through the traits in [`crate::store`].

pub mod card_crypto;
pub mod card_service;
pub mod expiry_sweep;
pub mod kyc_service;
pub mod notification;
pub mod signing;
pub mod transaction_engine;
