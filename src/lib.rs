//! # Cardkeeper
//!
//! A Rust library for storing and retrieving secrets (seed phrases,
//! passwords, wallet descriptors) on a contactless secure-element card, and
//! for migrating a full secret set from one card to another.
//!
//! This crate provides the session and protocol layer:
//!
//! - **Session management**: one logical operation per physical tap, with
//!   reconnect debouncing, a monotonic operation timeout, and published
//!   state for UI observers
//! - **Action dispatch**: a staged high-level action (scan, setup, change
//!   PIN, import/export, factory reset) mapped onto the right card command
//!   sequence for the card's state and protocol version
//! - **Backup transfer**: the three-tap card-to-card copy with a per-secret
//!   success/failure ledger
//! - **Secret model**: typed headers and payloads with protocol-version
//!   size limits, zeroized on drop
//!
//! The byte-level command encoding (APDU) is not part of this crate; it
//! sits behind the [`card::CardClient`] trait, with
//! [`card::MockCard`] as a deterministic stand-in for tests.
//!
//! ## Quick Start
//!
//! ```
//! use cardkeeper::card::{Action, MockCard, SessionManager, StagedInput};
//! use cardkeeper::SecretPayload;
//! use secrecy::SecretString;
//!
//! // A card as the platform would hand it to us on a tap; in production
//! // this is the real command-set client over NFC.
//! let mut card = MockCard::initialized("123456");
//!
//! let session = SessionManager::new();
//! session.stage_action(
//!     Action::ImportSecret,
//!     StagedInput {
//!         pin: Some(SecretString::new("123456".to_string())),
//!         secret: Some((
//!             SecretPayload::from_password("hunter2", Some("alice"), None),
//!             "mail".to_string(),
//!         )),
//!         ..StagedInput::default()
//!     },
//! ).unwrap();
//!
//! session.on_connected(&mut card);
//! assert!(session.result_code().is_success());
//! ```
//!
//! ## Threading
//!
//! Connect/disconnect callbacks are expected on the platform's single
//! contactless-radio thread; the dispatcher executes synchronously on that
//! thread for at most one command sequence. Observers read published state
//! (result code, connected flag, progress) from any thread.

// Modules
mod error;
mod types;

pub mod card;

// Re-export error types
pub use error::{Error, Result};

// Re-export the secret model
pub use types::{
    CardStatus,
    LogEntry,
    ProtocolVersion,
    SecretHeader,
    SecretId,
    SecretPayload,
    SecretType,
};
