//! Card session, dispatch, and backup transfer.
//!
//! This module owns everything that happens between a tag touching the
//! reader and a result code reaching the UI:
//!
//! - [`SessionManager`] mediates raw connect/disconnect hardware events
//!   into one logical operation per physical tap
//! - [`Action`] and the dispatcher translate a staged request into the
//!   correct command sequence for the current card
//! - [`BackupLedger`] tracks the three-tap card-to-card transfer with
//!   per-secret partial-failure handling
//! - [`CardClient`] is the boundary to the byte-level command encoding,
//!   with [`MockCard`] as its deterministic in-memory implementation
//!
//! # Example
//!
//! ```no_run
//! use cardkeeper::card::{Action, MockCard, SessionManager, StagedInput};
//! use secrecy::SecretString;
//!
//! let session = SessionManager::new();
//! session.stage_action(
//!     Action::ScanCard,
//!     StagedInput {
//!         pin: Some(SecretString::new("123456".to_string())),
//!         ..StagedInput::default()
//!     },
//! ).unwrap();
//!
//! let mut card = MockCard::initialized("123456");
//! session.on_connected(&mut card);
//!
//! if session.result_code().is_success() {
//!     for header in session.secret_headers() {
//!         println!("{}: {}", header.id, header.label);
//!     }
//! }
//! ```

mod backup;
mod client;
mod dispatch;
mod mock;
mod session;
mod types;

pub use backup::{BackupLedger, BackupStep, TransferError};
pub use client::CardClient;
pub use dispatch::{Action, StagedInput};
pub use mock::MockCard;
pub use session::{SessionConfig, SessionEvent, SessionManager};
pub use types::{CardError, ConnectionPhase, ResultCode};
