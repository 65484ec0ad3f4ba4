//! The card command client boundary.
//!
//! One discrete card operation per method, executed over an already-open
//! contactless channel. The byte-level command encoding lives behind this
//! trait; the session layer never sees an APDU.

use secrecy::SecretString;

use super::types::CardError;
use crate::types::{CardStatus, LogEntry, SecretHeader, SecretId, SecretPayload};

/// A command-set client for one open card channel.
///
/// Implementations execute exactly one card operation per call and either
/// return the typed outcome or fail with a [`CardError`]. The session
/// manager hands a client to the dispatcher for the duration of one physical
/// tap; clients are not reused across taps.
///
/// Methods take `&mut self` because a card channel is inherently stateful
/// (PIN verification unlocks subsequent commands on the same channel).
pub trait CardClient {
    /// Read the card's status block.
    ///
    /// Not PIN-guarded; never consumes a PIN attempt.
    fn status(&mut self) -> Result<CardStatus, CardError>;

    /// Verify the user PIN and return the refreshed status.
    ///
    /// # Errors
    ///
    /// * [`CardError::WrongPin`] with the card's own remaining-attempts
    ///   counter on mismatch
    /// * [`CardError::PinLocked`] once the counter is exhausted
    /// * [`CardError::SetupRequired`] when no PIN has been established yet
    fn verify_pin(&mut self, pin: &SecretString) -> Result<CardStatus, CardError>;

    /// Establish the PIN on a fresh card.
    ///
    /// Only valid while the card reports needs-setup. Re-running setup after
    /// a previously aborted attempt is a card-side idempotency guarantee.
    fn setup(&mut self, pin: &SecretString) -> Result<(), CardError>;

    /// Replace the PIN. The old PIN must already have been verified on this
    /// channel in the same tap.
    fn change_pin(&mut self, old: &SecretString, new: &SecretString) -> Result<(), CardError>;

    /// List headers for every stored secret.
    fn list_secret_headers(&mut self) -> Result<Vec<SecretHeader>, CardError>;

    /// Export and decrypt the payload for one stored secret.
    fn export_secret(&mut self, header: &SecretHeader) -> Result<SecretPayload, CardError>;

    /// Import a secret, returning the card-assigned handle.
    ///
    /// # Errors
    ///
    /// * [`CardError::NoMemory`] when the card is full
    /// * [`CardError::ImportRejected`] on a duplicate label collision or any
    ///   other card-side refusal
    fn import_secret(
        &mut self,
        payload: &SecretPayload,
        label: &str,
    ) -> Result<SecretId, CardError>;

    /// Set the user-visible card label.
    fn set_card_label(&mut self, label: &str) -> Result<(), CardError>;

    /// Wipe all secrets and the PIN. Irreversible.
    fn factory_reset(&mut self) -> Result<(), CardError>;

    /// Fetch the card's internal operation log.
    fn fetch_logs(&mut self) -> Result<Vec<LogEntry>, CardError>;
}
