//! In-memory card for tests and higher-layer integration work.
//!
//! `MockCard` implements [`CardClient`] against a deterministic in-memory
//! secret store and records every command it receives, so tests can assert
//! not only what a flow produced but also which commands were (or were
//! never) sent to the card.

use std::collections::HashMap;

use secrecy::{ExposeSecret, SecretString};

use super::client::CardClient;
use super::types::CardError;
use crate::types::{
    CardStatus, LogEntry, ProtocolVersion, SecretHeader, SecretId, SecretPayload,
};

const DEFAULT_TRIES: u8 = 3;
const DEFAULT_FREE_BYTES: usize = 32 * 1024;

// Opcodes recorded into the mock's operation log.
const OP_VERIFY_PIN: u8 = 0xA1;
const OP_SETUP: u8 = 0xA2;
const OP_CHANGE_PIN: u8 = 0xA3;
const OP_IMPORT: u8 = 0xB1;
const OP_EXPORT: u8 = 0xB2;
const OP_RESET: u8 = 0xC1;

const SW_OK: u16 = 0x9000;
const SW_WRONG_PIN: u16 = 0x63C0;

struct StoredSecret {
    id: SecretId,
    label: String,
    payload: SecretPayload,
}

/// Deterministic in-memory card that records received commands and replays
/// injected failures.
pub struct MockCard {
    pin: Option<String>,
    tries_left: u8,
    max_tries: u8,
    protocol_version: ProtocolVersion,
    firmware: (u8, u8),
    card_label: Option<String>,
    free_bytes: usize,
    secrets: Vec<StoredSecret>,
    next_id: u16,
    pin_verified: bool,
    logs: Vec<LogEntry>,
    injected: HashMap<&'static str, Vec<CardError>>,
    /// Ordered names of every command this card received.
    pub journal: Vec<&'static str>,
}

impl MockCard {
    /// A factory-fresh card: no PIN, no secrets, protocol v2.
    pub fn fresh() -> Self {
        Self {
            pin: None,
            tries_left: DEFAULT_TRIES,
            max_tries: DEFAULT_TRIES,
            protocol_version: ProtocolVersion::V2,
            firmware: (0, 4),
            card_label: None,
            free_bytes: DEFAULT_FREE_BYTES,
            secrets: Vec::new(),
            next_id: 1,
            pin_verified: false,
            logs: Vec::new(),
            injected: HashMap::new(),
            journal: Vec::new(),
        }
    }

    /// An already set-up card with the given PIN.
    pub fn initialized(pin: &str) -> Self {
        let mut card = Self::fresh();
        card.pin = Some(pin.to_string());
        card
    }

    /// Override the protocol version the card reports.
    pub fn with_protocol(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = version;
        self
    }

    /// Override the PIN attempt budget.
    pub fn with_tries(mut self, tries: u8) -> Self {
        self.tries_left = tries;
        self.max_tries = tries;
        self
    }

    /// Override how many payload bytes the card will accept before
    /// reporting it is full.
    pub fn with_free_bytes(mut self, bytes: usize) -> Self {
        self.free_bytes = bytes;
        self
    }

    /// Pre-load a stored secret, as if it had been imported earlier.
    pub fn with_secret(mut self, label: &str, payload: SecretPayload) -> Self {
        let id = SecretId::new(self.next_id);
        self.next_id += 1;
        self.free_bytes = self.free_bytes.saturating_sub(payload.encoded_len());
        self.secrets.push(StoredSecret {
            id,
            label: label.to_string(),
            payload,
        });
        self
    }

    /// Queue an error for the next invocation of the named command. Multiple
    /// queued errors for the same command are consumed in order.
    pub fn inject_failure(&mut self, command: &'static str, error: CardError) {
        self.injected.entry(command).or_default().push(error);
    }

    /// Simulate the channel closing between taps: PIN verification does not
    /// survive a disconnect.
    pub fn reset_channel(&mut self) {
        self.pin_verified = false;
    }

    /// Remaining PIN attempts, for test assertions.
    pub fn tries_left(&self) -> u8 {
        self.tries_left
    }

    /// Number of secrets currently stored, for test assertions.
    pub fn secret_count(&self) -> usize {
        self.secrets.len()
    }

    fn record(&mut self, command: &'static str) -> Result<(), CardError> {
        self.journal.push(command);
        if let Some(queue) = self.injected.get_mut(command) {
            if !queue.is_empty() {
                return Err(queue.remove(0));
            }
        }
        Ok(())
    }

    fn log(&mut self, opcode: u8, sid: Option<SecretId>, status: u16) {
        self.logs.push(LogEntry {
            opcode,
            sid,
            status,
        });
    }

    fn current_status(&self) -> CardStatus {
        CardStatus {
            protocol_version: self.protocol_version,
            setup_done: self.pin.is_some(),
            firmware: self.firmware,
            card_label: self.card_label.clone(),
            secret_count: self.secrets.len(),
        }
    }

    fn require_verified(&self) -> Result<(), CardError> {
        if self.pin_verified {
            Ok(())
        } else {
            Err(CardError::Communication("PIN not verified on this channel".into()))
        }
    }

    fn check_pin(&mut self, candidate: &SecretString) -> Result<(), CardError> {
        let pin = match &self.pin {
            Some(pin) => pin.clone(),
            None => return Err(CardError::SetupRequired),
        };
        if self.tries_left == 0 {
            return Err(CardError::PinLocked);
        }
        if candidate.expose_secret() == &pin {
            self.tries_left = self.max_tries;
            self.pin_verified = true;
            self.log(OP_VERIFY_PIN, None, SW_OK);
            Ok(())
        } else {
            self.tries_left -= 1;
            self.log(OP_VERIFY_PIN, None, SW_WRONG_PIN | self.tries_left as u16);
            if self.tries_left == 0 {
                Err(CardError::PinLocked)
            } else {
                Err(CardError::WrongPin {
                    tries_left: self.tries_left,
                })
            }
        }
    }
}

impl CardClient for MockCard {
    fn status(&mut self) -> Result<CardStatus, CardError> {
        self.record("status")?;
        Ok(self.current_status())
    }

    fn verify_pin(&mut self, pin: &SecretString) -> Result<CardStatus, CardError> {
        self.record("verify_pin")?;
        self.check_pin(pin)?;
        Ok(self.current_status())
    }

    fn setup(&mut self, pin: &SecretString) -> Result<(), CardError> {
        self.record("setup")?;
        if self.pin.is_some() {
            return Err(CardError::AlreadySetup);
        }
        self.pin = Some(pin.expose_secret().to_string());
        self.tries_left = self.max_tries;
        self.pin_verified = true;
        self.log(OP_SETUP, None, SW_OK);
        Ok(())
    }

    fn change_pin(&mut self, old: &SecretString, new: &SecretString) -> Result<(), CardError> {
        self.record("change_pin")?;
        self.check_pin(old)?;
        self.pin = Some(new.expose_secret().to_string());
        self.log(OP_CHANGE_PIN, None, SW_OK);
        Ok(())
    }

    fn list_secret_headers(&mut self) -> Result<Vec<SecretHeader>, CardError> {
        self.record("list_secret_headers")?;
        self.require_verified()?;
        Ok(self
            .secrets
            .iter()
            .map(|stored| SecretHeader {
                id: stored.id,
                label: stored.label.clone(),
                secret_type: stored.payload.secret_type(),
                size: stored.payload.encoded_len(),
                fingerprint: Some(stored.payload.fingerprint()),
            })
            .collect())
    }

    fn export_secret(&mut self, header: &SecretHeader) -> Result<SecretPayload, CardError> {
        self.record("export_secret")?;
        self.require_verified()?;
        let payload = self
            .secrets
            .iter()
            .find(|stored| stored.id == header.id)
            .map(|stored| stored.payload.clone())
            .ok_or_else(|| CardError::Communication(format!("no secret with id {}", header.id)))?;
        self.log(OP_EXPORT, Some(header.id), SW_OK);
        Ok(payload)
    }

    fn import_secret(
        &mut self,
        payload: &SecretPayload,
        label: &str,
    ) -> Result<SecretId, CardError> {
        self.record("import_secret")?;
        self.require_verified()?;
        if self.secrets.iter().any(|stored| stored.label == label) {
            return Err(CardError::ImportRejected(format!(
                "label already in use: {}",
                label
            )));
        }
        if payload.encoded_len() > self.free_bytes {
            return Err(CardError::NoMemory);
        }
        let id = SecretId::new(self.next_id);
        self.next_id += 1;
        self.free_bytes -= payload.encoded_len();
        self.secrets.push(StoredSecret {
            id,
            label: label.to_string(),
            payload: payload.clone(),
        });
        self.log(OP_IMPORT, Some(id), SW_OK);
        Ok(id)
    }

    fn set_card_label(&mut self, label: &str) -> Result<(), CardError> {
        self.record("set_card_label")?;
        self.require_verified()?;
        self.card_label = Some(label.to_string());
        Ok(())
    }

    fn factory_reset(&mut self) -> Result<(), CardError> {
        self.record("factory_reset")?;
        self.pin = None;
        self.pin_verified = false;
        self.tries_left = self.max_tries;
        self.secrets.clear();
        self.free_bytes = DEFAULT_FREE_BYTES;
        self.card_label = None;
        self.log(OP_RESET, None, SW_OK);
        Ok(())
    }

    fn fetch_logs(&mut self) -> Result<Vec<LogEntry>, CardError> {
        self.record("fetch_logs")?;
        self.require_verified()?;
        Ok(self.logs.clone())
    }
}

// Convenience for tests that only need some stored payload.
impl MockCard {
    /// Pre-load a small password secret under the given label.
    pub fn with_password_secret(self, label: &str, password: &str) -> Self {
        self.with_secret(label, SecretPayload::from_password(password, None, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SecretType;

    fn pin(s: &str) -> SecretString {
        SecretString::new(s.to_string())
    }

    #[test]
    fn records_received_commands() {
        let mut card = MockCard::initialized("1234");
        card.status().unwrap();
        card.verify_pin(&pin("1234")).unwrap();
        assert_eq!(card.journal, vec!["status", "verify_pin"]);
    }

    #[test]
    fn wrong_pin_decrements_until_locked() {
        let mut card = MockCard::initialized("1234").with_tries(2);
        match card.verify_pin(&pin("0000")) {
            Err(CardError::WrongPin { tries_left }) => assert_eq!(tries_left, 1),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(matches!(card.verify_pin(&pin("0000")), Err(CardError::PinLocked)));
        // Correct PIN no longer helps once locked.
        assert!(matches!(card.verify_pin(&pin("1234")), Err(CardError::PinLocked)));
    }

    #[test]
    fn correct_pin_resets_counter() {
        let mut card = MockCard::initialized("1234");
        let _ = card.verify_pin(&pin("0000"));
        assert_eq!(card.tries_left(), 2);
        card.verify_pin(&pin("1234")).unwrap();
        assert_eq!(card.tries_left(), 3);
    }

    #[test]
    fn duplicate_label_is_rejected() {
        let mut card = MockCard::initialized("1234").with_password_secret("mail", "hunter2");
        card.verify_pin(&pin("1234")).unwrap();
        let payload = SecretPayload::from_password("other", None, None);
        assert!(matches!(
            card.import_secret(&payload, "mail"),
            Err(CardError::ImportRejected(_))
        ));
        assert_eq!(card.secret_count(), 1);
    }

    #[test]
    fn full_card_reports_no_memory() {
        let mut card = MockCard::initialized("1234").with_free_bytes(4);
        card.verify_pin(&pin("1234")).unwrap();
        let payload = SecretPayload::from_data(b"way too large for four bytes");
        assert!(matches!(card.import_secret(&payload, "big"), Err(CardError::NoMemory)));
    }

    #[test]
    fn injected_failure_is_consumed_once() {
        let mut card = MockCard::initialized("1234");
        card.inject_failure("status", CardError::Communication("tag lost".into()));
        assert!(card.status().is_err());
        assert!(card.status().is_ok());
    }

    #[test]
    fn setup_twice_is_rejected() {
        let mut card = MockCard::fresh();
        card.setup(&pin("1234")).unwrap();
        assert!(matches!(card.setup(&pin("5678")), Err(CardError::AlreadySetup)));
    }

    #[test]
    fn export_returns_stored_bytes() {
        let secret = SecretPayload::from_bip39_mnemonic("abandon ability able", None);
        let mut card = MockCard::initialized("1234").with_secret("wallet", secret.clone());
        card.verify_pin(&pin("1234")).unwrap();
        let headers = card.list_secret_headers().unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].secret_type, SecretType::Bip39Mnemonic);
        let exported = card.export_secret(&headers[0]).unwrap();
        assert_eq!(exported, secret);
    }
}
