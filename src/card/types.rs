//! Types for card session operations.
//!
//! This module defines the error taxonomy for card commands and the result
//! codes the session manager publishes to its observers.

/// Errors raised by card command execution.
///
/// Every fault the command client can raise maps to exactly one of these
/// kinds before it is published; nothing is collapsed into a generic failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardError {
    /// Tag moved away or radio error; recoverable, the operation is abandoned
    Communication(String),
    /// The PIN is incorrect; the card decremented its own attempt counter
    WrongPin {
        /// Number of attempts remaining, as reported by the card
        tries_left: u8,
    },
    /// The PIN attempt counter reached zero; terminal for this card until
    /// unlocked by out-of-band means
    PinLocked,
    /// Encoded payload exceeds the protocol-version limit; caught client-side
    /// before any command is sent
    OversizePayload {
        /// Encoded payload size in bytes
        size: usize,
        /// Limit for the connected card's protocol version
        limit: usize,
    },
    /// Label exceeds the protocol-version limit; caught client-side before
    /// any command is sent
    OversizeLabel {
        /// Label size in bytes
        size: usize,
        /// Limit for the connected card's protocol version
        limit: usize,
    },
    /// The card has no free memory for the import
    NoMemory,
    /// The card rejected an import (duplicate label collision or similar);
    /// per-secret, only relevant during backup
    ImportRejected(String),
    /// The card has no PIN yet and must go through setup first
    SetupRequired,
    /// Setup was requested on a card that already has a PIN
    AlreadySetup,
}

impl std::fmt::Display for CardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CardError::Communication(msg) => write!(f, "Card communication failed: {}", msg),
            CardError::WrongPin { tries_left } => {
                write!(f, "Wrong PIN, {} tries remaining", tries_left)
            }
            CardError::PinLocked => write!(f, "PIN is blocked"),
            CardError::OversizePayload { size, limit } => {
                write!(f, "Payload of {} bytes exceeds card limit of {}", size, limit)
            }
            CardError::OversizeLabel { size, limit } => {
                write!(f, "Label of {} bytes exceeds card limit of {}", size, limit)
            }
            CardError::NoMemory => write!(f, "No memory left on card"),
            CardError::ImportRejected(reason) => write!(f, "Import rejected: {}", reason),
            CardError::SetupRequired => write!(f, "Card requires setup"),
            CardError::AlreadySetup => write!(f, "Card is already set up"),
        }
    }
}

impl std::error::Error for CardError {}

/// Phase of the single in-flight contactless connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    /// No connection; staged input may be waiting for a tap
    #[default]
    Idle,
    /// A tap was accepted, the command client is being prepared
    Connecting,
    /// The dispatcher is running command sequences against the card
    Executing,
    /// The operation finished (or failed) and the connection was released
    Disconnected,
}

/// Result of the last completed card operation, published for observers.
///
/// Codes are fieldless so they stay `Copy`; the remaining PIN attempt count
/// that accompanies [`ResultCode::WrongPin`] is published separately by the
/// session manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultCode {
    /// No operation has completed yet
    #[default]
    None,
    /// An operation is currently running
    Busy,
    /// Card scanned and secret headers fetched
    CardScanned,
    /// Backup (destination) card scanned and headers fetched
    BackupCardScanned,
    /// PIN established on a fresh card
    SetupDone,
    /// PIN established on a fresh backup card
    SetupForBackupDone,
    /// PIN changed
    PinChanged,
    /// Card label updated
    LabelChanged,
    /// Staged secret imported
    SecretImported,
    /// All secrets exported from the source card
    SecretsExported,
    /// Backup transfer finished; consult the ledger for per-secret results
    CardBackedUp,
    /// Card operation log fetched
    LogsFetched,
    /// Card wiped to factory state
    CardReset,
    /// The card has no PIN yet; caller should run the setup flow
    RequireSetup,
    /// The backup card has no PIN yet; caller should run the backup setup flow
    RequireSetupForBackup,
    /// Wrong PIN; remaining tries published alongside
    WrongPin,
    /// PIN attempt counter exhausted
    CardBlocked,
    /// No free memory on the card
    NoMemory,
    /// Staged secret exceeds the card's protocol-version size limit;
    /// rejected client-side, nothing was sent
    SecretTooLarge,
    /// The card refused the import (duplicate label or similar)
    ImportRefused,
    /// Setup was requested on a card that already has a PIN
    AlreadySetup,
    /// Connection to the card was lost mid-operation
    CardLost,
}

impl ResultCode {
    /// Whether this code reports a successfully completed operation.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ResultCode::CardScanned
                | ResultCode::BackupCardScanned
                | ResultCode::SetupDone
                | ResultCode::SetupForBackupDone
                | ResultCode::PinChanged
                | ResultCode::LabelChanged
                | ResultCode::SecretImported
                | ResultCode::SecretsExported
                | ResultCode::CardBackedUp
                | ResultCode::LogsFetched
                | ResultCode::CardReset
        )
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ResultCode::None => "no result",
            ResultCode::Busy => "operation in progress",
            ResultCode::CardScanned => "card scanned",
            ResultCode::BackupCardScanned => "backup card scanned",
            ResultCode::SetupDone => "card setup complete",
            ResultCode::SetupForBackupDone => "backup card setup complete",
            ResultCode::PinChanged => "PIN changed",
            ResultCode::LabelChanged => "card label changed",
            ResultCode::SecretImported => "secret imported",
            ResultCode::SecretsExported => "secrets exported",
            ResultCode::CardBackedUp => "card backed up",
            ResultCode::LogsFetched => "card logs fetched",
            ResultCode::CardReset => "card reset",
            ResultCode::RequireSetup => "card requires setup",
            ResultCode::RequireSetupForBackup => "backup card requires setup",
            ResultCode::WrongPin => "wrong PIN",
            ResultCode::CardBlocked => "card is blocked",
            ResultCode::NoMemory => "no memory left on card",
            ResultCode::SecretTooLarge => "secret exceeds card size limit",
            ResultCode::ImportRefused => "card refused the import",
            ResultCode::AlreadySetup => "card is already set up",
            ResultCode::CardLost => "card connection lost",
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_codes() {
        assert!(ResultCode::CardScanned.is_success());
        assert!(ResultCode::CardBackedUp.is_success());
        assert!(!ResultCode::WrongPin.is_success());
        assert!(!ResultCode::Busy.is_success());
        assert!(!ResultCode::RequireSetup.is_success());
    }

    #[test]
    fn error_display_carries_tries() {
        let err = CardError::WrongPin { tries_left: 2 };
        assert_eq!(err.to_string(), "Wrong PIN, 2 tries remaining");
    }
}
