//! Public type definitions for the cardkeeper library.
//!
//! This module contains the data structures used throughout the library for
//! representing secrets stored on a card: their headers, their encoded
//! payloads, and the protocol-version-dependent size limits.

use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// The kind of secret stored in a card slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecretType {
    /// Raw master seed bytes (BIP-32 style)
    MasterSeed,
    /// BIP-39 mnemonic phrase, with optional passphrase
    Bip39Mnemonic,
    /// Electrum mnemonic phrase, with optional passphrase
    ElectrumMnemonic,
    /// Password, with optional login and URL
    Password,
    /// Free-form data bytes
    Data,
    /// Output descriptor for a wallet
    WalletDescriptor,
    /// Public key material
    Pubkey,
}

impl std::str::FromStr for SecretType {
    type Err = String;

    /// Parse a secret type from string (case-insensitive).
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "masterseed" | "seed" => Ok(SecretType::MasterSeed),
            "bip39" | "bip39mnemonic" | "mnemonic" => Ok(SecretType::Bip39Mnemonic),
            "electrum" | "electrummnemonic" => Ok(SecretType::ElectrumMnemonic),
            "password" => Ok(SecretType::Password),
            "data" | "freetext" => Ok(SecretType::Data),
            "descriptor" | "walletdescriptor" => Ok(SecretType::WalletDescriptor),
            "pubkey" | "publickey" => Ok(SecretType::Pubkey),
            _ => Err(format!("unknown secret type: {}", s)),
        }
    }
}

impl SecretType {
    /// Get a human-readable name for the secret type.
    pub fn name(&self) -> &'static str {
        match self {
            SecretType::MasterSeed => "Master seed",
            SecretType::Bip39Mnemonic => "BIP-39 mnemonic",
            SecretType::ElectrumMnemonic => "Electrum mnemonic",
            SecretType::Password => "Password",
            SecretType::Data => "Data",
            SecretType::WalletDescriptor => "Wallet descriptor",
            SecretType::Pubkey => "Public key",
        }
    }
}

/// Card protocol version.
///
/// The protocol version is a card capability flag that changes the maximum
/// label and payload sizes a card accepts. It is reported by the card in
/// [`CardStatus`] and never negotiated by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    /// Legacy protocol: single-byte lengths on the wire.
    V1,
    /// Current protocol: two-byte lengths, larger labels.
    #[default]
    V2,
}

impl ProtocolVersion {
    /// Maximum total encoded payload size accepted by a card speaking this
    /// protocol version.
    ///
    /// # Example
    ///
    /// ```
    /// use cardkeeper::ProtocolVersion;
    ///
    /// assert_eq!(ProtocolVersion::V1.max_payload_bytes(), 255);
    /// assert_eq!(ProtocolVersion::V2.max_payload_bytes(), 65535);
    /// ```
    pub fn max_payload_bytes(&self) -> usize {
        match self {
            ProtocolVersion::V1 => 255,
            ProtocolVersion::V2 => 65535,
        }
    }

    /// Maximum label size in bytes accepted by this protocol version.
    pub fn max_label_bytes(&self) -> usize {
        match self {
            ProtocolVersion::V1 => 64,
            ProtocolVersion::V2 => 127,
        }
    }
}

/// Opaque card-assigned handle identifying one stored secret.
///
/// Identifiers are only meaningful for the card that issued them; two cards
/// holding copies of the same secret will in general assign different ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SecretId(u16);

impl SecretId {
    /// Wrap a raw card-assigned identifier.
    pub fn new(raw: u16) -> Self {
        SecretId(raw)
    }

    /// The raw identifier as assigned by the card.
    pub fn raw(&self) -> u16 {
        self.0
    }
}

impl std::fmt::Display for SecretId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

/// Metadata record describing a stored secret without its payload.
///
/// Headers are immutable once read from a card; a fresh list is fetched on
/// every successful connection, so stale headers from a previous tap never
/// survive into a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretHeader {
    /// Card-assigned handle for this secret
    pub id: SecretId,
    /// UTF-8 label, bounded by the card's protocol version
    pub label: String,
    /// Kind of secret stored in this slot
    pub secret_type: SecretType,
    /// Declared payload size in bytes
    pub size: usize,
    /// Short content fingerprint (first 4 bytes of SHA-256, hex), if the
    /// card reports one
    pub fingerprint: Option<String>,
}

/// Type-tagged, byte-encoded secret body.
///
/// Payloads are constructed client-side before import and never persisted
/// off-device. The backing bytes are zeroized when the payload is dropped.
///
/// Fields inside the body are encoded as little-endian `u16` length-prefixed
/// blocks, in the order documented on each constructor. Optional trailing
/// fields that are absent are encoded as empty blocks, so a round trip
/// through a card preserves the encoding byte for byte.
///
/// # Example
///
/// ```
/// use cardkeeper::{SecretPayload, SecretType};
///
/// let payload = SecretPayload::from_password("hunter2", Some("alice"), None);
/// assert_eq!(payload.secret_type(), SecretType::Password);
/// assert!(payload.encoded_len() > 0);
/// ```
#[derive(Clone)]
pub struct SecretPayload {
    secret_type: SecretType,
    body: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for SecretPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Secret bytes are never printed, even at debug level.
        f.debug_struct("SecretPayload")
            .field("secret_type", &self.secret_type)
            .field("encoded_len", &self.body.len())
            .finish()
    }
}

impl PartialEq for SecretPayload {
    fn eq(&self, other: &Self) -> bool {
        self.secret_type == other.secret_type && *self.body == *other.body
    }
}

impl Eq for SecretPayload {}

fn push_block(out: &mut Vec<u8>, field: &[u8]) {
    let len = field.len().min(u16::MAX as usize) as u16;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&field[..len as usize]);
}

impl SecretPayload {
    fn new(secret_type: SecretType, body: Vec<u8>) -> Self {
        Self {
            secret_type,
            body: Zeroizing::new(body),
        }
    }

    /// Build a payload from a BIP-39 mnemonic and optional passphrase.
    ///
    /// Blocks: mnemonic text, passphrase (empty block when absent).
    pub fn from_bip39_mnemonic(mnemonic: &str, passphrase: Option<&str>) -> Self {
        let mut body = Vec::new();
        push_block(&mut body, mnemonic.as_bytes());
        push_block(&mut body, passphrase.unwrap_or("").as_bytes());
        Self::new(SecretType::Bip39Mnemonic, body)
    }

    /// Build a payload from an Electrum mnemonic and optional passphrase.
    ///
    /// Blocks: mnemonic text, passphrase (empty block when absent).
    pub fn from_electrum_mnemonic(mnemonic: &str, passphrase: Option<&str>) -> Self {
        let mut body = Vec::new();
        push_block(&mut body, mnemonic.as_bytes());
        push_block(&mut body, passphrase.unwrap_or("").as_bytes());
        Self::new(SecretType::ElectrumMnemonic, body)
    }

    /// Build a payload from raw master seed bytes.
    pub fn from_master_seed(seed: &[u8]) -> Self {
        let mut body = Vec::new();
        push_block(&mut body, seed);
        Self::new(SecretType::MasterSeed, body)
    }

    /// Build a payload from a password with optional login and URL.
    ///
    /// Blocks: password, login, url (empty blocks when absent).
    pub fn from_password(password: &str, login: Option<&str>, url: Option<&str>) -> Self {
        let mut body = Vec::new();
        push_block(&mut body, password.as_bytes());
        push_block(&mut body, login.unwrap_or("").as_bytes());
        push_block(&mut body, url.unwrap_or("").as_bytes());
        Self::new(SecretType::Password, body)
    }

    /// Build a payload from a wallet output descriptor.
    pub fn from_wallet_descriptor(descriptor: &str) -> Self {
        let mut body = Vec::new();
        push_block(&mut body, descriptor.as_bytes());
        Self::new(SecretType::WalletDescriptor, body)
    }

    /// Build a payload from free-form data bytes.
    pub fn from_data(data: &[u8]) -> Self {
        let mut body = Vec::new();
        push_block(&mut body, data);
        Self::new(SecretType::Data, body)
    }

    /// Build a payload from public key material.
    pub fn from_pubkey(key: &[u8]) -> Self {
        let mut body = Vec::new();
        push_block(&mut body, key);
        Self::new(SecretType::Pubkey, body)
    }

    /// Reconstruct a payload from already-encoded bytes, as returned by a
    /// card export. The bytes are taken as-is; the card is the authority on
    /// what it stored.
    pub fn from_encoded(secret_type: SecretType, encoded: Vec<u8>) -> Self {
        Self::new(secret_type, encoded)
    }

    /// Kind of secret this payload encodes.
    pub fn secret_type(&self) -> SecretType {
        self.secret_type
    }

    /// The encoded payload body.
    pub fn as_bytes(&self) -> &[u8] {
        &self.body
    }

    /// Total encoded size in bytes, as the card will count it.
    pub fn encoded_len(&self) -> usize {
        self.body.len()
    }

    /// Short content fingerprint: first 4 bytes of SHA-256 of the encoded
    /// body, hex-encoded lowercase. Matches the fingerprint the card reports
    /// in [`SecretHeader`], which is how duplicate secrets are recognized
    /// during backup.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&*self.body);
        hex::encode(&digest[..4])
    }
}

/// What a card reports about itself without consuming a PIN attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardStatus {
    /// Protocol version spoken by the card
    pub protocol_version: ProtocolVersion,
    /// Whether the card already has a PIN established
    pub setup_done: bool,
    /// Firmware version as (major, minor)
    pub firmware: (u8, u8),
    /// User-assigned card label, if set
    pub card_label: Option<String>,
    /// Number of secrets currently stored
    pub secret_count: usize,
}

/// One line of the card's internal operation log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Operation code as recorded by the card
    pub opcode: u8,
    /// Secret the operation touched, when applicable
    pub sid: Option<SecretId>,
    /// Card status word for the operation
    pub status: u16,
}
