//! Card-to-card backup transfer.
//!
//! A backup is a three-phase saga spanning three separate physical taps:
//! the destination card is scanned first (PIN + existing headers), then the
//! source card's secrets are exported into memory, then the destination is
//! tapped again and every exported secret is imported one at a time. The
//! phases are composed by the caller (each one is a staged action plus a
//! tap); this module keeps the ledger that ties them together.
//!
//! Secrets are only ever added to the destination, never overwritten, and a
//! single secret's failure is recorded and skipped rather than aborting the
//! whole transfer.

use log::{debug, info, warn};

use super::client::CardClient;
use super::types::CardError;
use crate::types::{ProtocolVersion, SecretHeader, SecretPayload};

/// Where a backup flow currently stands.
///
/// Step names follow the protocol role of each tap: the destination card is
/// scanned first, the source is exported second, and the destination is
/// written last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackupStep {
    /// Waiting for the first tap: destination card PIN + existing headers
    #[default]
    ScanDestination,
    /// Waiting for the second tap: read every secret off the source card
    ExportSource,
    /// Waiting for the third tap: write exported secrets to the destination
    ImportToDestination,
    /// The transfer ran to the end; the ledger holds per-secret results
    Complete,
    /// The transfer stopped before any secret landed on the destination
    Failed,
}

/// One secret that could not be transferred, and why.
#[derive(Debug, Clone)]
pub struct TransferError {
    /// Header of the secret that failed, as read from the source card
    pub header: SecretHeader,
    /// The fault that stopped it
    pub reason: CardError,
}

/// Running record of one backup flow.
///
/// Created when the destination card is first scanned, mutated as each
/// phase runs, surfaced to the caller as a snapshot when the transfer
/// completes. The ledger survives across taps; per-tap session state does
/// not.
#[derive(Debug, Clone, Default)]
pub struct BackupLedger {
    step: BackupStep,
    destination_existing_count: usize,
    source_headers: Vec<SecretHeader>,
    exported: Vec<(SecretHeader, SecretPayload)>,
    imported_count: usize,
    errors: Vec<TransferError>,
}

impl BackupLedger {
    /// Start a fresh ledger, waiting for the destination pre-scan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase of the flow.
    pub fn step(&self) -> BackupStep {
        self.step
    }

    /// How many secrets the destination card already held before the
    /// transfer. These are never touched.
    pub fn destination_existing_count(&self) -> usize {
        self.destination_existing_count
    }

    /// Headers read from the source card, in card order.
    pub fn source_headers(&self) -> &[SecretHeader] {
        &self.source_headers
    }

    /// How many secrets will be written in phase three.
    pub fn total_to_import(&self) -> usize {
        self.exported.len()
    }

    /// How many secrets landed on the destination so far.
    pub fn imported_count(&self) -> usize {
        self.imported_count
    }

    /// Per-secret failures, in the order they were attempted.
    pub fn errors(&self) -> &[TransferError] {
        &self.errors
    }

    /// Whether the caller may still abandon the flow. Once the import phase
    /// has started writing, the transfer must run to its end.
    pub fn can_cancel(&self) -> bool {
        match self.step {
            BackupStep::ScanDestination | BackupStep::ExportSource => true,
            BackupStep::ImportToDestination => {
                self.imported_count == 0 && self.errors.is_empty()
            }
            BackupStep::Complete | BackupStep::Failed => false,
        }
    }

    pub(crate) fn record_destination_scan(&mut self, existing: usize) {
        self.destination_existing_count = existing;
        self.step = BackupStep::ExportSource;
        debug!(
            "backup: destination scanned, {} existing secret(s)",
            existing
        );
    }

    pub(crate) fn fail(&mut self) {
        self.step = BackupStep::Failed;
    }

    /// A transfer with nothing to move still finishes.
    pub(crate) fn complete_empty(&mut self) {
        self.step = BackupStep::Complete;
    }
}

/// Read and decrypt every secret off the source card, in header order.
///
/// The destination card is not touched in this phase. Any fault aborts the
/// export: a half-read source set is never handed to the import phase.
pub(crate) fn export_all(
    client: &mut dyn CardClient,
    ledger: &mut BackupLedger,
) -> Result<(), CardError> {
    let headers = client.list_secret_headers()?;
    info!("backup: exporting {} secret(s) from source card", headers.len());

    ledger.source_headers = headers.clone();
    ledger.exported.clear();
    for header in headers {
        let payload = client.export_secret(&header)?;
        debug!("backup: exported {} ({})", header.id, header.secret_type.name());
        ledger.exported.push((header, payload));
    }
    ledger.step = BackupStep::ImportToDestination;
    Ok(())
}

/// Write every exported secret to the destination card, in export order.
///
/// Per-secret failures (oversize for the destination's protocol version,
/// duplicate label, card full) are recorded into the ledger and the loop
/// continues with the next secret. Only a communication fault or a blocked
/// card aborts the phase. Progress is reported after every secret as
/// (imported so far, total to import).
pub(crate) fn import_exported(
    client: &mut dyn CardClient,
    version: ProtocolVersion,
    ledger: &mut BackupLedger,
    on_progress: &mut dyn FnMut(usize, usize),
) -> Result<(), CardError> {
    let total = ledger.exported.len();
    info!("backup: importing {} secret(s) to destination card", total);

    let work: Vec<(SecretHeader, SecretPayload)> = ledger.exported.clone();
    for (header, payload) in work {
        let outcome = check_size(&payload, &header.label, version)
            .and_then(|_| client.import_secret(&payload, &header.label).map(|_| ()));
        match outcome {
            Ok(()) => {
                ledger.imported_count += 1;
            }
            Err(
                reason @ (CardError::NoMemory
                | CardError::ImportRejected(_)
                | CardError::OversizePayload { .. }
                | CardError::OversizeLabel { .. }),
            ) => {
                warn!("backup: secret {} skipped: {}", header.id, reason);
                ledger.errors.push(TransferError { header, reason });
            }
            Err(fatal) => {
                ledger.fail();
                return Err(fatal);
            }
        }
        on_progress(ledger.imported_count, total);
    }

    // A destination that rejected every single secret for lack of memory
    // never was a usable backup target.
    if total > 0
        && ledger.imported_count == 0
        && ledger.errors.iter().all(|e| e.reason == CardError::NoMemory)
    {
        ledger.fail();
        return Err(CardError::NoMemory);
    }

    ledger.step = BackupStep::Complete;
    Ok(())
}

/// Client-side size pre-check. A secret that the destination card would
/// reject for size is never sent to it.
pub(crate) fn check_size(
    payload: &SecretPayload,
    label: &str,
    version: ProtocolVersion,
) -> Result<(), CardError> {
    let payload_limit = version.max_payload_bytes();
    if payload.encoded_len() > payload_limit {
        return Err(CardError::OversizePayload {
            size: payload.encoded_len(),
            limit: payload_limit,
        });
    }
    let label_limit = version.max_label_bytes();
    if label.len() > label_limit {
        return Err(CardError::OversizeLabel {
            size: label.len(),
            limit: label_limit,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ledger_waits_for_destination() {
        let ledger = BackupLedger::new();
        assert_eq!(ledger.step(), BackupStep::ScanDestination);
        assert!(ledger.can_cancel());
        assert_eq!(ledger.total_to_import(), 0);
    }

    #[test]
    fn cancel_window_closes_once_writing_starts() {
        let mut ledger = BackupLedger::new();
        ledger.record_destination_scan(2);
        assert!(ledger.can_cancel());

        ledger.step = BackupStep::ImportToDestination;
        assert!(ledger.can_cancel());

        ledger.imported_count = 1;
        assert!(!ledger.can_cancel());
    }

    #[test]
    fn size_check_tracks_protocol_version() {
        let payload = SecretPayload::from_data(&[0u8; 300]);
        assert!(matches!(
            check_size(&payload, "big", ProtocolVersion::V1),
            Err(CardError::OversizePayload { limit: 255, .. })
        ));
        assert!(check_size(&payload, "big", ProtocolVersion::V2).is_ok());

        let small = SecretPayload::from_data(&[0u8; 16]);
        let long_label = "x".repeat(100);
        assert!(matches!(
            check_size(&small, &long_label, ProtocolVersion::V1),
            Err(CardError::OversizeLabel { limit: 64, .. })
        ));
        assert!(check_size(&small, &long_label, ProtocolVersion::V2).is_ok());
    }
}
