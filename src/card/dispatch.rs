//! Action dispatch: one requested action → one ordered command sequence.
//!
//! The caller stages an action (and its inputs) before the tap; when a
//! connection is accepted the dispatcher translates that action into the
//! correct [`CardClient`] call sequence for the current card state and
//! protocol version. Every client fault is classified into exactly one
//! published [`ResultCode`]; nothing escapes the dispatch as a panic or an
//! unclassified error.

use log::{debug, error, info};
use secrecy::SecretString;

use super::backup::{self, BackupLedger};
use super::client::CardClient;
use super::types::{CardError, ResultCode};
use crate::types::{CardStatus, LogEntry, SecretHeader, SecretPayload};

/// The action a caller stages before tapping a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Action {
    /// Detect that a supported card is present without touching a PIN attempt
    #[default]
    DoNothing,
    /// Verify PIN and read status + secret headers
    ScanCard,
    /// Verify PIN and read status + headers on the backup (destination) card
    ScanBackupCard,
    /// Establish the PIN on a fresh card
    SetupCard,
    /// Establish the PIN on a fresh backup card
    SetupCardForBackup,
    /// Verify the old PIN, then commit a new one
    ChangePin,
    /// Update the user-visible card label
    EditCardLabel,
    /// Import one staged secret
    ImportSecret,
    /// Read and decrypt every secret off the source card
    ExportSecretsFromMaster,
    /// Write previously exported secrets to the destination card
    ImportSecretsToBackup,
    /// Fetch the card's internal operation log
    FetchCardLogs,
    /// Wipe all secrets and the PIN
    FactoryReset,
}

impl Action {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Action::DoNothing => "do-nothing",
            Action::ScanCard => "scan-card",
            Action::ScanBackupCard => "scan-backup-card",
            Action::SetupCard => "setup-card",
            Action::SetupCardForBackup => "setup-card-for-backup",
            Action::ChangePin => "change-pin",
            Action::EditCardLabel => "edit-card-label",
            Action::ImportSecret => "import-secret",
            Action::ExportSecretsFromMaster => "export-secrets-from-master",
            Action::ImportSecretsToBackup => "import-secrets-to-backup",
            Action::FetchCardLogs => "fetch-card-logs",
            Action::FactoryReset => "factory-reset",
        }
    }

    /// Which staged inputs this action cannot run without.
    pub(crate) fn required_inputs(&self) -> &'static [RequiredInput] {
        match self {
            Action::DoNothing => &[],
            Action::ScanCard
            | Action::ScanBackupCard
            | Action::SetupCard
            | Action::SetupCardForBackup
            | Action::ExportSecretsFromMaster
            | Action::ImportSecretsToBackup
            | Action::FetchCardLogs => &[RequiredInput::Pin],
            Action::ChangePin => &[RequiredInput::Pin, RequiredInput::NewPin],
            Action::EditCardLabel => &[RequiredInput::Pin, RequiredInput::CardLabel],
            Action::ImportSecret => &[RequiredInput::Pin, RequiredInput::Secret],
            Action::FactoryReset => &[RequiredInput::ResetConfirmation],
        }
    }
}

/// Input kinds an action may require before the tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequiredInput {
    Pin,
    NewPin,
    CardLabel,
    Secret,
    ResetConfirmation,
}

impl RequiredInput {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            RequiredInput::Pin => "pin",
            RequiredInput::NewPin => "new pin",
            RequiredInput::CardLabel => "card label",
            RequiredInput::Secret => "secret payload",
            RequiredInput::ResetConfirmation => "reset confirmation",
        }
    }
}

/// Inputs staged by the caller before the tap.
///
/// Staged input is consumed by exactly one dispatch; cancelling a staged
/// action drops it without sending anything to a card.
#[derive(Clone, Default)]
pub struct StagedInput {
    /// PIN for PIN-guarded actions (also the PIN being established on setup)
    pub pin: Option<SecretString>,
    /// Replacement PIN for [`Action::ChangePin`]
    pub new_pin: Option<SecretString>,
    /// New label for [`Action::EditCardLabel`]
    pub card_label: Option<String>,
    /// Payload and label for [`Action::ImportSecret`]
    pub secret: Option<(SecretPayload, String)>,
    /// Explicit user confirmation required by [`Action::FactoryReset`]
    pub reset_confirmed: bool,
}

impl std::fmt::Debug for StagedInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // PINs are never printed, even at debug level.
        f.debug_struct("StagedInput")
            .field("pin", &self.pin.is_some())
            .field("new_pin", &self.new_pin.is_some())
            .field("card_label", &self.card_label)
            .field("secret", &self.secret.as_ref().map(|(_, label)| label))
            .field("reset_confirmed", &self.reset_confirmed)
            .finish()
    }
}

impl StagedInput {
    pub(crate) fn has(&self, input: RequiredInput) -> bool {
        match input {
            RequiredInput::Pin => self.pin.is_some(),
            RequiredInput::NewPin => self.new_pin.is_some(),
            RequiredInput::CardLabel => self.card_label.is_some(),
            RequiredInput::Secret => self.secret.is_some(),
            RequiredInput::ResetConfirmation => self.reset_confirmed,
        }
    }
}

/// Everything a finished dispatch hands back to the session.
#[derive(Debug, Default)]
pub(crate) struct DispatchOutcome {
    pub result: ResultCode,
    pub tries_left: Option<u8>,
    pub status: Option<CardStatus>,
    pub headers: Option<Vec<SecretHeader>>,
    pub logs: Option<Vec<LogEntry>>,
}

enum DispatchError {
    Card(CardError),
    Missing(&'static str),
}

impl From<CardError> for DispatchError {
    fn from(err: CardError) -> Self {
        DispatchError::Card(err)
    }
}

/// Run one staged action against an open card channel.
///
/// Never panics and never returns an error: every fault is folded into the
/// outcome's result code so the session can publish it.
pub(crate) fn dispatch(
    action: Action,
    staged: &StagedInput,
    ledger: &mut Option<BackupLedger>,
    client: &mut dyn CardClient,
    on_progress: &mut dyn FnMut(usize, usize),
) -> DispatchOutcome {
    debug!("dispatching action: {}", action.name());
    match run(action, staged, ledger, client, on_progress) {
        Ok(outcome) => {
            info!("action {} finished: {}", action.name(), outcome.result);
            outcome
        }
        Err(DispatchError::Card(err)) => {
            let (result, tries_left) = classify(action, &err);
            info!("action {} failed: {}", action.name(), err);
            DispatchOutcome {
                result,
                tries_left,
                ..DispatchOutcome::default()
            }
        }
        Err(DispatchError::Missing(what)) => {
            // Staging validation keeps this path unreachable in practice.
            error!("action {} dispatched without staged {}", action.name(), what);
            DispatchOutcome::default()
        }
    }
}

/// Map one card fault to exactly one published result code.
fn classify(action: Action, err: &CardError) -> (ResultCode, Option<u8>) {
    let code = match err {
        CardError::Communication(_) => ResultCode::CardLost,
        CardError::WrongPin { tries_left } => return (ResultCode::WrongPin, Some(*tries_left)),
        CardError::PinLocked => return (ResultCode::CardBlocked, Some(0)),
        CardError::OversizePayload { .. } | CardError::OversizeLabel { .. } => {
            ResultCode::SecretTooLarge
        }
        CardError::NoMemory => ResultCode::NoMemory,
        CardError::ImportRejected(_) => ResultCode::ImportRefused,
        CardError::SetupRequired => match action {
            Action::ScanBackupCard | Action::SetupCardForBackup => {
                ResultCode::RequireSetupForBackup
            }
            _ => ResultCode::RequireSetup,
        },
        CardError::AlreadySetup => ResultCode::AlreadySetup,
    };
    (code, None)
}

fn staged_pin(staged: &StagedInput) -> Result<&SecretString, DispatchError> {
    staged.pin.as_ref().ok_or(DispatchError::Missing("pin"))
}

fn run(
    action: Action,
    staged: &StagedInput,
    ledger: &mut Option<BackupLedger>,
    client: &mut dyn CardClient,
    on_progress: &mut dyn FnMut(usize, usize),
) -> Result<DispatchOutcome, DispatchError> {
    match action {
        Action::DoNothing => {
            // Identity only; a PIN-guarded command would burn an attempt on
            // a card the user merely waved past the reader.
            let status = client.status()?;
            Ok(DispatchOutcome {
                result: ResultCode::None,
                status: Some(status),
                ..DispatchOutcome::default()
            })
        }

        Action::ScanCard | Action::ScanBackupCard => {
            let backup = action == Action::ScanBackupCard;
            let probe = client.status()?;
            if !probe.setup_done {
                return Ok(DispatchOutcome {
                    result: if backup {
                        ResultCode::RequireSetupForBackup
                    } else {
                        ResultCode::RequireSetup
                    },
                    status: Some(probe),
                    ..DispatchOutcome::default()
                });
            }
            let status = client.verify_pin(staged_pin(staged)?)?;
            let headers = client.list_secret_headers()?;
            if backup {
                let fresh = BackupLedger::new();
                let ledger = ledger.insert(fresh);
                ledger.record_destination_scan(headers.len());
            }
            Ok(DispatchOutcome {
                result: if backup {
                    ResultCode::BackupCardScanned
                } else {
                    ResultCode::CardScanned
                },
                status: Some(status),
                headers: Some(headers),
                ..DispatchOutcome::default()
            })
        }

        Action::SetupCard | Action::SetupCardForBackup => {
            let backup = action == Action::SetupCardForBackup;
            let probe = client.status()?;
            if probe.setup_done {
                return Err(CardError::AlreadySetup.into());
            }
            client.setup(staged_pin(staged)?)?;
            let status = client.status()?;
            Ok(DispatchOutcome {
                result: if backup {
                    ResultCode::SetupForBackupDone
                } else {
                    ResultCode::SetupDone
                },
                status: Some(status),
                ..DispatchOutcome::default()
            })
        }

        Action::ChangePin => {
            let old = staged_pin(staged)?;
            let new = staged.new_pin.as_ref().ok_or(DispatchError::Missing("new pin"))?;
            // The old PIN must verify before the new one goes anywhere near
            // the card.
            let status = client.verify_pin(old)?;
            client.change_pin(old, new)?;
            Ok(DispatchOutcome {
                result: ResultCode::PinChanged,
                status: Some(status),
                ..DispatchOutcome::default()
            })
        }

        Action::EditCardLabel => {
            let label = staged
                .card_label
                .as_ref()
                .ok_or(DispatchError::Missing("card label"))?;
            client.verify_pin(staged_pin(staged)?)?;
            client.set_card_label(label)?;
            let status = client.status()?;
            Ok(DispatchOutcome {
                result: ResultCode::LabelChanged,
                status: Some(status),
                ..DispatchOutcome::default()
            })
        }

        Action::ImportSecret => {
            let (payload, label) = staged
                .secret
                .as_ref()
                .ok_or(DispatchError::Missing("secret payload"))?;
            let probe = client.status()?;
            // Size pre-check against the connected card's own limits; an
            // oversize secret never reaches the import command.
            backup::check_size(payload, label, probe.protocol_version)?;
            client.verify_pin(staged_pin(staged)?)?;
            client.import_secret(payload, label)?;
            let headers = client.list_secret_headers()?;
            let status = client.status()?;
            Ok(DispatchOutcome {
                result: ResultCode::SecretImported,
                status: Some(status),
                headers: Some(headers),
                ..DispatchOutcome::default()
            })
        }

        Action::ExportSecretsFromMaster => {
            let status = client.verify_pin(staged_pin(staged)?)?;
            let ledger = ledger.get_or_insert_with(BackupLedger::new);
            backup::export_all(client, ledger)?;
            Ok(DispatchOutcome {
                result: ResultCode::SecretsExported,
                status: Some(status),
                ..DispatchOutcome::default()
            })
        }

        Action::ImportSecretsToBackup => {
            let ledger = match ledger.as_mut() {
                Some(ledger) if ledger.total_to_import() > 0 => ledger,
                // Nothing was exported; a zero-secret transfer completes
                // trivially.
                empty => {
                    if let Some(ledger) = empty {
                        ledger.complete_empty();
                    }
                    on_progress(0, 0);
                    return Ok(DispatchOutcome {
                        result: ResultCode::CardBackedUp,
                        ..DispatchOutcome::default()
                    });
                }
            };
            // Fresh tap, fresh channel: the destination PIN has to be
            // verified again before any import command. A wrong PIN or a
            // wobbled tag here leaves the flow retryable; a locked card
            // ends it.
            let status = match client.verify_pin(staged_pin(staged)?) {
                Ok(status) => status,
                Err(err) => {
                    if err == CardError::PinLocked {
                        ledger.fail();
                    }
                    return Err(err.into());
                }
            };
            match backup::import_exported(client, status.protocol_version, ledger, on_progress) {
                Ok(()) => Ok(DispatchOutcome {
                    result: ResultCode::CardBackedUp,
                    status: Some(status),
                    ..DispatchOutcome::default()
                }),
                Err(err) => Err(err.into()),
            }
        }

        Action::FetchCardLogs => {
            let status = client.verify_pin(staged_pin(staged)?)?;
            let logs = client.fetch_logs()?;
            Ok(DispatchOutcome {
                result: ResultCode::LogsFetched,
                status: Some(status),
                logs: Some(logs),
                ..DispatchOutcome::default()
            })
        }

        Action::FactoryReset => {
            if !staged.reset_confirmed {
                return Err(DispatchError::Missing("reset confirmation"));
            }
            client.factory_reset()?;
            let status = client.status()?;
            Ok(DispatchOutcome {
                result: ResultCode::CardReset,
                status: Some(status),
                ..DispatchOutcome::default()
            })
        }
    }
}
