//! Card session management.
//!
//! The session manager owns the lifecycle of a single contactless
//! connection. Connect/disconnect callbacks arrive on the platform's radio
//! thread; the manager debounces spurious reconnections, enforces an
//! operation timeout, runs the staged action through the dispatcher, and
//! publishes the outcome for observers on other threads.
//!
//! The original hardware API this replaces was callback-driven with shared
//! mutable flags and sleep-based race avoidance; here the connection is an
//! explicit state machine with a single mutex-guarded source of truth and a
//! monotonic-clock timeout.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use parking_lot::Mutex;

use super::backup::{BackupLedger, BackupStep};
use super::client::CardClient;
use super::dispatch::{self, Action, StagedInput};
use super::types::{ConnectionPhase, ResultCode};
use crate::error::{Error, Result};
use crate::types::{CardStatus, LogEntry, SecretHeader};

/// Timing knobs for the session manager.
///
/// The reconnect debounce and the stuck-operation backstop are separate
/// concerns even though they share a default; an in-flight operation is
/// only superseded once both windows have passed.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Window during which a second connect event is treated as the same
    /// physical tap wobbling against the reader, and dropped.
    pub debounce_window: Duration,
    /// Hard ceiling on how long a connection may count as in-progress.
    /// Disconnect events are not reliably delivered by contactless
    /// hardware, so this is the backstop against a permanently busy
    /// session.
    pub operation_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_millis(5000),
            operation_timeout: Duration::from_millis(5000),
        }
    }
}

/// State change notifications delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The published result code changed
    Result(ResultCode),
    /// The card-connected flag flipped
    Connected(bool),
    /// Multi-secret operation progress: (imported so far, total to import)
    Progress {
        /// Secrets imported so far
        imported: usize,
        /// Total secrets to import
        total: usize,
    },
}

/// Per-tap session state, guarded by one mutex.
struct SessionInner {
    phase: ConnectionPhase,
    started_at: Option<Instant>,
    /// Bumped on every accepted connection; a dispatch that outlived its
    /// timeout and got superseded finds the generation moved on and its
    /// result is discarded.
    generation: u64,
    action: Action,
    staged: StagedInput,
    last_result: ResultCode,
    tries_left: Option<u8>,
    status: Option<CardStatus>,
    headers: Vec<SecretHeader>,
    logs: Vec<LogEntry>,
    ledger: Option<BackupLedger>,
    disconnect_delivered: bool,
}

impl Default for SessionInner {
    fn default() -> Self {
        Self {
            phase: ConnectionPhase::Idle,
            started_at: None,
            generation: 0,
            action: Action::DoNothing,
            staged: StagedInput::default(),
            last_result: ResultCode::None,
            tries_left: None,
            status: None,
            headers: Vec::new(),
            logs: Vec::new(),
            ledger: None,
            // No connection has been accepted yet, so there is no
            // disconnect owed to anyone.
            disconnect_delivered: true,
        }
    }
}

impl SessionInner {
    /// Clear everything a previous tap may have left behind. The backup
    /// ledger is flow-scoped, not tap-scoped, and survives; staged input is
    /// what the upcoming dispatch will consume and survives too.
    fn reset_for_new_tap(&mut self) {
        self.last_result = ResultCode::None;
        self.tries_left = None;
        self.status = None;
        self.headers.clear();
        self.logs.clear();
    }
}

/// Mediator between raw connect/disconnect hardware events and a single
/// logical operation per physical tap.
///
/// One instance owns one reader. All methods take `&self`; internal state
/// is mutex-guarded so the radio-thread callbacks and UI-thread observers
/// never see a half-updated session.
///
/// # Usage
///
/// ```no_run
/// use cardkeeper::card::{Action, MockCard, SessionManager, StagedInput};
/// use secrecy::SecretString;
///
/// let session = SessionManager::new();
/// session.stage_action(
///     Action::ScanCard,
///     StagedInput {
///         pin: Some(SecretString::new("123456".to_string())),
///         ..StagedInput::default()
///     },
/// ).unwrap();
///
/// // Radio thread, on tag discovery:
/// let mut card = MockCard::initialized("123456");
/// session.on_connected(&mut card);
/// println!("result: {}", session.result_code());
/// ```
pub struct SessionManager {
    config: SessionConfig,
    inner: Mutex<SessionInner>,
    connected: AtomicBool,
    progress_done: AtomicUsize,
    progress_total: AtomicUsize,
    subscribers: Mutex<Vec<Sender<SessionEvent>>>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    /// Create a session manager with default timing.
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    /// Create a session manager with explicit timing knobs.
    pub fn with_config(config: SessionConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(SessionInner::default()),
            connected: AtomicBool::new(false),
            progress_done: AtomicUsize::new(0),
            progress_total: AtomicUsize::new(0),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    // ==================== staging ====================

    /// Stage the action (and its inputs) the next accepted tap will run.
    ///
    /// Staged input is consumed by exactly one dispatch; after the
    /// operation completes the session reverts to [`Action::DoNothing`].
    ///
    /// # Errors
    ///
    /// * [`Error::Busy`] while an operation is executing and has not
    ///   exceeded its timeout
    /// * [`Error::MissingInput`] when the action needs input that was not
    ///   provided (a PIN, a payload, the factory-reset confirmation)
    pub fn stage_action(&self, action: Action, staged: StagedInput) -> Result<()> {
        for input in action.required_inputs() {
            if !staged.has(*input) {
                return Err(Error::MissingInput(input.name()));
            }
        }
        let mut inner = self.inner.lock();
        if inner.phase == ConnectionPhase::Executing && !self.operation_expired(&inner) {
            return Err(Error::Busy);
        }
        debug!("staging action: {}", action.name());
        inner.action = action;
        inner.staged = staged;
        inner.last_result = ResultCode::None;
        inner.tries_left = None;
        self.publish(SessionEvent::Result(ResultCode::None));
        Ok(())
    }

    /// Discard staged input and return the session to idle.
    ///
    /// Permitted any time an operation is not executing; an operation that
    /// has begun runs to completion or to its own timeout.
    pub fn cancel(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.phase == ConnectionPhase::Executing && !self.operation_expired(&inner) {
            return Err(Error::Busy);
        }
        inner.action = Action::DoNothing;
        inner.staged = StagedInput::default();
        inner.phase = ConnectionPhase::Idle;
        inner.started_at = None;
        inner.last_result = ResultCode::None;
        inner.tries_left = None;
        self.publish(SessionEvent::Result(ResultCode::None));
        Ok(())
    }

    /// Abandon an in-flight backup flow and drop its ledger.
    ///
    /// # Errors
    ///
    /// * [`Error::Busy`] once the import phase has started writing to the
    ///   destination card; from that point the transfer runs to its end.
    pub fn cancel_backup(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match &inner.ledger {
            None => Ok(()),
            Some(ledger)
                if ledger.can_cancel()
                    || matches!(ledger.step(), BackupStep::Complete | BackupStep::Failed) =>
            {
                info!("backup flow cancelled");
                inner.ledger = None;
                Ok(())
            }
            Some(_) => Err(Error::Busy),
        }
    }

    // ==================== radio-thread callbacks ====================

    /// Handle a tag-discovered event. Runs the staged action synchronously
    /// on the calling thread, bounded by one command sequence.
    ///
    /// A connect that arrives while a previous operation is still live is
    /// dropped; once both the debounce window and the operation timeout
    /// have passed, the stale session is discarded and the new connection
    /// takes ownership.
    pub fn on_connected(&self, client: &mut dyn CardClient) {
        let (action, staged, mut ledger, generation) = {
            let mut inner = self.inner.lock();
            if inner.phase == ConnectionPhase::Executing {
                if !self.operation_expired(&inner) {
                    debug!("connect event debounced; operation already executing");
                    return;
                }
                warn!("stale executing session superseded by new connection");
                // The stale connection never produced a disconnect; close
                // its books before the new one opens.
                self.deliver_disconnect(&mut inner);
            }
            inner.reset_for_new_tap();
            inner.generation = inner.generation.wrapping_add(1);
            inner.phase = ConnectionPhase::Connecting;
            inner.started_at = Some(Instant::now());
            inner.disconnect_delivered = false;
            self.progress_done.store(0, Ordering::SeqCst);
            self.progress_total.store(0, Ordering::SeqCst);
            self.connected.store(true, Ordering::SeqCst);
            self.publish(SessionEvent::Connected(true));

            inner.phase = ConnectionPhase::Executing;
            inner.last_result = ResultCode::Busy;
            self.publish(SessionEvent::Result(ResultCode::Busy));

            (
                inner.action,
                inner.staged.clone(),
                inner.ledger.take(),
                inner.generation,
            )
        };
        info!("connection accepted, executing {}", action.name());

        // The inner lock is released while the dispatcher runs so observers
        // stay responsive; the dispatch result is applied in one step below.
        let mut on_progress = |imported: usize, total: usize| {
            self.progress_done.store(imported, Ordering::SeqCst);
            self.progress_total.store(total, Ordering::SeqCst);
            self.publish(SessionEvent::Progress { imported, total });
        };
        let outcome = dispatch::dispatch(action, &staged, &mut ledger, client, &mut on_progress);
        let result = outcome.result;

        let mut inner = self.inner.lock();
        if inner.generation != generation {
            // This operation ran past its timeout and a newer connection
            // took ownership; its books are already closed.
            warn!("discarding result of superseded operation");
            return;
        }
        inner.last_result = result;
        inner.tries_left = outcome.tries_left;
        if let Some(status) = outcome.status {
            inner.status = Some(status);
        }
        if let Some(headers) = outcome.headers {
            inner.headers = headers;
        }
        if let Some(logs) = outcome.logs {
            inner.logs = logs;
        }
        inner.ledger = ledger;
        // Staged input is one-shot; the next tap does nothing unless the
        // caller stages again.
        inner.action = Action::DoNothing;
        inner.staged = StagedInput::default();
        inner.phase = ConnectionPhase::Disconnected;
        // The result goes out before the disconnect: observers treat the
        // connected flag flipping to false as an implicit cancel signal.
        self.publish(SessionEvent::Result(result));
        self.deliver_disconnect(&mut inner);
        inner.phase = ConnectionPhase::Idle;
        inner.started_at = None;
    }

    /// Handle a tag-lost event.
    ///
    /// Safe to call redundantly: the disconnect is delivered exactly once
    /// per accepted connection, whether it comes from the hardware or from
    /// the manager's own teardown.
    pub fn on_disconnected(&self) {
        let mut inner = self.inner.lock();
        self.deliver_disconnect(&mut inner);
        if inner.phase != ConnectionPhase::Executing {
            inner.phase = ConnectionPhase::Idle;
            inner.started_at = None;
        }
    }

    // ==================== published state ====================

    /// Whether a card is currently connected. Observers treat a flip to
    /// `false` as the "card removed" cancel signal.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Result of the last completed operation.
    pub fn result_code(&self) -> ResultCode {
        self.inner.lock().last_result
    }

    /// Remaining PIN attempts, when the last result reported a PIN problem.
    pub fn tries_left(&self) -> Option<u8> {
        self.inner.lock().tries_left
    }

    /// Current phase of the connection state machine.
    pub fn connection_phase(&self) -> ConnectionPhase {
        self.inner.lock().phase
    }

    /// Progress of the current multi-secret operation in `[0, 1]`.
    pub fn progress(&self) -> f32 {
        let total = self.progress_total.load(Ordering::SeqCst);
        if total == 0 {
            return 0.0;
        }
        self.progress_done.load(Ordering::SeqCst) as f32 / total as f32
    }

    /// Status block read during the last successful operation.
    pub fn card_status(&self) -> Option<CardStatus> {
        self.inner.lock().status.clone()
    }

    /// Secret headers fetched during the last successful scan.
    pub fn secret_headers(&self) -> Vec<SecretHeader> {
        self.inner.lock().headers.clone()
    }

    /// Card operation log fetched by the last log request.
    pub fn card_logs(&self) -> Vec<LogEntry> {
        self.inner.lock().logs.clone()
    }

    /// Snapshot of the in-flight (or finished) backup flow.
    pub fn backup_ledger(&self) -> Option<BackupLedger> {
        self.inner.lock().ledger.clone()
    }

    /// Subscribe to state change events. Dead receivers are pruned on the
    /// next publish.
    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        let (tx, rx) = channel();
        self.subscribers.lock().push(tx);
        rx
    }

    // ==================== internals ====================

    /// An executing operation is superseded only once both the debounce
    /// window and the operation timeout have passed.
    fn operation_expired(&self, inner: &SessionInner) -> bool {
        match inner.started_at {
            Some(started) => {
                let elapsed = started.elapsed();
                elapsed >= self.config.debounce_window
                    && elapsed >= self.config.operation_timeout
            }
            None => true,
        }
    }

    fn deliver_disconnect(&self, inner: &mut SessionInner) {
        if inner.disconnect_delivered {
            return;
        }
        inner.disconnect_delivered = true;
        self.connected.store(false, Ordering::SeqCst);
        self.publish(SessionEvent::Connected(false));
        debug!("card disconnected");
    }

    fn publish(&self, event: SessionEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_five_second_windows() {
        let config = SessionConfig::default();
        assert_eq!(config.debounce_window, Duration::from_millis(5000));
        assert_eq!(config.operation_timeout, Duration::from_millis(5000));
    }

    #[test]
    fn progress_is_zero_without_a_total() {
        let session = SessionManager::new();
        assert_eq!(session.progress(), 0.0);
    }

    #[test]
    fn staging_requires_declared_inputs() {
        let session = SessionManager::new();
        let err = session
            .stage_action(Action::ScanCard, StagedInput::default())
            .unwrap_err();
        assert!(matches!(err, Error::MissingInput("pin")));

        let err = session
            .stage_action(Action::FactoryReset, StagedInput::default())
            .unwrap_err();
        assert!(matches!(err, Error::MissingInput("reset confirmation")));
    }
}
