//! Session lifecycle integration tests.
//!
//! These exercise the connection state machine through the public API with
//! an in-memory card: reconnect debouncing, timeout supersession, the
//! no-leakage guarantee on accepted reconnects, and exactly-once disconnect
//! delivery on both the success and the error path.

use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use secrecy::SecretString;

use cardkeeper::card::{
    Action, CardClient, CardError, ConnectionPhase, MockCard, ResultCode, SessionConfig,
    SessionEvent, SessionManager, StagedInput,
};
use cardkeeper::{CardStatus, Error, LogEntry, SecretHeader, SecretId, SecretPayload};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn pin(s: &str) -> SecretString {
    SecretString::new(s.to_string())
}

fn scan_input(p: &str) -> StagedInput {
    StagedInput {
        pin: Some(pin(p)),
        ..StagedInput::default()
    }
}

/// Card wrapper that parks inside its first command until released, so a
/// test can hold a session in `Executing` while poking it from another
/// thread.
struct BlockingCard {
    inner: MockCard,
    started: Sender<()>,
    release: Receiver<()>,
    blocked_once: bool,
}

impl BlockingCard {
    fn new(inner: MockCard) -> (Self, Receiver<()>, Sender<()>) {
        let (started_tx, started_rx) = channel();
        let (release_tx, release_rx) = channel();
        (
            Self {
                inner,
                started: started_tx,
                release: release_rx,
                blocked_once: false,
            },
            started_rx,
            release_tx,
        )
    }

    fn block_point(&mut self) {
        if !self.blocked_once {
            self.blocked_once = true;
            let _ = self.started.send(());
            let _ = self.release.recv();
        }
    }
}

impl CardClient for BlockingCard {
    fn status(&mut self) -> Result<CardStatus, CardError> {
        self.block_point();
        self.inner.status()
    }

    fn verify_pin(&mut self, pin: &SecretString) -> Result<CardStatus, CardError> {
        self.inner.verify_pin(pin)
    }

    fn setup(&mut self, pin: &SecretString) -> Result<(), CardError> {
        self.inner.setup(pin)
    }

    fn change_pin(&mut self, old: &SecretString, new: &SecretString) -> Result<(), CardError> {
        self.inner.change_pin(old, new)
    }

    fn list_secret_headers(&mut self) -> Result<Vec<SecretHeader>, CardError> {
        self.inner.list_secret_headers()
    }

    fn export_secret(&mut self, header: &SecretHeader) -> Result<SecretPayload, CardError> {
        self.inner.export_secret(header)
    }

    fn import_secret(
        &mut self,
        payload: &SecretPayload,
        label: &str,
    ) -> Result<SecretId, CardError> {
        self.inner.import_secret(payload, label)
    }

    fn set_card_label(&mut self, label: &str) -> Result<(), CardError> {
        self.inner.set_card_label(label)
    }

    fn factory_reset(&mut self) -> Result<(), CardError> {
        self.inner.factory_reset()
    }

    fn fetch_logs(&mut self) -> Result<Vec<LogEntry>, CardError> {
        self.inner.fetch_logs()
    }
}

#[test]
fn scan_publishes_result_and_headers() {
    let session = SessionManager::new();
    let mut card = MockCard::initialized("1234")
        .with_password_secret("mail", "hunter2")
        .with_password_secret("bank", "letmein");

    session.stage_action(Action::ScanCard, scan_input("1234")).unwrap();
    session.on_connected(&mut card);

    assert_eq!(session.result_code(), ResultCode::CardScanned);
    assert_eq!(session.connection_phase(), ConnectionPhase::Idle);
    assert!(!session.is_connected());
    let headers = session.secret_headers();
    assert_eq!(headers.len(), 2);
    assert_eq!(headers[0].label, "mail");
    assert_eq!(headers[1].label, "bank");
}

#[test]
fn second_connect_within_debounce_window_is_dropped() {
    init_logging();
    let session = Arc::new(SessionManager::new());
    let (mut blocking, started, release) = BlockingCard::new(MockCard::initialized("1234"));

    session.stage_action(Action::ScanCard, scan_input("1234")).unwrap();

    let worker = {
        let session = Arc::clone(&session);
        thread::spawn(move || {
            session.on_connected(&mut blocking);
            blocking.inner.journal
        })
    };
    started.recv().unwrap();
    assert_eq!(session.connection_phase(), ConnectionPhase::Executing);

    // A wobbling tag re-triggers discovery mid-operation; the event must
    // not reach the second card at all.
    let mut second = MockCard::initialized("1234");
    session.on_connected(&mut second);
    assert!(second.journal.is_empty());

    release.send(()).unwrap();
    let first_journal = worker.join().unwrap();
    assert!(first_journal.contains(&"list_secret_headers"));
    assert_eq!(session.result_code(), ResultCode::CardScanned);
}

#[test]
fn connect_after_timeout_supersedes_stale_operation() {
    init_logging();
    let config = SessionConfig {
        debounce_window: Duration::from_millis(50),
        operation_timeout: Duration::from_millis(50),
    };
    let session = Arc::new(SessionManager::with_config(config));
    let source = MockCard::initialized("1234").with_password_secret("mail", "hunter2");
    let (mut blocking, started, release) = BlockingCard::new(source);

    session.stage_action(Action::ScanCard, scan_input("1234")).unwrap();

    let worker = {
        let session = Arc::clone(&session);
        thread::spawn(move || session.on_connected(&mut blocking))
    };
    started.recv().unwrap();

    // No disconnect ever arrives for the stuck connection; once the
    // timeout elapses a new tap takes ownership.
    thread::sleep(Duration::from_millis(80));
    session.stage_action(Action::ScanCard, scan_input("1234")).unwrap();
    let mut fresh = MockCard::initialized("1234");
    session.on_connected(&mut fresh);

    assert_eq!(session.result_code(), ResultCode::CardScanned);
    assert!(session.secret_headers().is_empty());

    // The stale operation finishing late must not clobber the new state.
    release.send(()).unwrap();
    worker.join().unwrap();
    assert_eq!(session.result_code(), ResultCode::CardScanned);
    assert!(session.secret_headers().is_empty());
}

#[test]
fn accepted_reconnect_clears_previous_session_data() {
    let session = SessionManager::new();
    let mut first = MockCard::initialized("1111").with_password_secret("mail", "hunter2");
    session.stage_action(Action::ScanCard, scan_input("1111")).unwrap();
    session.on_connected(&mut first);
    assert_eq!(session.secret_headers().len(), 1);

    // A different card with a different PIN: the wrong-PIN result must not
    // come with the previous card's headers still visible.
    let mut second = MockCard::initialized("2222");
    session.stage_action(Action::ScanCard, scan_input("9999")).unwrap();
    session.on_connected(&mut second);

    assert_eq!(session.result_code(), ResultCode::WrongPin);
    assert_eq!(session.tries_left(), Some(2));
    assert!(session.secret_headers().is_empty());
    assert_eq!(session.card_status(), None);
}

#[test]
fn disconnect_fires_exactly_once_per_connection() {
    let session = SessionManager::new();
    let events = session.subscribe();
    let mut card = MockCard::initialized("1234");

    session.stage_action(Action::ScanCard, scan_input("1234")).unwrap();
    session.on_connected(&mut card);
    // Hardware often reports the tag leaving after the manager already
    // released the connection.
    session.on_disconnected();
    session.on_disconnected();

    let received: Vec<SessionEvent> = events.try_iter().collect();
    let disconnects = received
        .iter()
        .filter(|e| matches!(e, SessionEvent::Connected(false)))
        .count();
    assert_eq!(disconnects, 1);
}

#[test]
fn disconnect_fires_once_on_the_error_path_too() {
    let session = SessionManager::new();
    let events = session.subscribe();
    let mut card = MockCard::initialized("1234");
    card.inject_failure("status", CardError::Communication("tag lost".into()));

    session.stage_action(Action::ScanCard, scan_input("1234")).unwrap();
    session.on_connected(&mut card);

    assert_eq!(session.result_code(), ResultCode::CardLost);
    let received: Vec<SessionEvent> = events.try_iter().collect();
    let disconnects = received
        .iter()
        .filter(|e| matches!(e, SessionEvent::Connected(false)))
        .count();
    assert_eq!(disconnects, 1);
}

#[test]
fn result_is_published_before_the_disconnect() {
    let session = SessionManager::new();
    let events = session.subscribe();
    let mut card = MockCard::initialized("1234");

    session.stage_action(Action::ScanCard, scan_input("1234")).unwrap();
    session.on_connected(&mut card);

    let received: Vec<SessionEvent> = events.try_iter().collect();
    let result_pos = received
        .iter()
        .position(|e| matches!(e, SessionEvent::Result(ResultCode::CardScanned)))
        .expect("final result event");
    let disconnect_pos = received
        .iter()
        .position(|e| matches!(e, SessionEvent::Connected(false)))
        .expect("disconnect event");
    assert!(result_pos < disconnect_pos);
}

#[test]
fn cancel_discards_staged_input() {
    let session = SessionManager::new();
    session.stage_action(Action::ScanCard, scan_input("1234")).unwrap();
    session.cancel().unwrap();

    // The next tap runs nothing PIN-guarded: the staged scan is gone.
    let mut card = MockCard::initialized("1234");
    session.on_connected(&mut card);
    assert_eq!(card.journal, vec!["status"]);
    assert_eq!(session.result_code(), ResultCode::None);
}

#[test]
fn cancel_is_refused_while_executing() {
    let session = Arc::new(SessionManager::new());
    let (mut blocking, started, release) = BlockingCard::new(MockCard::initialized("1234"));

    session.stage_action(Action::ScanCard, scan_input("1234")).unwrap();
    let worker = {
        let session = Arc::clone(&session);
        thread::spawn(move || session.on_connected(&mut blocking))
    };
    started.recv().unwrap();

    assert!(matches!(session.cancel(), Err(Error::Busy)));
    assert!(matches!(
        session.stage_action(Action::ScanCard, scan_input("1234")),
        Err(Error::Busy)
    ));

    release.send(()).unwrap();
    worker.join().unwrap();
    session.cancel().unwrap();
}

#[test]
fn staged_action_is_one_shot() {
    let session = SessionManager::new();
    let mut card = MockCard::initialized("1234");

    session.stage_action(Action::ScanCard, scan_input("1234")).unwrap();
    session.on_connected(&mut card);
    assert_eq!(session.result_code(), ResultCode::CardScanned);

    // A second tap without re-staging must not re-run the scan.
    let mut again = MockCard::initialized("1234");
    session.on_connected(&mut again);
    assert_eq!(again.journal, vec!["status"]);
}

#[test]
fn connected_flag_is_visible_while_executing() {
    let session = Arc::new(SessionManager::new());
    let (mut blocking, started, release) = BlockingCard::new(MockCard::initialized("1234"));

    session.stage_action(Action::ScanCard, scan_input("1234")).unwrap();
    let worker = {
        let session = Arc::clone(&session);
        thread::spawn(move || session.on_connected(&mut blocking))
    };
    started.recv().unwrap();

    assert!(session.is_connected());
    assert_eq!(session.result_code(), ResultCode::Busy);

    release.send(()).unwrap();
    worker.join().unwrap();
    assert!(!session.is_connected());
}
