//! Runs one session from accepted connection to termination.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::callback::CallbackSlots;
use crate::session::{ClientRegistry, ConnectionState, Session};
use crate::transport::{Accepted, ProtocolEngine};

/// Per-session settings applied by the handler.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HandlerOptions {
    pub handshake_timeout: Duration,
    pub enable_pong: bool,
    pub enable_per_message_deflate: bool,
}

/// Marks the connection terminated when dropped, on every exit path.
struct TerminateOnExit(Arc<ConnectionState>);

impl Drop for TerminateOnExit {
    fn drop(&mut self) {
        self.0.set_terminated();
    }
}

/// Registry membership of one session. Dropping it clears the session's
/// message callback, then removes the session from the registry.
struct Registration<'a> {
    registry: &'a ClientRegistry,
    session: &'a Session,
}

impl<'a> Registration<'a> {
    fn add(registry: &'a ClientRegistry, session: &'a Arc<Session>) -> Self {
        match registry.add(Arc::clone(session)) {
            Ok(true) => {}
            Ok(false) => warn!(id = %session.id(), "session was already registered"),
            Err(e) => error!(id = %session.id(), error = %e, "cannot register client"),
        }
        Self { registry, session }
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.session.clear_on_message_callback();
        match self.registry.remove(&self.session.id()) {
            Ok(true) => {}
            Ok(false) => error!(id = %self.session.id(), "cannot delete client: not registered"),
            Err(e) => error!(id = %self.session.id(), error = %e, "cannot delete client"),
        }
    }
}

/// Drives accepted connections through contract validation, registration,
/// handshake and the receive loop.
pub(crate) struct ConnectionHandler {
    options: HandlerOptions,
    registry: Arc<ClientRegistry>,
    callbacks: Arc<Mutex<CallbackSlots>>,
    /// Cancelled by the server before it snapshots the registry to close
    /// sessions.
    shutdown: CancellationToken,
}

impl ConnectionHandler {
    pub(crate) fn new(
        options: HandlerOptions,
        registry: Arc<ClientRegistry>,
        callbacks: Arc<Mutex<CallbackSlots>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            options,
            registry,
            callbacks,
            shutdown,
        }
    }

    /// Run one session to completion.
    ///
    /// Never fails outward: every problem is scoped to this connection and
    /// reported where it is detected.
    pub(crate) async fn handle<E: ProtocolEngine>(
        &self,
        mut engine: E,
        accepted: Accepted<E::Connection>,
    ) {
        let Accepted {
            connection,
            state,
            info,
        } = accepted;
        let _terminated = TerminateOnExit(Arc::clone(&state));
        let session = Arc::new(Session::new(state.id()));

        let contract = match self.callbacks.lock() {
            Ok(slots) => slots.contract(),
            Err(_) => {
                error!("callback registry lock poisoned, dropping connection");
                return;
            }
        };
        if let Err(violation) = contract.apply(&session, &state, info) {
            for line in violation.diagnostics() {
                error!("{line}");
            }
            return;
        }

        session.disable_automatic_reconnection();
        if self.options.enable_pong {
            session.enable_pong();
        } else {
            session.disable_pong();
        }
        if self.options.enable_per_message_deflate {
            session.enable_per_message_deflate();
        } else {
            session.disable_per_message_deflate();
        }

        let _registered = Registration::add(&self.registry, &session);
        // The server may already have taken its close snapshot.
        if self.shutdown.is_cancelled() {
            debug!("server is stopping, closing session after handshake");
            session.close();
        }

        let status = engine
            .handshake(connection, &session, self.options.handshake_timeout)
            .await;
        if status.success {
            debug!("handshake complete, entering receive loop");
            session.mark_established();
            engine.run(&session).await;
        } else {
            error!(
                "handle_connection() HTTP status: {} error: {}",
                status.http_status, status.error
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::callback::{OnClientMessageCallback, OnConnectionCallback};
    use crate::session::{ConnectionInfo, Message, SessionEvent};
    use crate::transport::HandshakeStatus;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Engine with a scripted handshake outcome that records what the
    /// handler did around it.
    struct ScriptedEngine {
        outcome: HandshakeStatus,
        handshake_delay: Duration,
        registry: Arc<ClientRegistry>,
        observed: Arc<Observed>,
    }

    #[derive(Default)]
    struct Observed {
        count_at_handshake: AtomicUsize,
        count_during_run: AtomicUsize,
        ran: AtomicBool,
        established_during_run: AtomicBool,
        close_requested_during_run: AtomicBool,
        pong_enabled: AtomicBool,
        deflate_enabled: AtomicBool,
        auto_reconnect: AtomicBool,
    }

    impl ProtocolEngine for ScriptedEngine {
        type Connection = ();

        async fn handshake(
            &mut self,
            _connection: (),
            session: &Session,
            deadline: Duration,
        ) -> HandshakeStatus {
            self.observed
                .count_at_handshake
                .store(self.registry.count(), Ordering::SeqCst);
            self.observed
                .pong_enabled
                .store(session.is_pong_enabled(), Ordering::SeqCst);
            self.observed
                .deflate_enabled
                .store(session.is_per_message_deflate_enabled(), Ordering::SeqCst);
            self.observed
                .auto_reconnect
                .store(session.is_automatic_reconnection_enabled(), Ordering::SeqCst);

            match tokio::time::timeout(deadline, tokio::time::sleep(self.handshake_delay)).await {
                Ok(()) => self.outcome.clone(),
                Err(_) => HandshakeStatus::failed(408, "timed out"),
            }
        }

        async fn run(&mut self, session: &Session) {
            self.observed.ran.store(true, Ordering::SeqCst);
            self.observed
                .established_during_run
                .store(session.is_established(), Ordering::SeqCst);
            self.observed
                .close_requested_during_run
                .store(session.is_close_requested(), Ordering::SeqCst);
            self.observed
                .count_during_run
                .store(self.registry.count(), Ordering::SeqCst);
            session.dispatch(&SessionEvent::Message(Message::from("hello")));
        }
    }

    fn options() -> HandlerOptions {
        HandlerOptions {
            handshake_timeout: Duration::from_secs(3),
            enable_pong: true,
            enable_per_message_deflate: true,
        }
    }

    fn accepted() -> Accepted<()> {
        Accepted {
            connection: (),
            state: Arc::new(ConnectionState::new("127.0.0.1:1234")),
            info: ConnectionInfo::new("127.0.0.1:1234".parse().unwrap(), None),
        }
    }

    fn setup(
        slots: CallbackSlots,
        options: HandlerOptions,
        outcome: HandshakeStatus,
    ) -> (ConnectionHandler, ScriptedEngine, Arc<ClientRegistry>, Arc<Observed>) {
        let registry = Arc::new(ClientRegistry::new());
        let observed = Arc::new(Observed::default());
        let handler = ConnectionHandler::new(
            options,
            Arc::clone(&registry),
            Arc::new(Mutex::new(slots)),
            CancellationToken::new(),
        );
        let engine = ScriptedEngine {
            outcome,
            handshake_delay: Duration::ZERO,
            registry: Arc::clone(&registry),
            observed: Arc::clone(&observed),
        };
        (handler, engine, registry, observed)
    }

    fn counting_client_message(hits: Arc<AtomicUsize>) -> OnClientMessageCallback {
        Arc::new(
            move |_: &Arc<ConnectionState>, _: &ConnectionInfo, _: &Session, event: &SessionEvent| {
                if matches!(event, SessionEvent::Message(_)) {
                    hits.fetch_add(1, Ordering::SeqCst);
                }
            },
        )
    }

    #[tokio::test]
    async fn test_unconfigured_terminates_without_registering() {
        let (handler, engine, registry, observed) =
            setup(CallbackSlots::default(), options(), HandshakeStatus::accepted());
        let accepted = accepted();
        let state = Arc::clone(&accepted.state);

        handler.handle(engine, accepted).await;

        assert!(state.is_terminated());
        assert_eq!(registry.count(), 0);
        assert!(!observed.ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_connection_callback_without_handler_terminates() {
        let mut slots = CallbackSlots::default();
        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let on_connection: OnConnectionCallback = Arc::new(
            move |_: &Arc<Session>, _: &Arc<ConnectionState>, _: ConnectionInfo| {
                flag.store(true, Ordering::SeqCst);
            },
        );
        slots.set_on_connection(on_connection).unwrap();
        let (handler, engine, registry, observed) =
            setup(slots, options(), HandshakeStatus::accepted());
        let accepted = accepted();
        let state = Arc::clone(&accepted.state);

        handler.handle(engine, accepted).await;

        assert!(called.load(Ordering::SeqCst));
        assert!(state.is_terminated());
        assert_eq!(registry.count(), 0);
        assert_eq!(observed.count_at_handshake.load(Ordering::SeqCst), 0);
        assert!(!observed.ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_successful_session_lifecycle() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut slots = CallbackSlots::default();
        slots
            .set_on_client_message(counting_client_message(Arc::clone(&hits)))
            .unwrap();
        let (handler, engine, registry, observed) =
            setup(slots, options(), HandshakeStatus::accepted());
        let accepted = accepted();
        let state = Arc::clone(&accepted.state);

        handler.handle(engine, accepted).await;

        // Registered before the handshake and while the loop ran
        assert_eq!(observed.count_at_handshake.load(Ordering::SeqCst), 1);
        assert_eq!(observed.count_during_run.load(Ordering::SeqCst), 1);
        assert!(observed.ran.load(Ordering::SeqCst));
        assert!(observed.established_during_run.load(Ordering::SeqCst));
        assert!(!observed.close_requested_during_run.load(Ordering::SeqCst));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Options applied, reconnection disabled
        assert!(observed.pong_enabled.load(Ordering::SeqCst));
        assert!(observed.deflate_enabled.load(Ordering::SeqCst));
        assert!(!observed.auto_reconnect.load(Ordering::SeqCst));

        // Removed and terminated afterwards
        assert_eq!(registry.count(), 0);
        assert!(state.is_terminated());
    }

    #[tokio::test]
    async fn test_options_can_be_disabled() {
        let mut slots = CallbackSlots::default();
        slots
            .set_on_client_message(counting_client_message(Arc::new(AtomicUsize::new(0))))
            .unwrap();
        let opts = HandlerOptions {
            enable_pong: false,
            enable_per_message_deflate: false,
            ..options()
        };
        let (handler, engine, _registry, observed) = setup(slots, opts, HandshakeStatus::accepted());

        handler.handle(engine, accepted()).await;

        assert!(!observed.pong_enabled.load(Ordering::SeqCst));
        assert!(!observed.deflate_enabled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_handshake_failure_skips_receive_loop() {
        let mut slots = CallbackSlots::default();
        slots
            .set_on_client_message(counting_client_message(Arc::new(AtomicUsize::new(0))))
            .unwrap();
        let (handler, engine, registry, observed) =
            setup(slots, options(), HandshakeStatus::failed(400, "bad upgrade"));
        let accepted = accepted();
        let state = Arc::clone(&accepted.state);

        handler.handle(engine, accepted).await;

        assert!(!observed.ran.load(Ordering::SeqCst));
        assert_eq!(registry.count(), 0);
        assert!(state.is_terminated());
    }

    #[tokio::test]
    async fn test_handshake_deadline_exceeded() {
        let mut slots = CallbackSlots::default();
        slots
            .set_on_client_message(counting_client_message(Arc::new(AtomicUsize::new(0))))
            .unwrap();
        let opts = HandlerOptions {
            handshake_timeout: Duration::from_millis(20),
            ..options()
        };
        let (handler, mut engine, registry, observed) =
            setup(slots, opts, HandshakeStatus::accepted());
        engine.handshake_delay = Duration::from_secs(5);
        let accepted = accepted();
        let state = Arc::clone(&accepted.state);

        handler.handle(engine, accepted).await;

        assert!(!observed.ran.load(Ordering::SeqCst));
        assert_eq!(registry.count(), 0);
        assert!(state.is_terminated());
    }

    #[tokio::test]
    async fn test_message_callback_cleared_on_teardown() {
        let kept: Arc<Mutex<Option<Arc<Session>>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&kept);
        let on_connection: OnConnectionCallback = Arc::new(
            move |session: &Arc<Session>, _: &Arc<ConnectionState>, _: ConnectionInfo| {
                session.set_on_message_callback(|_| {});
                *slot.lock().unwrap() = Some(Arc::clone(session));
            },
        );
        let mut slots = CallbackSlots::default();
        slots.set_on_connection(on_connection).unwrap();
        let (handler, engine, _registry, _observed) =
            setup(slots, options(), HandshakeStatus::accepted());

        handler.handle(engine, accepted()).await;

        let session = kept.lock().unwrap().take().unwrap();
        assert!(!session.is_on_message_callback_registered());
    }

    #[tokio::test]
    async fn test_registration_after_shutdown_requests_close() {
        let mut slots = CallbackSlots::default();
        slots
            .set_on_client_message(counting_client_message(Arc::new(AtomicUsize::new(0))))
            .unwrap();
        let registry = Arc::new(ClientRegistry::new());
        let observed = Arc::new(Observed::default());
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let handler = ConnectionHandler::new(
            options(),
            Arc::clone(&registry),
            Arc::new(Mutex::new(slots)),
            shutdown,
        );
        let engine = ScriptedEngine {
            outcome: HandshakeStatus::accepted(),
            handshake_delay: Duration::ZERO,
            registry: Arc::clone(&registry),
            observed: Arc::clone(&observed),
        };

        handler.handle(engine, accepted()).await;

        // Still handshakes and runs, but already marked for close
        assert_eq!(observed.count_at_handshake.load(Ordering::SeqCst), 1);
        assert!(observed.ran.load(Ordering::SeqCst));
        assert!(observed.close_requested_during_run.load(Ordering::SeqCst));
        assert_eq!(registry.count(), 0);
    }
}
