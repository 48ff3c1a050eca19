//! Server start/stop orchestration.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::callback::CallbackSlots;
use super::handler::{ConnectionHandler, HandlerOptions};
use crate::error::WsHubError;
use crate::session::{
    ClientRegistry, ConnectionId, ConnectionInfo, ConnectionState, Message, Session, SessionEvent,
};
use crate::transport::{
    AcceptSource, Accepted, ListenConfig, ProtocolEngine, TcpAcceptor, TungsteniteEngine,
};
use crate::Result;

/// Default upper bound on the upgrade handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: IpAddr,
    /// Port to listen on. `0` picks a free port.
    pub port: u16,
    /// Listen backlog.
    pub backlog: u32,
    /// Maximum number of concurrent connections.
    pub max_connections: usize,
    /// Upper bound on the upgrade handshake.
    pub handshake_timeout: Duration,
    /// Answer ping frames automatically.
    pub enable_pong: bool,
    /// Negotiate permessage-deflate during the handshake.
    pub enable_per_message_deflate: bool,
}

impl ServerConfig {
    pub fn new(host: IpAddr, port: u16) -> Self {
        Self {
            host,
            port,
            ..Self::default()
        }
    }

    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn enable_pong(mut self) -> Self {
        self.enable_pong = true;
        self
    }

    pub fn disable_pong(mut self) -> Self {
        self.enable_pong = false;
        self
    }

    pub fn disable_per_message_deflate(mut self) -> Self {
        self.enable_per_message_deflate = false;
        self
    }

    pub fn bind_address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn listen_config(&self) -> ListenConfig {
        ListenConfig {
            host: self.host,
            port: self.port,
            backlog: self.backlog,
            max_connections: self.max_connections,
        }
    }

    fn handler_options(&self) -> HandlerOptions {
        HandlerOptions {
            handshake_timeout: self.handshake_timeout,
            enable_pong: self.enable_pong,
            enable_per_message_deflate: self.enable_per_message_deflate,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::from([127, 0, 0, 1]),
            port: 8080,
            backlog: 5,
            max_connections: 128,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            enable_pong: true,
            enable_per_message_deflate: true,
        }
    }
}

type EngineFactory<E> = Arc<dyn Fn() -> E + Send + Sync>;

struct Dispatcher {
    /// Ends admissions. Sessions registering after it fires close
    /// themselves.
    stop: CancellationToken,
    task: JoinHandle<JoinSet<()>>,
    runtime: Handle,
}

/// WebSocket server: admits connections, runs one task per session and
/// keeps the registry of live sessions.
///
/// Dropping a running server stops admissions and requests close on every
/// session. The sessions finish their close in the background; only
/// [`stop`](Self::stop) waits for them.
pub struct WebSocketServer<A = TcpAcceptor, E = TungsteniteEngine> {
    config: ServerConfig,
    acceptor: A,
    engine_factory: EngineFactory<E>,
    registry: Arc<ClientRegistry>,
    callbacks: Arc<Mutex<CallbackSlots>>,
    dispatcher: tokio::sync::Mutex<Option<Dispatcher>>,
}

impl WebSocketServer {
    /// TCP server speaking WebSocket through tungstenite.
    pub fn new(config: ServerConfig) -> Self {
        let acceptor = TcpAcceptor::new(config.listen_config());
        Self::with_parts(config, acceptor, TungsteniteEngine::new)
    }
}

impl<A, E> WebSocketServer<A, E>
where
    A: AcceptSource,
    E: ProtocolEngine<Connection = A::Connection>,
{
    /// Server over a custom accept source and protocol engine.
    pub fn with_parts<F>(config: ServerConfig, acceptor: A, engine_factory: F) -> Self
    where
        F: Fn() -> E + Send + Sync + 'static,
    {
        Self {
            config,
            acceptor,
            engine_factory: Arc::new(engine_factory),
            registry: Arc::new(ClientRegistry::new()),
            callbacks: Arc::new(Mutex::new(CallbackSlots::default())),
            dispatcher: tokio::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Register the per-connection callback. It must call
    /// [`Session::set_on_message_callback`] before returning, otherwise the
    /// connection is refused. Takes precedence over the client message
    /// callback.
    pub fn set_on_connection_callback<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(&Arc<Session>, &Arc<ConnectionState>, ConnectionInfo) + Send + Sync + 'static,
    {
        self.callbacks
            .lock()
            .map_err(|_| WsHubError::LockPoisoned)?
            .set_on_connection(Arc::new(callback))
    }

    /// Register one callback for the events of every session.
    pub fn set_on_client_message_callback<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(&Arc<ConnectionState>, &ConnectionInfo, &Session, &SessionEvent)
            + Send
            + Sync
            + 'static,
    {
        self.callbacks
            .lock()
            .map_err(|_| WsHubError::LockPoisoned)?
            .set_on_client_message(Arc::new(callback))
    }

    /// Start accepting connections.
    pub async fn start(&self) -> Result<()> {
        let mut dispatcher = self.dispatcher.lock().await;
        if dispatcher.is_some() {
            return Err(WsHubError::AlreadyRunning);
        }

        {
            let slots = self.callbacks.lock().map_err(|_| WsHubError::LockPoisoned)?;
            if slots.is_ambiguous() {
                warn!("both connection and client message callbacks set; the connection callback wins");
            }
            let mode = slots.contract().mode();
            if mode == "unconfigured" {
                warn!("no server callback registered, connections will be refused");
            }
            debug!(mode, "callback contract");
        }

        let incoming = self.acceptor.start().await?;
        let stop = CancellationToken::new();
        let handler = Arc::new(ConnectionHandler::new(
            self.config.handler_options(),
            Arc::clone(&self.registry),
            Arc::clone(&self.callbacks),
            stop.clone(),
        ));
        let task = tokio::spawn(dispatch(
            incoming,
            handler,
            Arc::clone(&self.engine_factory),
            stop.clone(),
        ));
        *dispatcher = Some(Dispatcher {
            stop,
            task,
            runtime: Handle::current(),
        });

        info!(
            handshake_timeout = ?self.config.handshake_timeout,
            pong = self.config.enable_pong,
            per_message_deflate = self.config.enable_per_message_deflate,
            "websocket server started"
        );
        Ok(())
    }

    /// Stop the server.
    ///
    /// Stops admissions first, then requests close on a snapshot of the
    /// live sessions, then shuts the accept source down and waits for every
    /// session task to finish. A session that registers after the snapshot
    /// sees the stop signal and closes itself. Handshakes in flight run to
    /// their own deadline. Safe to call more than once.
    pub async fn stop(&self) {
        let mut dispatcher = self.dispatcher.lock().await;

        self.acceptor.stop_accepting().await;
        let mut handlers = match dispatcher.take() {
            Some(Dispatcher { stop, task, .. }) => {
                stop.cancel();
                task.await.unwrap_or_else(|e| {
                    error!(error = %e, "dispatcher task failed");
                    JoinSet::new()
                })
            }
            None => JoinSet::new(),
        };

        let sessions = self.members();
        for session in &sessions {
            session.close();
        }
        debug!(count = sessions.len(), "requested close on live sessions");

        self.acceptor.shutdown().await;

        while let Some(joined) = handlers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "connection task failed");
            }
        }
        info!("websocket server stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.dispatcher.lock().await.is_some()
    }

    /// Address the accept source is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.acceptor.local_addr()
    }
}

impl<A, E> WebSocketServer<A, E> {
    /// Every registry member, including sessions still handshaking.
    fn members(&self) -> Vec<Arc<Session>> {
        self.registry.snapshot().unwrap_or_else(|e| {
            error!(error = %e, "cannot snapshot client registry");
            Vec::new()
        })
    }

    /// Snapshot of the live sessions, i.e. those past a successful
    /// handshake.
    pub fn list_sessions(&self) -> Vec<Arc<Session>> {
        let mut sessions = self.members();
        sessions.retain(|session| session.is_established());
        sessions
    }

    pub fn session_count(&self) -> usize {
        self.list_sessions().len()
    }

    pub fn session(&self, id: ConnectionId) -> Option<Arc<Session>> {
        self.registry
            .get(&id)
            .ok()
            .flatten()
            .filter(|session| session.is_established())
    }

    /// Queue `message` on every registry member; sessions still handshaking
    /// receive it once upgraded. Returns how many accepted it.
    pub fn broadcast(&self, message: impl Into<Message>) -> usize {
        self.registry
            .broadcast(&message.into())
            .unwrap_or_else(|e| {
                error!(error = %e, "broadcast failed");
                0
            })
    }

    /// Shared handle to the registry, e.g. for the admin API.
    pub fn registry(&self) -> Arc<ClientRegistry> {
        Arc::clone(&self.registry)
    }
}

impl<A, E> Drop for WebSocketServer<A, E> {
    fn drop(&mut self) {
        let Some(Dispatcher {
            stop,
            task,
            runtime,
        }) = self.dispatcher.get_mut().take()
        else {
            return;
        };
        stop.cancel();
        for session in self.members() {
            session.close();
        }

        // Dropping the JoinSet would abort the sessions mid-close; let them
        // finish in the background instead.
        runtime.spawn(async move {
            let mut handlers = match task.await {
                Ok(handlers) => handlers,
                Err(e) => {
                    error!(error = %e, "dispatcher task failed");
                    return;
                }
            };
            while let Some(joined) = handlers.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "connection task failed");
                }
            }
            debug!("sessions of dropped server finished");
        });
    }
}

/// Hand each accepted connection to its own task until stopped.
///
/// Returns the set of session tasks still running so the caller can wait
/// for them.
async fn dispatch<C, E>(
    mut incoming: mpsc::Receiver<Accepted<C>>,
    handler: Arc<ConnectionHandler>,
    engine_factory: EngineFactory<E>,
    stop: CancellationToken,
) -> JoinSet<()>
where
    C: Send + 'static,
    E: ProtocolEngine<Connection = C>,
{
    let mut handlers = JoinSet::new();
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "connection task failed");
                }
            }
            accepted = incoming.recv() => {
                let Some(accepted) = accepted else { break };
                let span = info_span!(
                    "connection",
                    id = %accepted.state.id(),
                    peer = accepted.state.label()
                );
                let engine = engine_factory();
                let handler = Arc::clone(&handler);
                handlers.spawn(
                    async move { handler.handle(engine, accepted).await }.instrument(span),
                );
            }
        }
    }

    // Anything still queued arrived after admissions stopped.
    incoming.close();
    while let Ok(late) = incoming.try_recv() {
        debug!(id = %late.state.id(), "dropping connection accepted during shutdown");
        late.state.set_terminated();
    }
    handlers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::HandshakeStatus;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Accept source fed directly by the test.
    struct ChannelAcceptor {
        incoming: Mutex<Option<mpsc::Receiver<Accepted<()>>>>,
    }

    impl ChannelAcceptor {
        fn new() -> (Self, mpsc::Sender<Accepted<()>>) {
            let (tx, rx) = mpsc::channel(8);
            let acceptor = Self {
                incoming: Mutex::new(Some(rx)),
            };
            (acceptor, tx)
        }
    }

    impl AcceptSource for ChannelAcceptor {
        type Connection = ();

        async fn start(&self) -> Result<mpsc::Receiver<Accepted<()>>> {
            self.incoming
                .lock()
                .unwrap()
                .take()
                .ok_or(WsHubError::AlreadyRunning)
        }

        async fn stop_accepting(&self) {}

        async fn shutdown(&self) {}

        fn local_addr(&self) -> Option<SocketAddr> {
            None
        }
    }

    /// Engine whose receive loop lasts until close is requested, then takes
    /// a moment to finish the close handshake.
    struct CloseAwareEngine {
        finished: Arc<AtomicBool>,
    }

    impl ProtocolEngine for CloseAwareEngine {
        type Connection = ();

        async fn handshake(&mut self, _: (), _: &Session, _: Duration) -> HandshakeStatus {
            HandshakeStatus::accepted()
        }

        async fn run(&mut self, session: &Session) {
            let close = session.close_token();
            close.cancelled().await;
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.finished.store(true, Ordering::SeqCst);
        }
    }

    fn channel_server() -> (
        WebSocketServer<ChannelAcceptor, CloseAwareEngine>,
        mpsc::Sender<Accepted<()>>,
        Arc<AtomicBool>,
    ) {
        let (acceptor, tx) = ChannelAcceptor::new();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let server = WebSocketServer::with_parts(ServerConfig::default(), acceptor, move || {
            CloseAwareEngine {
                finished: Arc::clone(&flag),
            }
        });
        (server, tx, finished)
    }

    fn connection() -> Accepted<()> {
        Accepted {
            connection: (),
            state: Arc::new(ConnectionState::new("127.0.0.1:4000")),
            info: ConnectionInfo::new("127.0.0.1:4000".parse().unwrap(), None),
        }
    }

    async fn wait_for(condition: impl Fn() -> bool) -> bool {
        for _ in 0..300 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[test]
    fn test_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address().to_string(), "127.0.0.1:8080");
        assert_eq!(config.backlog, 5);
        assert_eq!(config.max_connections, 128);
        assert_eq!(config.handshake_timeout, Duration::from_secs(3));
        assert!(config.enable_pong);
        assert!(config.enable_per_message_deflate);
    }

    #[test]
    fn test_config_builders() {
        let config = ServerConfig::new("0.0.0.0".parse().unwrap(), 9001)
            .with_backlog(64)
            .with_max_connections(2)
            .with_handshake_timeout(Duration::from_millis(500))
            .disable_pong()
            .disable_per_message_deflate();

        assert_eq!(config.bind_address().to_string(), "0.0.0.0:9001");
        assert_eq!(config.listen_config().backlog, 64);
        assert_eq!(config.listen_config().max_connections, 2);
        assert_eq!(config.handshake_timeout, Duration::from_millis(500));
        assert!(!config.enable_pong);
        assert!(!config.enable_per_message_deflate);
    }

    #[test]
    fn test_callbacks_set_once() {
        let server = WebSocketServer::new(ServerConfig::default());
        server
            .set_on_connection_callback(|session, _, _| session.set_on_message_callback(|_| {}))
            .unwrap();
        assert!(matches!(
            server.set_on_connection_callback(|_, _, _| {}),
            Err(WsHubError::CallbackAlreadySet(_))
        ));
        server
            .set_on_client_message_callback(|_, _, _, _| {})
            .unwrap();
    }

    #[tokio::test]
    async fn test_start_twice_fails_and_stop_is_idempotent() {
        let server = WebSocketServer::new(ServerConfig::new("127.0.0.1".parse().unwrap(), 0));
        server.set_on_client_message_callback(|_, _, _, _| {}).unwrap();

        server.start().await.unwrap();
        assert!(server.is_running().await);
        assert!(server.local_addr().is_some());
        assert!(matches!(server.start().await, Err(WsHubError::AlreadyRunning)));

        server.stop().await;
        server.stop().await;
        assert!(!server.is_running().await);
        assert!(server.local_addr().is_none());
        assert_eq!(server.session_count(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_without_sessions() {
        let server = WebSocketServer::new(ServerConfig::default());
        assert_eq!(server.broadcast("nobody"), 0);
        assert!(server.list_sessions().is_empty());
        assert!(server.session(ConnectionId::from_raw(1)).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_closes_session_registering_late() {
        let (server, tx, finished) = channel_server();
        // Keeps the session out of the registry until after stop() took its
        // snapshot.
        server
            .set_on_connection_callback(|session, _, _| {
                std::thread::sleep(Duration::from_millis(300));
                session.set_on_message_callback(|_| {});
            })
            .unwrap();
        server.start().await.unwrap();

        let accepted = connection();
        let state = Arc::clone(&accepted.state);
        tx.send(accepted).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stopped = tokio::time::timeout(Duration::from_secs(3), server.stop()).await;
        assert!(stopped.is_ok(), "stop() did not close the late session");
        assert!(finished.load(Ordering::SeqCst));
        assert!(state.is_terminated());
        assert_eq!(server.session_count(), 0);
        assert_eq!(server.registry().count(), 0);
    }

    #[tokio::test]
    async fn test_drop_lets_sessions_close() {
        let (server, tx, finished) = channel_server();
        server
            .set_on_client_message_callback(|_, _, _, _| {})
            .unwrap();
        server.start().await.unwrap();

        let accepted = connection();
        let state = Arc::clone(&accepted.state);
        tx.send(accepted).await.unwrap();
        assert!(wait_for(|| server.session_count() == 1).await);
        let registry = server.registry();

        drop(server);

        assert!(wait_for(|| state.is_terminated()).await);
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(registry.count(), 0);
    }
}
