//! Accept side: produces raw connections for the server to dispatch.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::WsHubError;
use crate::session::{ConnectionInfo, ConnectionState};
use crate::Result;

const SERVICE_UNAVAILABLE: &[u8] =
    b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

/// Upper bound on writing the rejection response to an over-limit peer.
const REJECT_WRITE_TIMEOUT: Duration = Duration::from_millis(200);

/// One accepted connection handed to the server.
#[derive(Debug)]
pub struct Accepted<C> {
    pub connection: C,
    pub state: Arc<ConnectionState>,
    pub info: ConnectionInfo,
}

/// Source of accepted connections.
///
/// `stop_accepting` must guarantee that nothing is delivered on the
/// channel after it returns. `shutdown` releases whatever the accept
/// mechanism still holds. Both must be safe to call repeatedly.
pub trait AcceptSource: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// Begin accepting; connections arrive on the returned channel.
    fn start(
        &self,
    ) -> impl Future<Output = Result<mpsc::Receiver<Accepted<Self::Connection>>>> + Send;

    fn stop_accepting(&self) -> impl Future<Output = ()> + Send;

    fn shutdown(&self) -> impl Future<Output = ()> + Send;

    /// Bound address, while bound.
    fn local_addr(&self) -> Option<SocketAddr>;
}

/// Listening parameters for [`TcpAcceptor`].
#[derive(Debug, Clone)]
pub struct ListenConfig {
    pub host: IpAddr,
    pub port: u16,
    pub backlog: u32,
    pub max_connections: usize,
}

impl ListenConfig {
    pub fn bind_address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

#[derive(Default)]
struct AcceptorState {
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<TcpListener>>,
    listener: Option<TcpListener>,
}

/// TCP [`AcceptSource`] with backlog and connection-limit enforcement.
pub struct TcpAcceptor {
    config: ListenConfig,
    state: tokio::sync::Mutex<AcceptorState>,
    local_addr: Mutex<Option<SocketAddr>>,
    live: Arc<Mutex<Vec<Arc<ConnectionState>>>>,
}

impl TcpAcceptor {
    pub fn new(config: ListenConfig) -> Self {
        Self {
            config,
            state: tokio::sync::Mutex::new(AcceptorState::default()),
            local_addr: Mutex::new(None),
            live: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.bind_address();
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        Ok(socket.listen(self.config.backlog.max(1))?)
    }

    fn set_local_addr(&self, addr: Option<SocketAddr>) {
        if let Ok(mut slot) = self.local_addr.lock() {
            *slot = addr;
        }
    }
}

/// Admit a connection unless `max` live connections already exist.
fn admit(
    live: &Mutex<Vec<Arc<ConnectionState>>>,
    max: usize,
    peer: SocketAddr,
) -> Option<Arc<ConnectionState>> {
    let mut live = live.lock().ok()?;
    live.retain(|state| !state.is_terminated());
    if live.len() >= max {
        return None;
    }
    let state = Arc::new(ConnectionState::new(peer.to_string()));
    live.push(Arc::clone(&state));
    Some(state)
}

async fn accept_loop(
    listener: TcpListener,
    tx: mpsc::Sender<Accepted<TcpStream>>,
    cancel: CancellationToken,
    live: Arc<Mutex<Vec<Arc<ConnectionState>>>>,
    max_connections: usize,
) -> TcpListener {
    loop {
        let (mut stream, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "accept error");
                    continue;
                }
            },
        };

        let Some(state) = admit(&live, max_connections, peer) else {
            warn!(%peer, max_connections, "connection limit reached, rejecting");
            let reject = stream.write_all(SERVICE_UNAVAILABLE);
            let _ = tokio::time::timeout(REJECT_WRITE_TIMEOUT, reject).await;
            continue;
        };

        debug!(%peer, id = %state.id(), "accepted connection");
        let info = ConnectionInfo::new(peer, stream.local_addr().ok());
        let accepted = Accepted {
            connection: stream,
            state: Arc::clone(&state),
            info,
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                state.set_terminated();
                break;
            }
            sent = tx.send(accepted) => {
                if sent.is_err() {
                    state.set_terminated();
                    break;
                }
            }
        }
    }
    listener
}

impl AcceptSource for TcpAcceptor {
    type Connection = TcpStream;

    async fn start(&self) -> Result<mpsc::Receiver<Accepted<TcpStream>>> {
        let mut state = self.state.lock().await;
        if state.task.is_some() {
            return Err(WsHubError::AlreadyRunning);
        }

        let listener = match state.listener.take() {
            Some(listener) => listener,
            None => self.bind()?,
        };
        let addr = listener.local_addr()?;
        self.set_local_addr(Some(addr));

        let (tx, rx) = mpsc::channel(self.config.backlog.max(1) as usize);
        let cancel = CancellationToken::new();
        state.task = Some(tokio::spawn(accept_loop(
            listener,
            tx,
            cancel.clone(),
            Arc::clone(&self.live),
            self.config.max_connections,
        )));
        state.cancel = Some(cancel);

        info!(%addr, backlog = self.config.backlog, "listening");
        Ok(rx)
    }

    async fn stop_accepting(&self) {
        let mut state = self.state.lock().await;
        if let Some(cancel) = state.cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = state.task.take() {
            match task.await {
                Ok(listener) => state.listener = Some(listener),
                Err(e) => error!(error = %e, "accept task failed"),
            }
            debug!("stopped accepting connections");
        }
    }

    async fn shutdown(&self) {
        self.stop_accepting().await;
        let mut state = self.state.lock().await;
        if state.listener.take().is_some() {
            info!("listener closed");
        }
        self.set_local_addr(None);
        if let Ok(mut live) = self.live.lock() {
            live.retain(|s| !s.is_terminated());
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.lock().ok().and_then(|addr| *addr)
    }
}

impl Drop for TcpAcceptor {
    fn drop(&mut self) {
        if let Ok(state) = self.state.try_lock() {
            if let Some(cancel) = &state.cancel {
                cancel.cancel();
            }
        }
    }
}
