//! Listener lifecycle: bind, serve in the background, bounded graceful shutdown.
//!
//! # State machine
//!
//! `Created → Listening → Running → ShuttingDown → Stopped`, one direction,
//! each state entered at most once.
//!
//! - [`HttpServer::start`] binds the socket (`Listening`) and spawns the
//!   accept loop, which enters `Running` on its first iteration.
//! - [`HttpServer::stop`] stops accepting, lets in-flight requests finish
//!   and force-closes whatever is still open when the deadline passes.
//!
//! A failed bind leaves the server in `Created`. An accept loop that dies for
//! any reason other than a requested shutdown is a fault: it is logged and
//! handed to the fault handler, which terminates the process by default.

use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use axum::{extract::ConnectInfo, Router};
use hyper::{body::Incoming, server::conn::http1, Request};
use hyper_util::rt::TokioIo;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::watch,
    task::JoinHandle,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tower::Service;
use tracing::{debug, error, info, warn};

use crate::error::ServerError;

/// Deadline applied by the binary when a termination signal arrives.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Position of an [`HttpServer`] in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Listening,
    Running,
    ShuttingDown,
    Stopped,
}

/// How [`HttpServer::stop`] finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every connection closed before the deadline.
    Drained,
    /// The deadline passed; remaining connections were closed forcibly.
    Forced,
    /// The server was already stopped; nothing was done.
    AlreadyStopped,
}

/// Callback invoked when the accept loop fails after startup.
pub type FaultHandler = Arc<dyn Fn(&ServerError) + Send + Sync>;

/// A single HTTP listener serving an axum [`Router`].
pub struct HttpServer {
    address: String,
    router: Router,
    state: Arc<watch::Sender<LifecycleState>>,
    local_addr: Option<SocketAddr>,
    drain: CancellationToken,
    force: CancellationToken,
    task: Option<JoinHandle<()>>,
    on_fault: FaultHandler,
}

impl HttpServer {
    /// Create a server for `address` (`host:port`). Nothing is bound until
    /// [`HttpServer::start`].
    pub fn new(address: impl Into<String>, router: Router) -> Self {
        let (state, _) = watch::channel(LifecycleState::Created);
        Self {
            address: address.into(),
            router,
            state: Arc::new(state),
            local_addr: None,
            drain: CancellationToken::new(),
            force: CancellationToken::new(),
            task: None,
            on_fault: Arc::new(exit_on_fault),
        }
    }

    /// Replace the default fault handler, which exits the process with status 1.
    pub fn with_fault_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ServerError) + Send + Sync + 'static,
    {
        self.on_fault = Arc::new(handler);
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Address actually bound, once started. Differs from the configured one
    /// when port `0` was requested.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind the listener and start serving in the background.
    ///
    /// # Errors
    ///
    /// [`ServerError::Bind`] if the address is malformed or unavailable; the
    /// server stays `Created`. [`ServerError::AlreadyStarted`] if called twice.
    pub async fn start(&mut self) -> Result<SocketAddr, ServerError> {
        let current = self.state();
        if current != LifecycleState::Created {
            return Err(ServerError::AlreadyStarted(current));
        }

        let bind_error = |source: io::Error| {
            error!(address = %self.address, error = %source, "cannot start server");
            ServerError::Bind {
                address: self.address.clone(),
                source,
            }
        };
        let listener = TcpListener::bind(self.address.as_str())
            .await
            .map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        self.local_addr = Some(local_addr);
        self.state.send_replace(LifecycleState::Listening);
        info!(address = %self.address, %local_addr, "starting server");

        self.task = Some(tokio::spawn(self.accept_loop().run(listener)));

        Ok(local_addr)
    }

    /// Stop accepting connections and drain in-flight ones for at most `deadline`.
    ///
    /// The server is `Stopped` once this returns `Ok`, whether the drain
    /// completed or connections had to be closed. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// [`ServerError::NotStarted`] if the server was never started.
    pub async fn stop(&mut self, deadline: Duration) -> Result<ShutdownOutcome, ServerError> {
        match self.state() {
            LifecycleState::Created => return Err(ServerError::NotStarted),
            LifecycleState::Stopped => {
                debug!(address = %self.address, "server already stopped");
                return Ok(ShutdownOutcome::AlreadyStopped);
            }
            _ => {}
        }

        self.state.send_replace(LifecycleState::ShuttingDown);
        info!(
            address = %self.address,
            deadline_ms = deadline.as_millis() as u64,
            "shutting down"
        );
        self.drain.cancel();

        let outcome = match self.task.take() {
            Some(mut task) => match tokio::time::timeout(deadline, &mut task).await {
                Ok(joined) => {
                    log_join_error(joined);
                    ShutdownOutcome::Drained
                }
                Err(_) => {
                    warn!(
                        deadline_ms = deadline.as_millis() as u64,
                        "shutdown deadline exceeded, closing remaining connections"
                    );
                    self.force.cancel();
                    log_join_error(task.await);
                    ShutdownOutcome::Forced
                }
            },
            None => ShutdownOutcome::Drained,
        };

        self.state.send_replace(LifecycleState::Stopped);
        info!(address = %self.address, ?outcome, "server stopped");
        Ok(outcome)
    }

    fn accept_loop(&self) -> AcceptLoop {
        AcceptLoop {
            router: self.router.clone(),
            state: Arc::clone(&self.state),
            drain: self.drain.clone(),
            force: self.force.clone(),
            on_fault: Arc::clone(&self.on_fault),
        }
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        // A dropped server must not keep the socket or its connections alive.
        self.drain.cancel();
        self.force.cancel();
    }
}

/// Resolves when the process receives Ctrl-C or, on unix, SIGTERM.
///
/// # Errors
///
/// Returns an error if the signal handlers cannot be installed.
pub async fn shutdown_signal() -> io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    info!("shutdown signal received");
    Ok(())
}

fn exit_on_fault(_err: &ServerError) {
    std::process::exit(1);
}

fn log_join_error(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "serve task ended abnormally");
    }
}

// ---------------------------------------------------------------------------
// Accept loop
// ---------------------------------------------------------------------------

/// Source of inbound connections for the accept loop.
trait Acceptor {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl Acceptor for TcpListener {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// Everything the background serve task needs, detached from [`HttpServer`].
struct AcceptLoop {
    router: Router,
    state: Arc<watch::Sender<LifecycleState>>,
    drain: CancellationToken,
    force: CancellationToken,
    on_fault: FaultHandler,
}

impl AcceptLoop {
    /// Accept until shutdown, then wait for every connection task to end.
    async fn run<A: Acceptor>(self, listener: A) {
        self.state.send_if_modified(|s| {
            if *s == LifecycleState::Listening {
                *s = LifecycleState::Running;
                true
            } else {
                false
            }
        });

        let connections = TaskTracker::new();
        let result = self.accept(listener, &connections).await;
        connections.close();

        if let Err(e) = result {
            error!(error = %e, "cannot serve requests, force exit");
            (self.on_fault)(&e);
        }

        connections.wait().await;
        debug!("all connections closed");
    }

    /// Runs until the drain token fires or the listener fails. The listener
    /// is dropped on return.
    async fn accept<A: Acceptor>(
        &self,
        listener: A,
        connections: &TaskTracker,
    ) -> Result<(), ServerError> {
        let mut backoff = None;
        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.drain.cancelled() => return Ok(()),
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    backoff = None;
                    debug!(%peer, "accepted connection");
                    connections.spawn(serve_connection(
                        stream,
                        peer,
                        self.router.clone(),
                        self.drain.clone(),
                        self.force.clone(),
                    ));
                }
                Err(e) if is_transient(&e) => {
                    let delay = next_backoff(backoff);
                    backoff = Some(delay);
                    warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "accept error");
                    tokio::select! {
                        _ = self.drain.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(ServerError::ServeLoop(e)),
            }
        }
    }
}

/// Drive one HTTP/1 connection until it closes, shuts down gracefully on
/// `drain`, or is dropped on `force`.
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Router,
    drain: CancellationToken,
    force: CancellationToken,
) {
    let service = hyper::service::service_fn(move |mut request: Request<Incoming>| {
        request.extensions_mut().insert(ConnectInfo(peer));
        router.clone().call(request)
    });

    let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let mut draining = false;
    loop {
        tokio::select! {
            res = conn.as_mut() => {
                if let Err(e) = res {
                    debug!(%peer, error = %e, "connection closed with error");
                }
                return;
            }
            _ = drain.cancelled(), if !draining => {
                conn.as_mut().graceful_shutdown();
                draining = true;
            }
            _ = force.cancelled() => {
                warn!(%peer, "connection closed before its response completed");
                return;
            }
        }
    }
}

/// Accept errors worth retrying instead of tearing the server down.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    ) || is_fd_exhaustion(e)
}

#[cfg(unix)]
fn is_fd_exhaustion(e: &io::Error) -> bool {
    // ENFILE, EMFILE
    matches!(e.raw_os_error(), Some(23) | Some(24))
}

#[cfg(not(unix))]
fn is_fd_exhaustion(_e: &io::Error) -> bool {
    false
}

fn next_backoff(previous: Option<Duration>) -> Duration {
    previous.map_or(ACCEPT_BACKOFF_MIN, |d| (d * 2).min(ACCEPT_BACKOFF_MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::header::HOST, http::StatusCode, routing::get};
    use std::{
        collections::VecDeque,
        sync::Mutex,
        time::Instant,
    };
    use tokio::sync::Notify;

    fn test_router(started: Arc<Notify>, handler_delay: Duration) -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .route(
                "/slow",
                get(move || {
                    let started = started.clone();
                    async move {
                        started.notify_one();
                        tokio::time::sleep(handler_delay).await;
                        "done"
                    }
                }),
            )
    }

    fn test_server(handler_delay: Duration) -> (HttpServer, Arc<Notify>) {
        let started = Arc::new(Notify::new());
        let router = test_router(started.clone(), handler_delay);
        (HttpServer::new("127.0.0.1:0", router), started)
    }

    async fn send_get(addr: SocketAddr, path: &str) -> Result<StatusCode, hyper::Error> {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(conn);
        let req = Request::builder()
            .uri(path)
            .header(HOST, addr.to_string())
            .body(Body::empty())
            .unwrap();
        Ok(sender.send_request(req).await?.status())
    }

    #[tokio::test]
    async fn start_serve_stop_walks_every_state() {
        let (mut server, _) = test_server(Duration::ZERO);
        assert_eq!(server.state(), LifecycleState::Created);

        let addr = server.start().await.unwrap();
        assert_eq!(server.local_addr(), Some(addr));
        let mut states = server.subscribe();
        states
            .wait_for(|s| *s == LifecycleState::Running)
            .await
            .unwrap();

        assert_eq!(send_get(addr, "/").await.unwrap(), StatusCode::OK);

        let outcome = server.stop(SHUTDOWN_TIMEOUT).await.unwrap();
        assert_eq!(outcome, ShutdownOutcome::Drained);
        assert_eq!(server.state(), LifecycleState::Stopped);
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn port_in_use_is_a_bind_error_and_state_stays_created() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let mut server = HttpServer::new(format!("127.0.0.1:{port}"), Router::new());
        let err = server.start().await.unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));
        assert_eq!(server.state(), LifecycleState::Created);
        assert_eq!(server.local_addr(), None);
    }

    #[tokio::test]
    async fn malformed_address_is_a_bind_error() {
        let mut server = HttpServer::new("not an address", Router::new());
        assert!(matches!(
            server.start().await,
            Err(ServerError::Bind { .. })
        ));
        assert_eq!(server.state(), LifecycleState::Created);
    }

    #[tokio::test]
    async fn stop_before_start_is_rejected() {
        let (mut server, _) = test_server(Duration::ZERO);
        assert!(matches!(
            server.stop(SHUTDOWN_TIMEOUT).await,
            Err(ServerError::NotStarted)
        ));
        assert_eq!(server.state(), LifecycleState::Created);
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let (mut server, _) = test_server(Duration::ZERO);
        server.start().await.unwrap();
        assert!(matches!(
            server.start().await,
            Err(ServerError::AlreadyStarted(_))
        ));
        server.stop(SHUTDOWN_TIMEOUT).await.unwrap();
    }

    #[tokio::test]
    async fn second_stop_is_a_noop() {
        let (mut server, _) = test_server(Duration::ZERO);
        server.start().await.unwrap();
        server.stop(SHUTDOWN_TIMEOUT).await.unwrap();

        let outcome = server.stop(SHUTDOWN_TIMEOUT).await.unwrap();
        assert_eq!(outcome, ShutdownOutcome::AlreadyStopped);
        assert_eq!(server.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn in_flight_request_completes_before_deadline() {
        let (mut server, started) = test_server(Duration::from_millis(300));
        let addr = server.start().await.unwrap();

        let client = tokio::spawn(async move { send_get(addr, "/slow").await });
        started.notified().await;

        let outcome = server.stop(Duration::from_secs(5)).await.unwrap();
        assert_eq!(outcome, ShutdownOutcome::Drained);
        assert_eq!(server.state(), LifecycleState::Stopped);
        assert_eq!(client.await.unwrap().unwrap(), StatusCode::OK);
    }

    #[tokio::test]
    async fn slow_request_is_cut_off_at_deadline() {
        let (mut server, started) = test_server(Duration::from_secs(60));
        let addr = server.start().await.unwrap();

        let client = tokio::spawn(async move { send_get(addr, "/slow").await });
        started.notified().await;

        let begun = Instant::now();
        let outcome = server.stop(Duration::from_millis(200)).await.unwrap();
        assert_eq!(outcome, ShutdownOutcome::Forced);
        assert_eq!(server.state(), LifecycleState::Stopped);
        assert!(begun.elapsed() < Duration::from_secs(2));
        assert!(client.await.unwrap().is_err());
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        assert_eq!(next_backoff(None), Duration::from_millis(5));
        assert_eq!(
            next_backoff(Some(Duration::from_millis(5))),
            Duration::from_millis(10)
        );
        assert_eq!(
            next_backoff(Some(Duration::from_millis(800))),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn transient_accept_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::InvalidInput)));
    }

    /// Acceptor that replays a fixed list of errors, then never yields again.
    #[derive(Clone)]
    struct ScriptedAcceptor {
        errors: Arc<Mutex<VecDeque<io::ErrorKind>>>,
    }

    impl ScriptedAcceptor {
        fn new(errors: impl IntoIterator<Item = io::ErrorKind>) -> Self {
            Self {
                errors: Arc::new(Mutex::new(errors.into_iter().collect())),
            }
        }

        fn remaining(&self) -> usize {
            self.errors.lock().unwrap().len()
        }
    }

    impl Acceptor for ScriptedAcceptor {
        fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
            let next = self.errors.lock().unwrap().pop_front();
            async move {
                match next {
                    Some(kind) => Err(io::Error::from(kind)),
                    None => std::future::pending().await,
                }
            }
        }
    }

    fn recording_server() -> (HttpServer, Arc<Mutex<Vec<Option<io::ErrorKind>>>>) {
        let faults = Arc::new(Mutex::new(Vec::new()));
        let recorded = faults.clone();
        let server = HttpServer::new("127.0.0.1:0", Router::new()).with_fault_handler(move |e| {
            let kind = match e {
                ServerError::ServeLoop(source) => Some(source.kind()),
                _ => None,
            };
            recorded.lock().unwrap().push(kind);
        });
        (server, faults)
    }

    #[tokio::test]
    async fn fatal_accept_error_reaches_fault_handler() {
        let (server, faults) = recording_server();
        let acceptor = ScriptedAcceptor::new([
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::InvalidInput,
        ]);

        tokio::time::timeout(
            Duration::from_secs(5),
            server.accept_loop().run(acceptor.clone()),
        )
        .await
        .unwrap();

        assert_eq!(acceptor.remaining(), 0);
        assert_eq!(
            *faults.lock().unwrap(),
            vec![Some(io::ErrorKind::InvalidInput)]
        );
    }

    #[tokio::test]
    async fn transient_accept_errors_are_retried_not_escalated() {
        let (server, faults) = recording_server();
        let acceptor = ScriptedAcceptor::new([
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::Interrupted,
        ]);

        let drain = server.drain.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            drain.cancel();
        });
        tokio::time::timeout(
            Duration::from_secs(5),
            server.accept_loop().run(acceptor.clone()),
        )
        .await
        .unwrap();

        assert_eq!(acceptor.remaining(), 0);
        assert!(faults.lock().unwrap().is_empty());
    }
}
