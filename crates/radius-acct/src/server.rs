use crate::cache::{
    LocalRetransmissionCache, RetransmissionHandler, RetransmissionKey, DEFAULT_CLEAN_CYCLE,
    DEFAULT_ENTRY_LIFETIME,
};
use crate::config::Config;
use crate::handler::{AccountingHandler, HandlerError};
use crate::record::{format_identifier, AccountingRecord};
use crate::stats::{ServerCounters, ServerStats};
use radius_proto::auth::{accounting_response, RESPONSE_LENGTH};
use radius_proto::{Code, PacketError, RequestPacket};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Standard RADIUS accounting port (RFC 2866)
pub const DEFAULT_ACCOUNTING_PORT: u16 = 1813;
/// Default upper bound on a single handler invocation
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);
/// Default interval at which `shutdown` re-checks the in-flight count
pub const DEFAULT_SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Failed to bind UDP socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),
    #[error("Unsupported packet type {0}: only Accounting-Request is supported")]
    UnsupportedCode(String),
    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),
    #[error("Handler did not finish within {0:?}")]
    HandlerTimeout(Duration),
    #[error("Handler panicked: {0}")]
    HandlerPanicked(String),
}

/// How retransmitted requests are recognised
///
/// Chosen once when the server is built. With `Disabled` every datagram is
/// processed as a new request, including genuine retransmissions.
pub enum Deduplication {
    /// Process every datagram
    Disabled,
    /// In-process cache swept every `clean_cycle`
    Local {
        clean_cycle: Duration,
        entry_lifetime: Duration,
    },
    /// Caller-provided store, e.g. one shared by several servers
    Shared(Arc<dyn RetransmissionHandler>),
}

impl Default for Deduplication {
    fn default() -> Self {
        Deduplication::Local {
            clean_cycle: DEFAULT_CLEAN_CYCLE,
            entry_lifetime: DEFAULT_ENTRY_LIFETIME,
        }
    }
}

impl fmt::Debug for Deduplication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Deduplication::Disabled => f.write_str("Disabled"),
            Deduplication::Local {
                clean_cycle,
                entry_lifetime,
            } => f
                .debug_struct("Local")
                .field("clean_cycle", clean_cycle)
                .field("entry_lifetime", entry_lifetime)
                .finish(),
            Deduplication::Shared(_) => f.write_str("Shared"),
        }
    }
}

/// RADIUS accounting server configuration
pub struct ServerConfig {
    /// Bind address for the server
    pub bind_addr: SocketAddr,
    /// Shared secret used for Response Authenticators
    pub secret: Vec<u8>,
    /// Consumer of accepted requests; required
    pub handler: Option<Arc<dyn AccountingHandler>>,
    /// Retransmission detection mode
    pub deduplication: Deduplication,
    /// Upper bound on a single handler invocation
    pub handler_timeout: Duration,
    /// Maximum number of requests processed at once; `None` for unbounded
    pub max_in_flight: Option<usize>,
    /// How often `shutdown` re-checks for in-flight requests
    pub shutdown_poll_interval: Duration,
}

impl ServerConfig {
    pub fn new(
        bind_addr: SocketAddr,
        secret: impl Into<Vec<u8>>,
        handler: Arc<dyn AccountingHandler>,
    ) -> Self {
        ServerConfig {
            bind_addr,
            secret: secret.into(),
            handler: Some(handler),
            deduplication: Deduplication::default(),
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
            max_in_flight: None,
            shutdown_poll_interval: DEFAULT_SHUTDOWN_POLL_INTERVAL,
        }
    }

    /// Create server config from a loaded [`Config`]
    pub fn from_config(
        config: &Config,
        handler: Arc<dyn AccountingHandler>,
    ) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::Config(e.to_string()))?;
        let bind_addr = config
            .socket_addr()
            .map_err(|e| ServerError::Config(e.to_string()))?;

        let deduplication = if config.deduplication {
            Deduplication::Local {
                clean_cycle: Duration::from_secs(config.clean_cycle_seconds),
                entry_lifetime: Duration::from_secs(config.entry_lifetime_seconds),
            }
        } else {
            Deduplication::Disabled
        };

        Ok(ServerConfig {
            bind_addr,
            secret: config.secret.clone().into_bytes(),
            handler: Some(handler),
            deduplication,
            handler_timeout: Duration::from_secs(config.handler_timeout_seconds),
            max_in_flight: config.max_in_flight,
            shutdown_poll_interval: DEFAULT_SHUTDOWN_POLL_INTERVAL,
        })
    }

    pub fn with_deduplication(mut self, deduplication: Deduplication) -> Self {
        self.deduplication = deduplication;
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    pub fn with_max_in_flight(mut self, limit: usize) -> Self {
        self.max_in_flight = Some(limit);
        self
    }

    fn validate(&self) -> Result<(), ServerError> {
        if self.handler.is_none() {
            return Err(ServerError::Config("server has no handler".to_string()));
        }
        if self.secret.is_empty() {
            return Err(ServerError::Config("server has no shared secret".to_string()));
        }
        if self.handler_timeout.is_zero() {
            return Err(ServerError::Config("handler timeout cannot be 0".to_string()));
        }
        if self.max_in_flight == Some(0) {
            return Err(ServerError::Config("max_in_flight cannot be 0".to_string()));
        }
        if self.shutdown_poll_interval.is_zero() {
            return Err(ServerError::Config(
                "shutdown poll interval cannot be 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Count of dispatched requests that have not finished yet
#[derive(Debug, Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    /// Register a new request unless `limit` requests are already running
    fn try_enter(self: &Arc<Self>, limit: Option<usize>) -> Option<InFlightGuard> {
        let limit = limit.unwrap_or(usize::MAX);
        self.count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < limit).then_some(n + 1)
            })
            .ok()?;
        trace!(in_flight = self.count(), "Request task started");
        Some(InFlightGuard {
            tracker: Arc::clone(self),
        })
    }

    fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    async fn wait_idle(&self, poll_interval: Duration) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.count() == 0 {
                return;
            }
            let _ = time::timeout(poll_interval, notified).await;
        }
    }
}

/// Decrements the in-flight count when the request task ends, however it ends
struct InFlightGuard {
    tracker: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let previous = self.tracker.count.fetch_sub(1, Ordering::SeqCst);
        trace!(in_flight = previous - 1, "Request task finished");
        if previous == 1 {
            self.tracker.idle.notify_waiters();
        }
    }
}

struct Inner {
    socket: UdpSocket,
    local_addr: SocketAddr,
    secret: Vec<u8>,
    handler: Arc<dyn AccountingHandler>,
    retransmissions: Option<Arc<dyn RetransmissionHandler>>,
    handler_timeout: Duration,
    max_in_flight: Option<usize>,
    shutdown_poll_interval: Duration,
    shutdown: CancellationToken,
    in_flight: Arc<InFlight>,
    counters: ServerCounters,
}

/// RADIUS accounting server
///
/// Cloning is cheap and every clone drives the same socket, so one clone can
/// run the read loop while another requests shutdown.
#[derive(Clone)]
pub struct AccountingServer {
    inner: Arc<Inner>,
}

impl AccountingServer {
    /// Validate the configuration and bind the UDP socket
    ///
    /// Configuration errors are reported before any socket is opened.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let handler = config
            .handler
            .ok_or_else(|| ServerError::Config("server has no handler".to_string()))?;

        let socket = UdpSocket::bind(config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.bind_addr,
                source,
            })?;
        let local_addr = socket.local_addr()?;

        let retransmissions: Option<Arc<dyn RetransmissionHandler>> = match config.deduplication {
            Deduplication::Disabled => None,
            Deduplication::Local {
                clean_cycle,
                entry_lifetime,
            } => Some(Arc::new(LocalRetransmissionCache::with_timing(
                clean_cycle,
                entry_lifetime,
            ))),
            Deduplication::Shared(store) => Some(store),
        };

        info!(
            local_addr = %local_addr,
            deduplication = retransmissions.is_some(),
            "RADIUS accounting server listening"
        );

        Ok(AccountingServer {
            inner: Arc::new(Inner {
                socket,
                local_addr,
                secret: config.secret,
                handler,
                retransmissions,
                handler_timeout: config.handler_timeout,
                max_in_flight: config.max_in_flight,
                shutdown_poll_interval: config.shutdown_poll_interval,
                shutdown: CancellationToken::new(),
                in_flight: Arc::new(InFlight::default()),
                counters: ServerCounters::default(),
            }),
        })
    }

    /// Bind and run until shutdown is requested
    pub async fn serve(config: ServerConfig) -> Result<(), ServerError> {
        Self::bind(config).await?.run().await
    }

    /// Get the local address the server is listening on
    ///
    /// This is useful for testing when binding to port 0 (OS-assigned port)
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Number of requests currently being processed
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.count()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Token cancelled when shutdown is requested
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub fn stats(&self) -> ServerStats {
        self.inner.counters.snapshot(self.in_flight())
    }

    /// Read datagrams until shutdown is requested
    ///
    /// Each datagram is copied out of the read buffer and processed by its
    /// own task; the loop never waits for a request to finish. Read errors
    /// are logged and the loop keeps going.
    pub async fn run(&self) -> Result<(), ServerError> {
        // One spare byte so oversized datagrams can be told apart
        let mut buf = vec![0u8; RequestPacket::MAX_PACKET_SIZE + 1];

        loop {
            let received = tokio::select! {
                biased;
                _ = self.inner.shutdown.cancelled() => {
                    info!("Shutdown signal received, no longer accepting datagrams");
                    return Ok(());
                }
                result = self.inner.socket.recv_from(&mut buf) => result,
            };

            match received {
                Ok((len, addr)) => self.dispatch(buf[..len].to_vec(), addr),
                Err(e) => {
                    if self.inner.shutdown.is_cancelled() {
                        return Ok(());
                    }
                    error!(error = %e, "Error reading from socket");
                }
            }
        }
    }

    fn dispatch(&self, data: Vec<u8>, addr: SocketAddr) {
        let inner = &self.inner;
        ServerCounters::incr(&inner.counters.datagrams_received);

        let Some(guard) = inner.in_flight.try_enter(inner.max_in_flight) else {
            ServerCounters::incr(&inner.counters.admission_rejected);
            warn!(
                client_addr = %addr,
                in_flight = inner.in_flight.count(),
                "Too many requests in flight, dropping datagram"
            );
            return;
        };

        // Checked after entering so `shutdown` either sees this request or we see it
        if inner.shutdown.is_cancelled() {
            drop(guard);
            debug!(client_addr = %addr, "Shutting down, dropping datagram");
            return;
        }

        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            let _guard = guard;

            match inner.process(&data, addr).await {
                Ok(Some(response)) => inner.send_response(&response, addr).await,
                Ok(None) => {}
                Err(e) => inner.record_drop(e, addr),
            }
        });
    }

    /// Stop accepting datagrams and wait for in-flight requests to finish
    pub async fn shutdown(&self) {
        info!(
            in_flight = self.in_flight(),
            "Shutting down RADIUS accounting server"
        );
        self.inner.shutdown.cancel();
        self.inner
            .in_flight
            .wait_idle(self.inner.shutdown_poll_interval)
            .await;
        info!("All requests finished, server stopped");
    }
}

impl Inner {
    /// Decode, deduplicate and hand one datagram to the handler
    ///
    /// Returns the response to send, or `None` for a retransmission.
    async fn process(
        &self,
        data: &[u8],
        addr: SocketAddr,
    ) -> Result<Option<[u8; RESPONSE_LENGTH]>, ServerError> {
        if data.len() > RequestPacket::MAX_PACKET_SIZE {
            return Err(PacketError::PacketTooLarge(data.len()).into());
        }
        let request = RequestPacket::decode(data, &self.secret)?;
        let request_id = format_identifier(request.identifier);

        debug!(
            client_addr = %addr,
            request_id = %request_id,
            length = request.length,
            "Received RADIUS packet"
        );

        if request.code != Code::AccountingRequest.as_u8() {
            return Err(ServerError::UnsupportedCode(Code::describe(request.code)));
        }

        let key = RetransmissionKey::new(request.identifier, &request.authenticator);
        if let Some(cache) = &self.retransmissions {
            trace!(request_id = %request_id, key = %key, "Checking retransmission key");
            if cache.check_and_insert(key.clone()) {
                ServerCounters::incr(&self.counters.retransmissions);
                debug!(
                    client_addr = %addr,
                    request_id = %request_id,
                    key = %key,
                    "Retransmission detected, dropping"
                );
                return Ok(None);
            }
        }

        let record = AccountingRecord::from_request(&request, addr);
        for attr in &record.attributes {
            trace!(request_id = %request_id, name = %attr.name, value = %attr.value, "Attribute");
        }

        if let Err(e) = self.invoke_handler(record).await {
            // Let the client's retry through as a fresh request
            if let Some(cache) = &self.retransmissions {
                cache.remove_from_cache(&key);
            }
            return Err(e);
        }

        Ok(Some(accounting_response(&request)))
    }

    async fn invoke_handler(&self, record: AccountingRecord) -> Result<(), ServerError> {
        let handler = Arc::clone(&self.handler);
        let mut task = tokio::spawn(async move { handler.handle(record).await });

        match time::timeout(self.handler_timeout, &mut task).await {
            Ok(Ok(result)) => result.map_err(ServerError::from),
            Ok(Err(join_error)) => Err(ServerError::HandlerPanicked(join_error.to_string())),
            Err(_) => {
                task.abort();
                Err(ServerError::HandlerTimeout(self.handler_timeout))
            }
        }
    }

    async fn send_response(&self, response: &[u8], addr: SocketAddr) {
        match self.socket.send_to(response, addr).await {
            Ok(_) => {
                ServerCounters::incr(&self.counters.responses_sent);
                debug!(
                    client_addr = %addr,
                    request_id = %format_identifier(response[1]),
                    "Sent Accounting-Response"
                );
            }
            Err(e) => {
                ServerCounters::incr(&self.counters.send_failures);
                error!(client_addr = %addr, error = %e, "Failed to send Accounting-Response");
            }
        }
    }

    fn record_drop(&self, err: ServerError, addr: SocketAddr) {
        let counters = &self.counters;
        match err {
            ServerError::Packet(e) => {
                ServerCounters::incr(&counters.malformed_packets);
                debug!(client_addr = %addr, error = %e, "Dropping malformed packet");
            }
            ServerError::UnsupportedCode(_) => {
                ServerCounters::incr(&counters.unsupported_codes);
                warn!(client_addr = %addr, error = %err, "Dropping packet");
            }
            ServerError::HandlerTimeout(_) => {
                ServerCounters::incr(&counters.handler_timeouts);
                warn!(client_addr = %addr, error = %err, "Request left unanswered");
            }
            _ => {
                ServerCounters::incr(&counters.handler_failures);
                warn!(client_addr = %addr, error = %err, "Request left unanswered");
            }
        }
    }
}
