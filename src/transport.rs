use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::dns::{Message, Question};

/// Failures of a single-endpoint query after all retries.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("query timed out")]
    Timeout,
    #[error("endpoint unreachable: {0}")]
    NetworkUnreachable(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("transaction id mismatch: sent {sent:#06x}, received {received:#06x}")]
    TransactionIdMismatch { sent: u16, received: u16 },
    #[error("response does not echo the query name casing")]
    CasingMismatch,
}

/// Raw byte exchange with one server. The production implementation owns
/// real sockets; tests substitute an in-process script.
#[async_trait]
pub trait Transport: Send + Sync {
    /// One UDP datagram out, one in.
    async fn udp_exchange(
        &self,
        server: SocketAddr,
        payload: &[u8],
        wait: Duration,
    ) -> io::Result<Vec<u8>>;

    /// One message over a fresh TCP connection, RFC 1035 §4.2.2 framing
    /// handled inside.
    async fn tcp_exchange(
        &self,
        server: SocketAddr,
        payload: &[u8],
        wait: Duration,
    ) -> io::Result<Vec<u8>>;
}

/// Socket-backed transport with a small per-server pool of connected UDP
/// sockets so bursts do not rebind for every query.
pub struct UdpTcpTransport {
    pool: Mutex<HashMap<SocketAddr, Vec<UdpSocket>>>,
    max_pooled_per_server: usize,
    idle: parking_lot::Mutex<Option<crate::timer::IdleTimer>>,
}

impl UdpTcpTransport {
    pub fn new(max_pooled_per_server: usize) -> Self {
        Self {
            pool: Mutex::new(HashMap::new()),
            max_pooled_per_server,
            idle: parking_lot::Mutex::new(None),
        }
    }

    /// Drop every pooled socket once the transport has seen no traffic
    /// for `window`. Returns the timer so callers can pause or retune it.
    pub fn spawn_idle_reaper(
        self: &Arc<Self>,
        window: Duration,
    ) -> crate::timer::IdleTimer {
        let timer = crate::timer::IdleTimer::new(window);
        *self.idle.lock() = Some(timer.clone());
        let transport = Arc::clone(self);
        let watcher = timer.clone();
        tokio::spawn(async move {
            watcher.idled().await;
            let mut pool = transport.pool.lock().await;
            let dropped: usize = pool.values().map(Vec::len).sum();
            pool.clear();
            if dropped > 0 {
                debug!("idle reaper dropped {} pooled sockets", dropped);
            }
        });
        timer
    }

    fn poke_idle(&self) {
        if let Some(timer) = self.idle.lock().as_ref() {
            timer.poke();
        }
    }

    async fn take_socket(&self, server: SocketAddr) -> io::Result<UdpSocket> {
        self.poke_idle();
        if let Some(socket) = self.pool.lock().await.get_mut(&server).and_then(Vec::pop) {
            trace!("reusing pooled socket for {}", server);
            return Ok(socket);
        }
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(server).await?;
        Ok(socket)
    }

    async fn return_socket(&self, server: SocketAddr, socket: UdpSocket) {
        self.poke_idle();
        let mut pool = self.pool.lock().await;
        let slot = pool.entry(server).or_default();
        if slot.len() < self.max_pooled_per_server {
            slot.push(socket);
        }
    }
}

impl Default for UdpTcpTransport {
    fn default() -> Self {
        Self::new(4)
    }
}

#[async_trait]
impl Transport for UdpTcpTransport {
    async fn udp_exchange(
        &self,
        server: SocketAddr,
        payload: &[u8],
        wait: Duration,
    ) -> io::Result<Vec<u8>> {
        let socket = self.take_socket(server).await?;
        let exchange = async {
            socket.send(payload).await?;
            let mut buf = vec![0u8; 4096];
            let len = socket.recv(&mut buf).await?;
            buf.truncate(len);
            Ok::<_, io::Error>(buf)
        };
        let result = timeout(wait, exchange)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "udp exchange timed out"))?;
        if result.is_ok() {
            self.return_socket(server, socket).await;
        }
        result
    }

    async fn tcp_exchange(
        &self,
        server: SocketAddr,
        payload: &[u8],
        wait: Duration,
    ) -> io::Result<Vec<u8>> {
        let exchange = async {
            let mut stream = TcpStream::connect(server).await?;
            stream.write_all(&(payload.len() as u16).to_be_bytes()).await?;
            stream.write_all(payload).await?;
            stream.flush().await?;

            let mut len_buf = [0u8; 2];
            stream.read_exact(&mut len_buf).await?;
            let len = u16::from_be_bytes(len_buf) as usize;
            let mut buf = vec![0u8; len];
            stream.read_exact(&mut buf).await?;
            Ok::<_, io::Error>(buf)
        };
        timeout(wait, exchange)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "tcp exchange timed out"))?
    }
}

/// Per-query knobs the dispatcher applies.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub udp_payload_size: u16,
    pub dnssec_ok: bool,
    pub timeout: Duration,
    pub max_retries: u8,
    pub case_randomization: bool,
}

/// Sends one question to one authoritative endpoint: UDP first with EDNS,
/// fresh transaction id (and casing, when enabled) per attempt,
/// exponential backoff between attempts, and TCP fallback on truncation.
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub async fn query(
        &self,
        server: SocketAddr,
        question: &Question,
        options: &DispatchOptions,
    ) -> Result<Message, TransportError> {
        let mut last_error = TransportError::Timeout;

        for attempt in 0..=options.max_retries {
            if attempt > 0 {
                let backoff = Duration::from_millis(100 << (attempt - 1).min(6));
                trace!("retrying {} after {:?} (attempt {})", server, backoff, attempt + 1);
                tokio::time::sleep(backoff).await;
            }

            // Fresh identity per attempt; never reuse a transaction id a
            // spoofer may have already seen.
            let (id, sent_question) = {
                let mut rng = rand::rng();
                let id: u16 = rng.random();
                let name = if options.case_randomization {
                    question.name.randomize_case(&mut rng)
                } else {
                    question.name.clone()
                };
                (id, Question::new(name, question.qtype, question.qclass))
            };

            match self.attempt(server, id, &sent_question, options).await {
                Ok(message) => {
                    if attempt > 0 {
                        debug!("query to {} succeeded on attempt {}", server, attempt + 1);
                    }
                    return Ok(message);
                }
                Err(e) => {
                    debug!("query attempt {} to {} failed: {}", attempt + 1, server, e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    async fn attempt(
        &self,
        server: SocketAddr,
        id: u16,
        question: &Question,
        options: &DispatchOptions,
    ) -> Result<Message, TransportError> {
        let mut query = Message::query(id, question.clone());
        query.set_edns(options.udp_payload_size, options.dnssec_ok);
        let payload = query
            .serialize()
            .map_err(|e| TransportError::MalformedResponse(e.to_string()))?;

        let raw = self
            .transport
            .udp_exchange(server, &payload, options.timeout)
            .await
            .map_err(classify_io)?;
        let response = self.check_response(id, question, &raw, options)?;

        if response.header.tc {
            debug!("truncated response from {}, retrying over TCP", server);
            let raw = self
                .transport
                .tcp_exchange(server, &payload, options.timeout)
                .await
                .map_err(classify_io)?;
            return self.check_response(id, question, &raw, options);
        }
        Ok(response)
    }

    fn check_response(
        &self,
        id: u16,
        question: &Question,
        raw: &[u8],
        options: &DispatchOptions,
    ) -> Result<Message, TransportError> {
        let response =
            Message::parse(raw).map_err(|e| TransportError::MalformedResponse(e.to_string()))?;
        if response.header.id != id {
            return Err(TransportError::TransactionIdMismatch {
                sent: id,
                received: response.header.id,
            });
        }
        if !response.header.qr {
            return Err(TransportError::MalformedResponse(
                "response without QR bit".to_string(),
            ));
        }
        let Some(echoed) = response.questions.first() else {
            return Err(TransportError::MalformedResponse(
                "response without question section".to_string(),
            ));
        };
        if echoed.name != question.name {
            return Err(TransportError::MalformedResponse(
                "response question does not match query".to_string(),
            ));
        }
        if options.case_randomization && !echoed.name.eq_case_sensitive(&question.name) {
            return Err(TransportError::CasingMismatch);
        }
        Ok(response)
    }
}

fn classify_io(err: io::Error) -> TransportError {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportError::Timeout,
        _ => TransportError::NetworkUnreachable(err.to_string()),
    }
}
