//! The NetBIOS discovery probe: a sender task that walks the probe input and a
//! receiver task that folds replies into the shared [`Tracker`].

use crate::codec::{name_query, random_xid, status_query, NETBIOS_PORT};
use crate::reply::parse_reply;
use crate::tracker::{Action, Tracker};
use async_trait::async_trait;
use nextnet_core::{Probe, ProbeBase, ProbeError, RateLimiter, ScanResult};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct NetbiosConfig {
    /// Destination port of every query.
    pub port: u16,
    /// How long to wait for replies before flushing.
    pub reply_window: Duration,
    /// Tracked entries above which the sender pauses and flushes.
    pub max_pending: usize,
    pub send_attempts: u32,
    pub send_backoff: Duration,
    /// Local address of the probe socket.
    pub bind: SocketAddr,
}

impl Default for NetbiosConfig {
    fn default() -> Self {
        NetbiosConfig {
            port: NETBIOS_PORT,
            reply_window: Duration::from_secs(2),
            max_pending: 256,
            send_attempts: 5,
            send_backoff: Duration::from_millis(100),
            bind: SocketAddr::from(([0, 0, 0, 0], 0)),
        }
    }
}

pub struct NetbiosProbe {
    base: ProbeBase,
    config: NetbiosConfig,
    local_addr: Option<SocketAddr>,
}

impl NetbiosProbe {
    pub fn new(config: NetbiosConfig) -> Self {
        NetbiosProbe { base: ProbeBase::new(), config, local_addr: None }
    }

    /// Address the probe socket is bound to, once initialized.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl Default for NetbiosProbe {
    fn default() -> Self {
        Self::new(NetbiosConfig::default())
    }
}

#[async_trait]
impl Probe for NetbiosProbe {
    fn base(&self) -> &ProbeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ProbeBase {
        &mut self.base
    }

    async fn initialize(&mut self) -> Result<(), ProbeError> {
        self.setup();
        self.base.set_name("netbios");

        let socket = UdpSocket::bind(self.config.bind).await?;
        self.local_addr = socket.local_addr().ok();

        let session = Arc::new(Session {
            name: self.base.name().to_string(),
            tracker: Mutex::new(Tracker::new(
                self.base.name(),
                self.config.port,
                self.config.reply_window * 2,
            )),
            config: self.config.clone(),
            socket,
            output: self.base.output()?,
            limiter: self.base.limiter(),
        });
        let input = self.base.take_input()?;
        let (stop_tx, stop_rx) = oneshot::channel();

        self.base.spawn_worker(receive_replies(session.clone(), stop_rx));
        self.base.spawn_worker(send_queries(session, input, stop_tx));
        Ok(())
    }
}

/// State shared by the sender and receiver of one probe.
struct Session {
    name: String,
    config: NetbiosConfig,
    socket: UdpSocket,
    tracker: Mutex<Tracker>,
    output: mpsc::Sender<ScanResult>,
    limiter: Option<RateLimiter>,
}

impl Session {
    async fn check_rate_limit(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }
    }

    /// Send one packet, retrying transient failures. Returns whether it went out.
    async fn send_request(&self, ip: Ipv4Addr, packet: &[u8]) -> bool {
        let dest = SocketAddr::from((ip, self.config.port));
        let attempts = self.config.send_attempts.max(1);
        for attempt in 1..=attempts {
            self.check_rate_limit().await;
            match self.socket.send_to(packet, dest).await {
                Ok(_) => return true,
                Err(e) => {
                    warn!(probe = %self.name, "[{}/{}] failed to send to {}: {}", attempt, attempts, ip, e);
                    sleep(self.config.send_backoff).await;
                }
            }
        }
        warn!(probe = %self.name, "[{}/{}] gave up sending to {}", attempts, attempts, ip);
        false
    }

    async fn emit(&self, result: ScanResult) {
        if self.output.send(result).await.is_err() {
            warn!(probe = %self.name, "result channel closed, dropping result");
        }
    }

    /// Report every incomplete entry.
    async fn flush(&self) {
        let results = self.tracker.lock().await.flush();
        if !results.is_empty() {
            debug!(probe = %self.name, count = results.len(), "reporting incomplete results");
        }
        for result in results {
            self.emit(result).await;
        }
    }
}

async fn send_queries(session: Arc<Session>, mut input: mpsc::Receiver<Ipv4Addr>, stop: oneshot::Sender<()>) {
    let window = session.config.reply_window;
    while let Some(ip) = input.recv().await {
        session.tracker.lock().await.status_sent(ip, Instant::now());
        session.send_request(ip, &status_query(random_xid())).await;

        let pending = session.tracker.lock().await.pending();
        if pending > session.config.max_pending {
            info!(probe = %session.name, pending, "flushing due to maximum pending replies");
            sleep(window).await;
            session.flush().await;
        }
    }

    info!(probe = %session.name, "waiting for final replies to status probe");
    sleep(window).await;
    // Status replies arriving now still trigger name queries from the receiver.
    info!(probe = %session.name, "waiting for final replies to name probe");
    sleep(window).await;

    let _ = stop.send(());
    session.flush().await;
}

async fn receive_replies(session: Arc<Session>, mut stop: oneshot::Receiver<()>) {
    let mut buf = vec![0u8; 1500];
    loop {
        let (len, from) = tokio::select! {
            _ = &mut stop => {
                debug!(probe = %session.name, "receiver stopping");
                return;
            }
            res = session.socket.recv_from(&mut buf) => match res {
                Ok(v) => v,
                Err(e) => {
                    warn!(probe = %session.name, "receiver returned error: {}", e);
                    return;
                }
            },
        };

        let ip = match from.ip() {
            IpAddr::V4(ip) => ip,
            IpAddr::V6(other) => {
                debug!(probe = %session.name, %other, "ignoring non-IPv4 reply");
                continue;
            }
        };
        let reply = match parse_reply(&buf[..len]) {
            Ok(reply) => reply,
            Err(e) => {
                debug!(probe = %session.name, %ip, "discarding reply: {}", e);
                continue;
            }
        };
        if reply.is_empty() {
            continue;
        }

        let action = session.tracker.lock().await.observe(ip, reply, Instant::now());
        match action {
            Action::Ignore => {}
            Action::SendNameQuery(name) => {
                session.send_request(ip, &name_query(random_xid(), &name)).await;
            }
            Action::Report(result) => session.emit(result).await,
        }
    }
}
