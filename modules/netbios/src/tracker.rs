//! Per-target correlation of status and name replies.
//!
//! An entry is created by the first reply from a source, moves to "status received"
//! when a node status reply arrives (which asks for exactly one name query), and is
//! reported and removed when the name reply arrives or when it is flushed. A reported
//! source is never tracked again.

use crate::codec::trim_name;
use crate::reply::{Reply, ReplyKind, FLAG_PRIMARY};
use nextnet_core::ScanResult;
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct Correlation {
    pub status_sent_at: Option<Instant>,
    pub status_received_at: Option<Instant>,
    pub name_sent_at: Option<Instant>,
    pub name_received_at: Option<Instant>,
    pub status_reply: Option<Reply>,
    pub name_reply: Option<Reply>,
}

/// What the receiver should do after folding in a reply.
#[derive(Debug, PartialEq)]
pub enum Action {
    Ignore,
    SendNameQuery(String),
    Report(ScanResult),
}

#[derive(Debug)]
pub struct Tracker {
    probe: String,
    port: u16,
    stale_after: Duration,
    in_flight: HashMap<Ipv4Addr, Instant>,
    // Send order of `in_flight`, oldest first. May hold superseded sends.
    send_order: VecDeque<(Instant, Ipv4Addr)>,
    entries: HashMap<Ipv4Addr, Correlation>,
    reported: HashSet<Ipv4Addr>,
}

impl Tracker {
    pub fn new(probe: impl Into<String>, port: u16, stale_after: Duration) -> Self {
        Tracker {
            probe: probe.into(),
            port,
            stale_after,
            in_flight: HashMap::new(),
            send_order: VecDeque::new(),
            entries: HashMap::new(),
            reported: HashSet::new(),
        }
    }

    /// Entries that have a reply but have not been reported yet.
    pub fn pending(&self) -> usize {
        self.entries.len()
    }

    pub fn is_reported(&self, ip: Ipv4Addr) -> bool {
        self.reported.contains(&ip)
    }

    /// Record a status query send. Send times older than `stale_after` are dropped.
    pub fn status_sent(&mut self, ip: Ipv4Addr, now: Instant) {
        while let Some(&(sent, old)) = self.send_order.front() {
            if now.saturating_duration_since(sent) < self.stale_after {
                break;
            }
            self.send_order.pop_front();
            if self.in_flight.get(&old) == Some(&sent) {
                self.in_flight.remove(&old);
            }
        }
        self.in_flight.insert(ip, now);
        self.send_order.push_back((now, ip));
    }

    /// Fold one reply from `ip` into its entry.
    pub fn observe(&mut self, ip: Ipv4Addr, reply: Reply, now: Instant) -> Action {
        if self.reported.contains(&ip) {
            debug!(%ip, "late reply from a reported host");
            return Action::Ignore;
        }
        let in_flight = &mut self.in_flight;
        let entry = self.entries.entry(ip).or_insert_with(|| Correlation {
            status_sent_at: in_flight.remove(&ip),
            ..Default::default()
        });

        match reply.kind() {
            ReplyKind::Status => {
                if let Some(sent) = entry.status_sent_at {
                    debug!(%ip, latency_ms = now.saturating_duration_since(sent).as_millis() as u64, "status reply");
                }
                let name = reply.host_name.map(|n| trim_name(&n)).unwrap_or_default();
                entry.status_reply = Some(reply);
                entry.status_received_at = Some(now);
                if entry.name_sent_at.is_some() {
                    return Action::Ignore;
                }
                entry.name_sent_at = Some(now);
                Action::SendNameQuery(name)
            }
            ReplyKind::Name => {
                entry.name_reply = Some(reply);
                entry.name_received_at = Some(now);
                Action::Report(self.report(ip))
            }
            ReplyKind::Other(kind) => {
                debug!(%ip, kind, "ignoring reply with unknown record type");
                Action::Ignore
            }
        }
    }

    /// Report every tracked entry with whatever data it has.
    pub fn flush(&mut self) -> Vec<ScanResult> {
        let ips: Vec<Ipv4Addr> = self.entries.keys().copied().collect();
        self.in_flight.clear();
        self.send_order.clear();
        ips.into_iter().map(|ip| self.report(ip)).collect()
    }

    fn report(&mut self, ip: Ipv4Addr) -> ScanResult {
        let entry = self.entries.remove(&ip).unwrap_or_default();
        self.reported.insert(ip);
        build_result(&self.probe, self.port, ip, &entry)
    }
}

/// Turn a correlation entry into the record handed to the output.
pub fn build_result(probe: &str, port: u16, ip: Ipv4Addr, entry: &Correlation) -> ScanResult {
    let mut res = ScanResult {
        host: ip.to_string(),
        port: port.to_string(),
        proto: "udp".to_string(),
        probe: probe.to_string(),
        ..Default::default()
    };

    if let Some(status) = &entry.status_reply {
        res.name = status.host_name.map(|n| trim_name(&n)).unwrap_or_default();
        if let Some(hw) = status.hw_addr_string() {
            res.info.insert("hwaddr".to_string(), hw);
        }
        let user = status.user_name.map(|n| trim_name(&n)).unwrap_or_default();
        if !user.is_empty() && user != res.name {
            res.info.insert("username".to_string(), user);
        }
        for record in &status.names {
            let name = trim_name(&record.name);
            if name.is_empty() || name == res.name || record.flags & FLAG_PRIMARY != 0 {
                continue;
            }
            res.info.insert("domain".to_string(), name);
        }
    }

    if let Some(names) = &entry.name_reply {
        res.nets = names
            .addresses
            .iter()
            .filter(|a| !a.address.is_unspecified())
            .map(|a| a.address.to_string())
            .collect();
    }

    res
}
