//! Wires target expansion, probes and result collection together.
//!
//! Shutdown runs in a fixed order: expansion finishes and the address channel closes,
//! the fan-out worker closes every probe input, every probe drains and reports, the
//! result channel closes, and finally the collector drains into the sink.

use crate::error::RangeError;
use crate::probe::Probe;
use crate::range;
use crate::ratelimiter::RateLimiter;
use crate::result::{ResultSink, ScanResult};
use anyhow::{anyhow, Result};
use std::net::Ipv4Addr;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Addresses handed to the probes.
    pub addresses: u64,
    /// Results delivered to the sink.
    pub results: u64,
    /// Target texts that were rejected.
    pub skipped: usize,
}

pub struct Pipeline {
    probes: Vec<Box<dyn Probe>>,
    limiter: RateLimiter,
}

impl Pipeline {
    pub fn new(limiter: RateLimiter) -> Self {
        Pipeline { probes: Vec::new(), limiter }
    }

    pub fn register(&mut self, probe: Box<dyn Probe>) -> &mut Self {
        self.probes.push(probe);
        self
    }

    pub fn probe_count(&self) -> usize {
        self.probes.len()
    }

    /// Probe every address of `targets` and feed the results to `sink`.
    pub async fn run<S: ResultSink>(self, targets: &[String], sink: S) -> Result<(RunSummary, S::Output)> {
        if self.probes.is_empty() {
            return Err(anyhow!("no probes registered"));
        }

        let (addr_tx, addr_rx) = mpsc::channel::<Ipv4Addr>(1);
        let (out_tx, out_rx) = mpsc::channel::<ScanResult>(1);

        let mut probes = self.probes;
        for probe in probes.iter_mut() {
            probe.set_output(out_tx.clone());
            probe.set_limiter(self.limiter.clone());
            probe.initialize().await?;
            debug!(probe = probe.name(), "probe initialized");
        }

        let dispatcher = tokio::spawn(fan_out(addr_rx, probes));
        let collector = tokio::spawn(collect(out_rx, sink));

        let mut summary = RunSummary::default();
        for target in targets {
            match range::expand_target(target, &addr_tx).await {
                Ok(count) => {
                    debug!(target = %target, count, "target expanded");
                    summary.addresses += count;
                }
                Err(RangeError::SinkClosed) => {
                    warn!("address fan-out stopped early, not expanding further targets");
                    break;
                }
                Err(e) => {
                    warn!(target = %target, "skipping target: {}", e);
                    summary.skipped += 1;
                }
            }
        }
        drop(addr_tx);

        let mut probes = dispatcher.await?;
        for probe in probes.iter_mut() {
            probe.wait().await;
            debug!(probe = probe.name(), "probe finished");
        }
        // Probes hold result senders; dropping them and ours closes the channel.
        drop(probes);
        drop(out_tx);

        let (results, output) = collector.await??;
        summary.results = results;
        info!(addresses = summary.addresses, results = summary.results, skipped = summary.skipped, "scan complete");
        Ok((summary, output))
    }
}

async fn fan_out(mut input: mpsc::Receiver<Ipv4Addr>, mut probes: Vec<Box<dyn Probe>>) -> Vec<Box<dyn Probe>> {
    while let Some(addr) = input.recv().await {
        for probe in probes.iter() {
            if let Err(e) = probe.add_target(addr).await {
                warn!(probe = probe.name(), %addr, "failed to add target: {}", e);
            }
        }
    }
    for probe in probes.iter_mut() {
        probe.close_input();
    }
    probes
}

async fn collect<S: ResultSink>(mut results: mpsc::Receiver<ScanResult>, mut sink: S) -> Result<(u64, S::Output)> {
    let mut count = 0;
    while let Some(result) = results.recv().await {
        count += 1;
        if let Err(e) = sink.record(result) {
            warn!("failed to record result: {:#}", e);
        }
    }
    Ok((count, sink.finish()?))
}
