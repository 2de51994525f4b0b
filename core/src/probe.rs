//! The probe capability set and its reusable default implementation.
//!
//! Concrete probes hold a [`ProbeBase`] and hand it out through [`Probe::base`] /
//! [`Probe::base_mut`]; every other capability has a default that delegates to it,
//! so a probe usually only overrides [`Probe::initialize`] to start its workers.

use crate::error::ProbeError;
use crate::ratelimiter::RateLimiter;
use crate::result::ScanResult;
use async_trait::async_trait;
use std::future::Future;
use std::net::Ipv4Addr;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

#[async_trait]
pub trait Probe: Send + Sync {
    fn base(&self) -> &ProbeBase;
    fn base_mut(&mut self) -> &mut ProbeBase;

    fn name(&self) -> &str {
        self.base().name()
    }

    /// Allocate the input channel and reset the name.
    fn setup(&mut self) {
        self.base_mut().setup();
    }

    /// Set up, then open sockets and start workers.
    async fn initialize(&mut self) -> Result<(), ProbeError> {
        self.setup();
        Ok(())
    }

    /// Hand one target to the probe, waiting until it is taken.
    async fn add_target(&self, addr: Ipv4Addr) -> Result<(), ProbeError> {
        self.base().add_target(addr).await
    }

    fn close_input(&mut self) {
        self.base_mut().close_input();
    }

    fn set_output(&mut self, output: mpsc::Sender<ScanResult>) {
        self.base_mut().set_output(output);
    }

    fn set_limiter(&mut self, limiter: RateLimiter) {
        self.base_mut().set_limiter(limiter);
    }

    async fn check_rate_limit(&self) {
        self.base().check_rate_limit().await;
    }

    /// Block until every worker, including its final reporting, is done.
    async fn wait(&mut self) {
        self.base_mut().wait().await;
    }
}

/// Input channel lifecycle, output/limiter wiring and worker bookkeeping.
#[derive(Debug, Default)]
pub struct ProbeBase {
    name: String,
    input_tx: Option<mpsc::Sender<Ipv4Addr>>,
    input_rx: Option<mpsc::Receiver<Ipv4Addr>>,
    output: Option<mpsc::Sender<ScanResult>>,
    limiter: Option<RateLimiter>,
    workers: Vec<JoinHandle<()>>,
}

impl ProbeBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn setup(&mut self) {
        self.name = "generic".to_string();
        let (tx, rx) = mpsc::channel(1);
        self.input_tx = Some(tx);
        self.input_rx = Some(rx);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub async fn add_target(&self, addr: Ipv4Addr) -> Result<(), ProbeError> {
        let tx = self.input_tx.as_ref().ok_or(ProbeError::InputClosed)?;
        tx.send(addr).await.map_err(|_| ProbeError::InputClosed)
    }

    /// Drop the sending half; safe to call more than once.
    pub fn close_input(&mut self) {
        self.input_tx.take();
    }

    /// Give the receiving half of the input to a worker.
    pub fn take_input(&mut self) -> Result<mpsc::Receiver<Ipv4Addr>, ProbeError> {
        self.input_rx.take().ok_or(ProbeError::NotInitialized)
    }

    pub fn set_output(&mut self, output: mpsc::Sender<ScanResult>) {
        self.output = Some(output);
    }

    pub fn output(&self) -> Result<mpsc::Sender<ScanResult>, ProbeError> {
        self.output.clone().ok_or(ProbeError::NoOutput)
    }

    pub fn set_limiter(&mut self, limiter: RateLimiter) {
        self.limiter = Some(limiter);
    }

    pub fn limiter(&self) -> Option<RateLimiter> {
        self.limiter.clone()
    }

    /// No limiter means no gating.
    pub async fn check_rate_limit(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }
    }

    pub fn spawn_worker<F>(&mut self, worker: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.workers.push(tokio::spawn(worker));
    }

    pub async fn wait(&mut self) {
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                warn!(probe = %self.name, "probe worker failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reports every target straight back as a result.
    struct EchoProbe {
        base: ProbeBase,
    }

    #[async_trait]
    impl Probe for EchoProbe {
        fn base(&self) -> &ProbeBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut ProbeBase {
            &mut self.base
        }

        async fn initialize(&mut self) -> Result<(), ProbeError> {
            self.setup();
            self.base.set_name("echo");
            let mut input = self.base.take_input()?;
            let output = self.base.output()?;
            self.base.spawn_worker(async move {
                while let Some(addr) = input.recv().await {
                    let r = ScanResult { host: addr.to_string(), probe: "echo".into(), ..Default::default() };
                    if output.send(r).await.is_err() {
                        return;
                    }
                }
            });
            Ok(())
        }
    }

    #[test]
    fn setup_names_generic_probe() {
        let mut base = ProbeBase::new();
        base.setup();
        assert_eq!(base.name(), "generic");
        assert!(base.take_input().is_ok());
        assert!(matches!(base.take_input(), Err(ProbeError::NotInitialized)));
    }

    #[tokio::test]
    async fn initialize_without_output_fails() {
        let mut p = EchoProbe { base: ProbeBase::new() };
        assert!(matches!(p.initialize().await, Err(ProbeError::NoOutput)));
    }

    #[tokio::test]
    async fn targets_flow_through_and_close_is_idempotent() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut p = EchoProbe { base: ProbeBase::new() };
        p.set_output(tx);
        p.set_limiter(RateLimiter::new(1000));
        p.initialize().await.unwrap();
        assert_eq!(p.name(), "echo");

        let collector = tokio::spawn(async move {
            let mut hosts = Vec::new();
            while let Some(r) = rx.recv().await {
                hosts.push(r.host);
            }
            hosts
        });

        for last in 1..=3u8 {
            p.check_rate_limit().await;
            p.add_target(Ipv4Addr::new(10, 0, 0, last)).await.unwrap();
        }
        p.close_input();
        p.close_input();
        assert!(matches!(p.add_target(Ipv4Addr::LOCALHOST).await, Err(ProbeError::InputClosed)));

        p.wait().await;
        drop(p);
        assert_eq!(collector.await.unwrap(), vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    }
}
