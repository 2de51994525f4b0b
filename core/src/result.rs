use serde::Serialize;
use std::collections::BTreeMap;

/// One discovered host, as reported by a probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    pub host: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub port: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub proto: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub probe: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nets: Vec<String>,
    pub info: BTreeMap<String, String>,
}

/// Destination for collected results. Driven by the pipeline's output collector.
pub trait ResultSink: Send + 'static {
    type Output: Send + 'static;

    fn record(&mut self, result: ScanResult) -> anyhow::Result<()>;

    /// Called once after the last result.
    fn finish(self) -> anyhow::Result<Self::Output>;
}

impl ResultSink for Vec<ScanResult> {
    type Output = Vec<ScanResult>;

    fn record(&mut self, result: ScanResult) -> anyhow::Result<()> {
        self.push(result);
        Ok(())
    }

    fn finish(self) -> anyhow::Result<Self::Output> {
        Ok(self)
    }
}
