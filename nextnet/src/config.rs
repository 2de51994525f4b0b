use anyhow::{Context, Result};
use netbios_probe::NetbiosConfig;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG: &str = "nextnet.yaml";

#[derive(Debug, Default, Deserialize, Clone)]
pub struct NetbiosSection {
    pub port: Option<u16>,
    pub reply_window_ms: Option<u64>,
    pub max_pending: Option<usize>,
    pub send_attempts: Option<u32>,
    pub send_backoff_ms: Option<u64>,
}

impl NetbiosSection {
    /// Overlay the values present in the file onto `cfg`.
    pub fn apply(&self, cfg: &mut NetbiosConfig) {
        if let Some(p) = self.port { cfg.port = p; }
        if let Some(ms) = self.reply_window_ms { cfg.reply_window = Duration::from_millis(ms); }
        if let Some(n) = self.max_pending { cfg.max_pending = n; }
        if let Some(n) = self.send_attempts { cfg.send_attempts = n; }
        if let Some(ms) = self.send_backoff_ms { cfg.send_backoff = Duration::from_millis(ms); }
    }
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct Config {
    pub rate: Option<u32>,
    pub out: Option<PathBuf>,
    pub netbios: Option<NetbiosSection>,
}

impl Config {
    pub fn netbios(&self) -> NetbiosConfig {
        let mut cfg = NetbiosConfig::default();
        if let Some(section) = &self.netbios { section.apply(&mut cfg); }
        cfg
    }
}

/// Load an explicit config file, or `./nextnet.yaml` when it exists.
pub fn load_config(path: Option<&Path>) -> Result<Option<Config>> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new(DEFAULT_CONFIG);
            if p.exists() { p.to_path_buf() } else { return Ok(None); }
        }
    };
    let s = fs::read_to_string(&path).with_context(|| format!("failed to read config {}", path.display()))?;
    let cfg = serde_yaml::from_str(&s).with_context(|| format!("failed to parse config {}", path.display()))?;
    Ok(Some(cfg))
}
