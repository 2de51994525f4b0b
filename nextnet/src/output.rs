use anyhow::{Context, Result};
use nextnet_core::{ResultSink, ScanResult};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Streams one JSON object per line to `stream` and, when a file was requested,
/// writes every result to it as a single JSON array at the end of the run.
pub struct JsonSink<W: Write + Send + 'static> {
    stream: W,
    file: Option<(PathBuf, File)>,
    collected: Vec<ScanResult>,
}

impl<W: Write + Send + 'static> JsonSink<W> {
    /// The file is created up front so an unwritable path fails before scanning.
    pub fn new(stream: W, path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => {
                let f = File::create(p).with_context(|| format!("failed to create output file {}", p.display()))?;
                Some((p.to_path_buf(), f))
            }
            None => None,
        };
        Ok(JsonSink { stream, file, collected: Vec::new() })
    }
}

impl<W: Write + Send + 'static> ResultSink for JsonSink<W> {
    type Output = W;

    fn record(&mut self, result: ScanResult) -> Result<()> {
        let line = serde_json::to_string(&result)?;
        if self.file.is_some() {
            self.collected.push(result);
        }
        writeln!(self.stream, "{}", line)?;
        self.stream.flush()?;
        Ok(())
    }

    fn finish(self) -> Result<W> {
        if let Some((path, file)) = self.file {
            let mut w = BufWriter::new(file);
            serde_json::to_writer(&mut w, &self.collected)
                .with_context(|| format!("failed to write results to {}", path.display()))?;
            w.flush()?;
        }
        Ok(self.stream)
    }
}
