//! Writer seam and the bundled sinks.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{ConvertError, Result};
use crate::pipeline::ConversionOutput;

/// Persists a finished conversion. Called once per successful run, after all
/// in-memory stages are done.
pub trait ConversionSink {
    fn write(&mut self, output: &ConversionOutput) -> Result<()>;
}

/// Pretty JSON of the skeleton, animations, submeshes and materials.
#[derive(Debug)]
pub struct JsonSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonSink<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .map_err(|e| ConvertError::Export(format!("{}: {e}", path.display())))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> ConversionSink for JsonSink<W> {
    fn write(&mut self, output: &ConversionOutput) -> Result<()> {
        serde_json::to_writer_pretty(&mut self.writer, output)
            .map_err(|e| ConvertError::Export(e.to_string()))?;
        self.writer
            .flush()
            .map_err(|e| ConvertError::Export(e.to_string()))
    }
}

/// Keeps the most recent output in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    last: Option<ConversionOutput>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output(&self) -> Option<&ConversionOutput> {
        self.last.as_ref()
    }

    pub fn take(&mut self) -> Option<ConversionOutput> {
        self.last.take()
    }
}

impl ConversionSink for MemorySink {
    fn write(&mut self, output: &ConversionOutput) -> Result<()> {
        self.last = Some(output.clone());
        Ok(())
    }
}
