//! Record sinks: the consumers the sampler writes rows into

use crate::record::Field;
use crate::{Error, Result};
use std::io::Write;

pub const DEFAULT_SEPARATOR: char = ',';
pub const DEFAULT_PLACEHOLDER: &str = "-";

pub trait RecordSink {
    fn write_header(&mut self, columns: &[&str]) -> Result<()>;
    fn write_row(&mut self, values: &[Field]) -> Result<()>;
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: RecordSink + ?Sized> RecordSink for &mut S {
    fn write_header(&mut self, columns: &[&str]) -> Result<()> {
        (**self).write_header(columns)
    }

    fn write_row(&mut self, values: &[Field]) -> Result<()> {
        (**self).write_row(values)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

impl<S: RecordSink + ?Sized> RecordSink for Box<S> {
    fn write_header(&mut self, columns: &[&str]) -> Result<()> {
        (**self).write_header(columns)
    }

    fn write_row(&mut self, values: &[Field]) -> Result<()> {
        (**self).write_row(values)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkOptions {
    pub separator: char,
    pub placeholder: String,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR,
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
        }
    }
}

impl SinkOptions {
    pub fn delimiter(&self) -> Result<u8> {
        u8::try_from(self.separator)
            .ok()
            .filter(|b| b.is_ascii() && *b != b'\n' && *b != b'\r' && *b != b'"')
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "separator {:?} must be a single ASCII character",
                    self.separator
                ))
            })
    }
}

/// Delimited text over any writer: a file, stdout or an in-memory buffer.
pub struct DelimitedSink<W: Write> {
    writer: csv::Writer<W>,
    placeholder: String,
}

impl<W: Write> DelimitedSink<W> {
    pub fn new(inner: W, options: &SinkOptions) -> Result<Self> {
        let writer = csv::WriterBuilder::new()
            .delimiter(options.delimiter()?)
            .has_headers(false)
            .from_writer(inner);
        Ok(Self {
            writer,
            placeholder: options.placeholder.clone(),
        })
    }

    /// Flushes and returns the underlying writer.
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))
    }
}

impl<W: Write> RecordSink for DelimitedSink<W> {
    fn write_header(&mut self, columns: &[&str]) -> Result<()> {
        self.writer.write_record(columns)?;
        Ok(())
    }

    fn write_row(&mut self, values: &[Field]) -> Result<()> {
        let placeholder = &self.placeholder;
        self.writer
            .write_record(values.iter().map(|v| v.render(placeholder)))?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Keeps everything in memory; useful for tests and callers that post-process rows.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub header: Option<Vec<String>>,
    pub rows: Vec<Vec<Field>>,
    pub flushes: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordSink for MemorySink {
    fn write_header(&mut self, columns: &[&str]) -> Result<()> {
        self.header = Some(columns.iter().map(|c| c.to_string()).collect());
        Ok(())
    }

    fn write_row(&mut self, values: &[Field]) -> Result<()> {
        self.rows.push(values.to_vec());
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.flushes += 1;
        Ok(())
    }
}

/// Discards everything; for sessions run only for their summary.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl RecordSink for NullSink {
    fn write_header(&mut self, _columns: &[&str]) -> Result<()> {
        Ok(())
    }

    fn write_row(&mut self, _values: &[Field]) -> Result<()> {
        Ok(())
    }
}
