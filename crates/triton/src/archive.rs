//! Offline stream archives: snappy-framed containers of encoded records.
//!
//! Writers buffer encoded records and emit one independently decodable
//! snappy frame block per flush under
//! `<base>/<YYYYMMDD>/<stream>-archive-<unix-seconds>.tri`.  Readers
//! tolerate block-level resynchronization: concatenated frame blocks
//! decode as one record sequence.

use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use thiserror::Error;

use crate::codec::{self, CodecError};
use crate::record::{FieldValue, RecordData};

/// Encoded bytes buffered before a block is flushed.
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("decode: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Appends records to a dated archive file.
///
/// The file (and its date directory) is created on the first flush, so
/// an unused writer leaves nothing behind.
pub struct StreamArchiveWriter {
    name: String,
    base_date: NaiveDate,
    ts: i64,
    base_path: PathBuf,
    buffer: Vec<u8>,
    writer: Option<File>,
}

impl StreamArchiveWriter {
    pub fn new(name: impl Into<String>, base_date: NaiveDate, base_path: impl Into<PathBuf>) -> Self {
        StreamArchiveWriter {
            name: name.into(),
            base_date,
            ts: Utc::now().timestamp(),
            base_path: base_path.into(),
            buffer: Vec::new(),
            writer: None,
        }
    }

    /// `<base>/<YYYYMMDD>/<stream>-archive-<unix-seconds>.tri`
    pub fn file_path(&self) -> PathBuf {
        let date_str = self.base_date.format("%Y%m%d").to_string();
        self.base_path
            .join(date_str)
            .join(format!("{}-archive-{}.tri", self.name, self.ts))
    }

    /// Encode and buffer one record, flushing when the buffer passes
    /// [`MAX_BUFFER_SIZE`].
    pub fn put(&mut self, data: &RecordData) -> Result<(), ArchiveError> {
        self.buffer.extend(codec::encode(data)?);
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            self.flush()?;
        }
        Ok(())
    }

    /// Compress the buffer into one snappy frame block and append it.
    pub fn flush(&mut self) -> Result<(), ArchiveError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        if self.writer.is_none() {
            let path = self.file_path();
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir)?;
            }
            self.writer = Some(File::create(&path)?);
        }

        let mut encoder = snap::write::FrameEncoder::new(Vec::new());
        encoder.write_all(&self.buffer)?;
        let block = encoder
            .into_inner()
            .map_err(|e| ArchiveError::Io(e.into_error()))?;
        if let Some(writer) = self.writer.as_mut() {
            writer.write_all(&block)?;
        }
        self.buffer.clear();
        Ok(())
    }

    /// Flush and release the file handle.
    pub fn close(mut self) -> Result<(), ArchiveError> {
        self.flush()?;
        self.writer = None;
        Ok(())
    }
}

/// Streams decoded records back out of an archive file.
pub struct StreamArchiveReader {
    decoder: snap::read::FrameDecoder<BufReader<File>>,
}

impl StreamArchiveReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let file = File::open(path)?;
        Ok(StreamArchiveReader {
            decoder: snap::read::FrameDecoder::new(BufReader::new(file)),
        })
    }

    /// The next record, or `None` at end of file.
    pub fn next_record(&mut self) -> Result<Option<RecordData>, ArchiveError> {
        match rmp_serde::from_read::<_, FieldValue>(ByEof(&mut self.decoder)) {
            Ok(FieldValue::Map(m)) => Ok(Some(m)),
            Ok(other) => Err(CodecError::UnknownType(format!(
                "archived value is not a map: {other:?}"
            ))
            .into()),
            Err(rmp_serde::decode::Error::InvalidMarkerRead(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Iterator for StreamArchiveReader {
    type Item = Result<RecordData, ArchiveError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// Thin reader adapter so a clean EOF at a record boundary surfaces as
/// `UnexpectedEof` on the first marker byte.
struct ByEof<'a, R>(&'a mut R);

impl<R: Read> Read for ByEof<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.0.read(buf)?;
        if n == 0 && !buf.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "end of archive",
            ));
        }
        Ok(n)
    }
}
