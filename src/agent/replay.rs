//! Record source reading a file of length prefixed records
//! (`len: u32 LE | record`), as dumped from a ring buffer.

use std::{io, path::Path};

use anyhow::{Context, Result};
use bpf_common::{RecordSource, bytes::Bytes};
use tokio::{
    fs::File,
    io::{AsyncRead, AsyncReadExt, BufReader},
};

/// Larger prefixes are treated as corruption.
pub const MAX_RECORD_SIZE: usize = 1024 * 1024;

pub struct ReplaySource<R> {
    reader: R,
    records: u64,
}

impl ReplaySource<BufReader<File>> {
    pub async fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .await
            .with_context(|| format!("Error opening replay file {}", path.display()))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: AsyncRead + Unpin + Send + 'static> ReplaySource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, records: 0 }
    }

    /// Number of records read so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    async fn read_record(&mut self) -> io::Result<Option<Bytes>> {
        let len = match self.reader.read_u32_le().await {
            Ok(len) => len as usize,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err),
        };
        if len > MAX_RECORD_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("record of {len} bytes exceeds {MAX_RECORD_SIZE}"),
            ));
        }
        let mut record = vec![0; len];
        self.reader.read_exact(&mut record).await?;
        self.records += 1;
        Ok(Some(Bytes::from(record)))
    }
}

impl<R: AsyncRead + Unpin + Send + 'static> RecordSource for ReplaySource<R> {
    async fn next_record(&mut self) -> Option<Bytes> {
        match self.read_record().await {
            Ok(record) => record,
            Err(err) => {
                log::warn!("replay stopped after {} records: {err}", self.records);
                None
            }
        }
    }
}

/// Append `record` to `out` with its length prefix.
pub fn write_record(out: &mut Vec<u8>, record: &[u8]) {
    out.extend_from_slice(&(record.len() as u32).to_le_bytes());
    out.extend_from_slice(record);
}
