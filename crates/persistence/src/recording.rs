//! Append-only audio recording log (spec §6 "Persisted state layout").
//!
//! One LEB128-framed binary log per call identifier. The first record is a
//! header with session metadata; every subsequent record is an interleaved
//! `AudioChunk` frame tagged by leg and a monotonic timestamp. Retention,
//! encryption and access control are out-of-core (spec §9 Open Questions,
//! SPEC_FULL.md §D.2) — this module only appends.

use crate::error::PersistenceError;
use callbroker_core::{CallId, Codec, Role};
use chrono::{DateTime, Utc};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

const RECORD_KIND_HEADER: u8 = 0;
const RECORD_KIND_CHUNK: u8 = 1;

fn encode_leb128(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn codec_tag(codec: Codec) -> u8 {
    match codec {
        Codec::WebmOpus => 0,
        Codec::OggOpus => 1,
        Codec::WavPcm => 2,
        Codec::Mp3 => 3,
    }
}

fn role_tag(role: Role) -> u8 {
    match role {
        Role::Operator => 0,
        Role::Scammer => 1,
    }
}

/// A single recording log, one per call. Writers append frames as they
/// arrive; the file is never read back by the broker itself.
pub struct RecordingLog {
    writer: BufWriter<File>,
}

impl RecordingLog {
    /// Create the log file and write the header record.
    pub async fn create(
        dir: impl AsRef<Path>,
        call_id: &CallId,
        started_at: DateTime<Utc>,
    ) -> Result<Self, PersistenceError> {
        let path = dir.as_ref().join(format!("{}.callrec", call_id.as_str()));
        let file = File::create(&path)
            .await
            .map_err(|e| PersistenceError::RecordingError(format!("failed to create {:?}: {}", path, e)))?;

        let mut log = Self {
            writer: BufWriter::new(file),
        };
        log.write_header(call_id, started_at).await?;
        Ok(log)
    }

    async fn write_header(&mut self, call_id: &CallId, started_at: DateTime<Utc>) -> Result<(), PersistenceError> {
        let mut payload = Vec::new();
        payload.push(RECORD_KIND_HEADER);
        let id_bytes = call_id.as_str().as_bytes();
        encode_leb128(id_bytes.len() as u64, &mut payload);
        payload.extend_from_slice(id_bytes);
        encode_leb128(started_at.timestamp_millis() as u64, &mut payload);

        self.write_record(&payload).await
    }

    /// Append one audio chunk, tagged by leg and received-at timestamp.
    pub async fn append_chunk(
        &mut self,
        leg: Role,
        codec: Codec,
        payload: &[u8],
        received_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        let mut record = Vec::with_capacity(payload.len() + 16);
        record.push(RECORD_KIND_CHUNK);
        record.push(role_tag(leg));
        record.push(codec_tag(codec));
        encode_leb128(received_at.timestamp_millis() as u64, &mut record);
        encode_leb128(payload.len() as u64, &mut record);
        record.extend_from_slice(payload);

        self.write_record(&record).await
    }

    async fn write_record(&mut self, payload: &[u8]) -> Result<(), PersistenceError> {
        let mut framed = Vec::with_capacity(payload.len() + 5);
        encode_leb128(payload.len() as u64, &mut framed);
        framed.extend_from_slice(payload);

        self.writer
            .write_all(&framed)
            .await
            .map_err(|e| PersistenceError::RecordingError(e.to_string()))
    }

    pub async fn flush(&mut self) -> Result<(), PersistenceError> {
        self.writer
            .flush()
            .await
            .map_err(|e| PersistenceError::RecordingError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leb128_round_trips_small_and_large_values() {
        for value in [0u64, 1, 127, 128, 300, 1 << 20, u64::MAX >> 1] {
            let mut buf = Vec::new();
            encode_leb128(value, &mut buf);

            let mut decoded: u64 = 0;
            let mut shift = 0;
            for byte in &buf {
                decoded |= ((byte & 0x7f) as u64) << shift;
                if byte & 0x80 == 0 {
                    break;
                }
                shift += 7;
            }
            assert_eq!(decoded, value);
        }
    }

    #[tokio::test]
    async fn recording_log_appends_header_then_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let call_id = CallId::new("c1");
        let mut log = RecordingLog::create(dir.path(), &call_id, Utc::now()).await.unwrap();

        log.append_chunk(Role::Scammer, Codec::WavPcm, &[1, 2, 3], Utc::now())
            .await
            .unwrap();
        log.flush().await.unwrap();

        let path = dir.path().join("c1.callrec");
        let bytes = tokio::fs::read(&path).await.unwrap();
        assert!(!bytes.is_empty());
    }
}
