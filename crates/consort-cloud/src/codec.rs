//! JSON envelopes for cloud files.
//!
//! Every file carries a format version and its kind, so a device running an
//! older build refuses files it cannot read instead of misreading them.

use crate::error::CodecError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Current cloud file format version.
pub const FILE_FORMAT: u8 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    ChangeSet,
    Baseline,
    Device,
}

impl FileKind {
    fn name(self) -> &'static str {
        match self {
            FileKind::ChangeSet => "change_set",
            FileKind::Baseline => "baseline",
            FileKind::Device => "device",
        }
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    format: u8,
    kind: FileKind,
    payload: &'a T,
}

#[derive(Deserialize)]
struct Envelope<T> {
    format: u8,
    kind: FileKind,
    payload: T,
}

pub fn encode<T: Serialize>(kind: FileKind, payload: &T) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(&EnvelopeRef {
        format: FILE_FORMAT,
        kind,
        payload,
    })?)
}

pub fn decode<T: DeserializeOwned>(kind: FileKind, bytes: &[u8]) -> Result<T, CodecError> {
    let envelope: Envelope<serde_json::Value> = serde_json::from_slice(bytes)?;
    if envelope.format != FILE_FORMAT {
        return Err(CodecError::FormatMismatch {
            expected: FILE_FORMAT,
            actual: envelope.format,
        });
    }
    if envelope.kind != kind {
        return Err(CodecError::KindMismatch {
            expected: kind.name().to_string(),
            actual: envelope.kind.name().to_string(),
        });
    }
    Ok(serde_json::from_value(envelope.payload)?)
}
