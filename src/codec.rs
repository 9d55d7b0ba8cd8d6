//! Persisted blob format
//!
//! Every blob written by this crate is a JSON envelope:
//!
//! ```json
//! {"format": 1, "kind": "entity", "body": { ... }}
//! ```
//!
//! The envelope lets a load reject blobs written by an incompatible version,
//! or stored under the wrong path, with a clear error instead of a confusing
//! deserialization failure deep inside a memento.
//!
//! A single [`MementoCodec`] is created by the composition root and shared
//! with every persister.

use crate::error::{PersistError, Result};
use crate::memento::Memento;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Envelope version written by this build
pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    format: u32,
    kind: &'a str,
    body: &'a T,
}

#[derive(Deserialize)]
struct Envelope {
    format: u32,
    kind: String,
    body: serde_json::Value,
}

/// Encoder/decoder for persisted blobs
#[derive(Debug, Clone)]
pub struct MementoCodec {
    pretty: bool,
}

impl MementoCodec {
    pub fn new() -> Self {
        Self { pretty: false }
    }

    /// Write indented JSON, for stores that operators inspect by hand
    pub fn pretty(mut self) -> Self {
        self.pretty = true;
        self
    }

    /// Wrap `value` in an envelope tagged with `kind`
    pub fn encode<T: Serialize>(&self, kind: &str, value: &T) -> Result<Vec<u8>> {
        let envelope = EnvelopeRef {
            format: FORMAT_VERSION,
            kind,
            body: value,
        };
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(&envelope)?
        } else {
            serde_json::to_vec(&envelope)?
        };
        Ok(bytes)
    }

    /// Unwrap an envelope, checking its version and kind tag
    pub fn decode<T: DeserializeOwned>(&self, kind: &str, bytes: &[u8]) -> Result<T> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;

        if envelope.format != FORMAT_VERSION {
            return Err(PersistError::Codec {
                reason: format!(
                    "unsupported format version {} (expected {})",
                    envelope.format, FORMAT_VERSION
                ),
            });
        }
        if envelope.kind != kind {
            return Err(PersistError::Codec {
                reason: format!("expected kind '{}', found '{}'", kind, envelope.kind),
            });
        }

        Ok(serde_json::from_value(envelope.body)?)
    }

    pub fn encode_memento<M: Memento>(&self, memento: &M) -> Result<Vec<u8>> {
        self.encode(M::KIND.name(), memento)
    }

    pub fn decode_memento<M: Memento>(&self, bytes: &[u8]) -> Result<M> {
        self.decode(M::KIND.name(), bytes)
    }
}

impl Default for MementoCodec {
    fn default() -> Self {
        Self::new()
    }
}
