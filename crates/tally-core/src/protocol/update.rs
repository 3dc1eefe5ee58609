use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, TallyError};

/// One metric update, as sent by a client process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricUpdate {
    /// Registered metric name.
    pub name: String,
    /// Label values, positionally matched against the spec's `labels`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub label_values: Vec<String>,
    /// Verb (`inc`, `add`, `set`, `observe`, ...). Missing means empty, which
    /// every handler ignores.
    #[serde(default, deserialize_with = "null_as_default")]
    pub method: String,
    /// Operand for value-carrying methods; ignored by `inc`/`dec`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub value: f64,
}

impl MetricUpdate {
    pub fn new(name: impl Into<String>, method: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            label_values: Vec::new(),
            method: method.into(),
            value,
        }
    }

    pub fn with_labels<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.label_values = values.into_iter().map(Into::into).collect();
        self
    }
}

// `null` decodes like an absent field.
fn null_as_default<'de, D, T>(d: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

/// Decode a payload into updates, preserving array order.
///
/// The payload shape is picked from its first byte so serde reports the
/// offending element and field instead of a generic mismatch.
pub fn decode_payload(buf: &[u8]) -> Result<Vec<MetricUpdate>> {
    let invalid = |e: serde_json::Error| TallyError::Transport(format!("invalid payload: {e}"));
    match buf.iter().copied().find(|b| !b.is_ascii_whitespace()) {
        Some(b'[') => serde_json::from_slice::<Vec<MetricUpdate>>(buf).map_err(invalid),
        Some(b'{') => serde_json::from_slice::<MetricUpdate>(buf)
            .map(|u| vec![u])
            .map_err(invalid),
        _ => Err(TallyError::Transport(
            "payload is neither an update object nor an array of updates".into(),
        )),
    }
}

/// Report whether `buf` already holds one complete JSON value.
///
/// `Ok(false)` means more bytes are needed. Syntax errors are reported
/// immediately so a worker can drop the connection without waiting for EOF.
pub fn payload_complete(buf: &[u8]) -> Result<bool> {
    match serde_json::from_slice::<IgnoredAny>(buf) {
        Ok(_) => Ok(true),
        Err(e) if e.is_eof() => Ok(false),
        Err(e) => Err(TallyError::Transport(format!("invalid payload json: {e}"))),
    }
}
