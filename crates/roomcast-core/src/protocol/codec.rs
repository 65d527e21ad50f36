//! JSON codec for envelopes.
//!
//! Wire format: one UTF-8 JSON object per envelope.  The outbound pump of a
//! session may coalesce several queued envelopes into one WebSocket text
//! frame; coalesced envelopes are separated by a single `\n`:
//!
//! ```text
//! {"action":"user-join",...}\n{"action":"user-join",...}\n{"action":"room-joined",...}
//! ```
//!
//! JSON never contains a raw newline outside a string, and `serde_json`
//! escapes newlines inside strings, so splitting on `\n` is unambiguous.

use thiserror::Error;

use crate::protocol::envelope::Envelope;

/// Separator between coalesced envelopes inside one frame.
pub const BATCH_SEPARATOR: char = '\n';

/// Errors that can occur during envelope encoding or decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The text is not a JSON object with the envelope's shape.
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The text was empty (or whitespace only).
    #[error("empty envelope")]
    Empty,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes an [`Envelope`] into its JSON text form.
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] if serialization fails (it does not
/// for any value this crate can construct, but the error is propagated rather
/// than unwrapped).
///
/// # Examples
///
/// ```rust
/// use roomcast_core::{decode, encode, Envelope, Identity};
///
/// let env = Envelope::user_joined(Identity::new("u1", "Taro"));
/// let text = encode(&env).unwrap();
/// assert_eq!(decode(&text).unwrap(), env);
/// ```
pub fn encode(envelope: &Envelope) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(envelope)?)
}

/// Decodes one envelope from JSON text.
///
/// # Errors
///
/// Returns [`ProtocolError::Empty`] for blank input and
/// [`ProtocolError::Malformed`] for anything that is not an envelope object.
pub fn decode(text: &str) -> Result<Envelope, ProtocolError> {
    if text.trim().is_empty() {
        return Err(ProtocolError::Empty);
    }
    Ok(serde_json::from_str(text)?)
}

/// Decodes every envelope of a (possibly coalesced) frame.
///
/// Each line is decoded independently, so one malformed line does not hide
/// the others.  Blank lines are skipped.
pub fn decode_batch(frame: &str) -> Vec<Result<Envelope, ProtocolError>> {
    frame
        .split(BATCH_SEPARATOR)
        .filter(|line| !line.trim().is_empty())
        .map(decode)
        .collect()
}

/// Joins already-encoded envelopes into a single coalesced frame.
pub fn join_batch<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut frame = String::new();
    for item in items {
        if !frame.is_empty() {
            frame.push(BATCH_SEPARATOR);
        }
        frame.push_str(item.as_ref());
    }
    frame
}

// ── Tests ─────────────────────────────────────────────────────────────────────
