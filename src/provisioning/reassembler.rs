//! Rebuilds provisioning requests from fragmented link writes

use bytes::BytesMut;
use serde_json::{Deserializer, Value};

/// Largest request the link will buffer
pub const MAX_BUFFER_LEN: usize = 4096;

/// Outcome of feeding one fragment
#[derive(Debug, Clone, PartialEq)]
pub enum Reassembled {
    /// Not a complete object yet, keep reading
    Incomplete,
    /// A complete request object; the buffer has been cleared
    Message(Value),
    /// The buffer can never become valid; it has been cleared
    Invalid(String),
}

/// Per-link accumulation buffer
#[derive(Debug, Default)]
pub struct Reassembler {
    buf: BytesMut,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment and try to complete a request.
    ///
    /// Bytes after the end of a completed object are discarded with it.
    pub fn push(&mut self, fragment: &[u8]) -> Reassembled {
        self.buf.extend_from_slice(fragment);

        if self.buf.len() > MAX_BUFFER_LEN {
            let len = self.buf.len();
            self.buf.clear();
            return Reassembled::Invalid(format!(
                "Message too large: {len} bytes exceeds {MAX_BUFFER_LEN}"
            ));
        }

        // An object cannot be complete before its closing brace arrives
        if !self.buf.contains(&b'}') {
            return Reassembled::Incomplete;
        }

        let mut stream = Deserializer::from_slice(&self.buf).into_iter::<Value>();
        let outcome = match stream.next() {
            None => return Reassembled::Incomplete,
            Some(Err(e)) if e.is_eof() => return Reassembled::Incomplete,
            Some(Err(e)) => Reassembled::Invalid(format!("Invalid JSON format: {e}")),
            Some(Ok(value)) if value.is_object() => Reassembled::Message(value),
            Some(Ok(_)) => Reassembled::Invalid("Invalid JSON format: expected an object".into()),
        };
        self.buf.clear();
        outcome
    }

    /// Drop anything buffered; called when the link goes away
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}
