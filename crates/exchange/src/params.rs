use std::fmt;

// ---------------------------------------------------------------------------
// Request Parameters
// ---------------------------------------------------------------------------

/// Ordered parameters for an exchange API call.
///
/// The exchange verifies the signature against the query string exactly as
/// transmitted, so parameter order is part of the signed payload. Pairs are
/// kept in insertion order; a sorted or hashed container would break the
/// signature.
#[derive(Debug, Clone, Default)]
pub struct RequestParams {
    pairs: Vec<(&'static str, String)>,
}

impl RequestParams {
    pub fn new() -> Self {
        Self { pairs: Vec::new() }
    }

    /// Append one parameter, named as the exchange spells it.
    pub fn push(&mut self, name: &'static str, value: impl fmt::Display) {
        self.pairs.push((name, value.to_string()));
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// The canonical query string: `key=value` pairs joined by `&` in
    /// insertion order.
    ///
    /// No URL-encoding is applied. That is only sound for the values this
    /// client transmits (numbers, enum tokens, plain symbols); a value
    /// containing `&` or `=` would corrupt the canonical string.
    pub fn canonical(&self) -> String {
        self.pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }
}
