use serde::{Deserialize, Serialize};

/// Configuration for the balance-normalization pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizerConfig {
    /// Currency every balance is valued in. Its own balance is worth 1:1,
    /// so it is never looked up.
    pub reference: String,
    /// Asset symbols excluded from valuation outright, quoted or not (e.g. a
    /// forked token that still shows a balance but cannot be sold).
    pub denylist: Vec<String>,
}

impl NormalizerConfig {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            denylist: Vec::new(),
        }
    }

    pub fn with_denylist(mut self, denylist: Vec<String>) -> Self {
        self.denylist = denylist;
        self
    }

    pub fn is_reference(&self, asset: &str) -> bool {
        self.reference == asset
    }

    pub fn is_denylisted(&self, asset: &str) -> bool {
        self.denylist.iter().any(|denied| denied == asset)
    }
}

impl Default for NormalizerConfig {
    /// Value everything in USDT, nothing denylisted.
    fn default() -> Self {
        Self::new("USDT")
    }
}
