//! Script-type classification from the address encoding alone.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Output script family, inferred from the address prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptType {
    P2wpkh,
    P2pkh,
    P2sh,
    Taproot,
    Unknown,
}

impl ScriptType {
    /// Classify an address by prefix. First match wins:
    /// `bc1q` → P2WPKH, `1` → P2PKH, `3` → P2SH, `bc1p` → Taproot.
    ///
    /// # Examples
    ///
    /// ```
    /// use cairn_core::script::ScriptType;
    /// assert_eq!(ScriptType::classify("bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq"), ScriptType::P2wpkh);
    /// assert_eq!(ScriptType::classify("1BoatSLRHtKNngkdXEeobR76b53LETtpyT"), ScriptType::P2pkh);
    /// assert_eq!(ScriptType::classify("Unknown"), ScriptType::Unknown);
    /// ```
    pub fn classify(address: &str) -> Self {
        if address.starts_with("bc1q") {
            Self::P2wpkh
        } else if address.starts_with('1') {
            Self::P2pkh
        } else if address.starts_with('3') {
            Self::P2sh
        } else if address.starts_with("bc1p") {
            Self::Taproot
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::P2wpkh => "p2wpkh",
            Self::P2pkh => "p2pkh",
            Self::P2sh => "p2sh",
            Self::Taproot => "taproot",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
