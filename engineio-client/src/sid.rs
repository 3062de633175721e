use std::fmt;

use base64::Engine as _;
use rand::RngCore;

/// An opaque session identifier.
///
/// Server-assigned sids are parsed verbatim from the handshake payload; this
/// type never generates its own ids for a *server* role since this crate is
/// client-only, but [`Sid::placeholder`] is used before the handshake
/// completes (e.g. for log correlation of an in-flight `Opening` attempt).
#[derive(Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Sid(String);

impl Sid {
    /// A locally generated identifier, used only before a real sid is known.
    pub fn placeholder() -> Self {
        let mut bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
    }
}

impl From<String> for Sid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Sid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for Sid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sid({})", self.0)
    }
}
