use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::sid::Sid;

/// Payload of an Engine.IO `Open` (type `0`) packet, as returned by the
/// server's handshake response (§6: `sid`, `upgrades`, `pingInterval`,
/// `pingTimeout`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPacket {
    pub sid: Sid,
    pub upgrades: Vec<String>,
    #[serde(rename = "pingInterval")]
    pub ping_interval: u64,
    #[serde(rename = "pingTimeout")]
    pub ping_timeout: u64,
    #[serde(rename = "maxPayload", skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

/// A single Engine.IO packet (§6: type digits `0`-`6`).
///
/// `PingUpgrade`/`PongUpgrade` are the probe variants of `Ping`/`Pong`: the
/// literal payload `"probe"` (§4.4.1) is folded into the variant instead of
/// carried as a string, the same way the teacher's server-side packet enum
/// distinguishes them.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(OpenPacket),
    Close,
    Ping,
    Pong,
    PingUpgrade,
    PongUpgrade,
    Message(String),
    Upgrade,
    Noop,
    /// A binary payload. On the websocket transport this is its own frame
    /// type; on the polling transport it is base64-encoded with a leading
    /// `b` (§6).
    Binary(Vec<u8>),
}

const PROBE: &str = "probe";

impl Packet {
    pub fn type_digit(&self) -> u8 {
        match self {
            Packet::Open(_) => 0,
            Packet::Close => 1,
            Packet::Ping | Packet::PingUpgrade => 2,
            Packet::Pong | Packet::PongUpgrade => 3,
            Packet::Message(_) => 4,
            Packet::Upgrade => 5,
            Packet::Noop => 6,
            Packet::Binary(_) => 4,
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Packet::Binary(_))
    }
}

impl TryFrom<Packet> for String {
    type Error = Error;

    fn try_from(packet: Packet) -> Result<Self, Self::Error> {
        let out = match packet {
            Packet::Open(open) => format!(
                "0{}",
                serde_json::to_string(&open).map_err(Error::MalformedOpenPacket)?
            ),
            Packet::Close => "1".to_string(),
            Packet::Ping => "2".to_string(),
            Packet::PingUpgrade => format!("2{PROBE}"),
            Packet::Pong => "3".to_string(),
            Packet::PongUpgrade => format!("3{PROBE}"),
            Packet::Message(msg) => format!("4{msg}"),
            Packet::Upgrade => "5".to_string(),
            Packet::Noop => "6".to_string(),
            Packet::Binary(data) => {
                format!(
                    "b{}",
                    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, data)
                )
            }
        };
        Ok(out)
    }
}

impl TryFrom<String> for Packet {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if let Some(rest) = value.strip_prefix('b') {
            let data = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, rest)
                .map_err(|_| Error::UnknownPacketType(b'b'))?;
            return Ok(Packet::Binary(data));
        }
        let mut chars = value.chars();
        let type_digit = chars.next().ok_or(Error::EmptyPacket)?;
        let rest = chars.as_str();
        let packet = match type_digit {
            '0' => {
                let open: OpenPacket =
                    serde_json::from_str(rest).map_err(Error::MalformedOpenPacket)?;
                Packet::Open(open)
            }
            '1' => Packet::Close,
            '2' if rest == PROBE => Packet::PingUpgrade,
            '2' => Packet::Ping,
            '3' if rest == PROBE => Packet::PongUpgrade,
            '3' => Packet::Pong,
            '4' => Packet::Message(rest.to_string()),
            '5' => Packet::Upgrade,
            '6' => Packet::Noop,
            other => return Err(Error::UnknownPacketType(other as u8)),
        };
        Ok(packet)
    }
}
