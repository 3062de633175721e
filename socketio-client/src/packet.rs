//! Socket.IO packet framing (§4.3).
//!
//! Wire format: `<type>[<bin_count>-][<namespace>,][<ack_id>]<payload_json>`.
//! Binary attachments never appear inline in the JSON payload — they're
//! represented there as `{"_placeholder":true,"num":i}` and carried as
//! separate out-of-band frames in attachment order, reassembled by whoever
//! holds the packet until [`Packet::is_complete`].

use serde_json::Value;

use crate::error::{Error, Result};

/// Socket.IO packet type digit (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Connect,
    Disconnect,
    Event,
    Ack,
    ConnectError,
    BinaryEvent,
    BinaryAck,
}

impl PacketType {
    pub fn as_char(self) -> char {
        match self {
            PacketType::Connect => '0',
            PacketType::Disconnect => '1',
            PacketType::Event => '2',
            PacketType::Ack => '3',
            PacketType::ConnectError => '4',
            PacketType::BinaryEvent => '5',
            PacketType::BinaryAck => '6',
        }
    }

    pub fn from_char(c: char) -> Result<Self> {
        Ok(match c {
            '0' => PacketType::Connect,
            '1' => PacketType::Disconnect,
            '2' => PacketType::Event,
            '3' => PacketType::Ack,
            '4' => PacketType::ConnectError,
            '5' => PacketType::BinaryEvent,
            '6' => PacketType::BinaryAck,
            other => return Err(Error::UnknownPacketType(other as u8)),
        })
    }

    pub fn is_binary(self) -> bool {
        matches!(self, PacketType::BinaryEvent | PacketType::BinaryAck)
    }
}

/// A decoded socket.io packet, possibly still waiting on binary attachments.
#[derive(Debug, Clone)]
pub struct Packet {
    pub kind: PacketType,
    pub namespace: String,
    pub ack_id: Option<i64>,
    pub data: Option<Value>,
    pub expected_attachments: usize,
    pub attachments: Vec<Vec<u8>>,
}

impl Packet {
    pub fn connect(namespace: impl Into<String>, auth: Option<Value>) -> Self {
        Self {
            kind: PacketType::Connect,
            namespace: namespace.into(),
            ack_id: None,
            data: auth,
            expected_attachments: 0,
            attachments: Vec::new(),
        }
    }

    pub fn disconnect(namespace: impl Into<String>) -> Self {
        Self {
            kind: PacketType::Disconnect,
            namespace: namespace.into(),
            ack_id: None,
            data: None,
            expected_attachments: 0,
            attachments: Vec::new(),
        }
    }

    pub fn event(
        namespace: impl Into<String>,
        ack_id: Option<i64>,
        data: Value,
        attachments: Vec<Vec<u8>>,
    ) -> Self {
        let kind = if attachments.is_empty() {
            PacketType::Event
        } else {
            PacketType::BinaryEvent
        };
        Self {
            kind,
            namespace: namespace.into(),
            ack_id,
            data: Some(data),
            expected_attachments: attachments.len(),
            attachments,
        }
    }

    pub fn ack(namespace: impl Into<String>, ack_id: i64, data: Value, attachments: Vec<Vec<u8>>) -> Self {
        let kind = if attachments.is_empty() {
            PacketType::Ack
        } else {
            PacketType::BinaryAck
        };
        Self {
            kind,
            namespace: namespace.into(),
            ack_id: Some(ack_id),
            data: Some(data),
            expected_attachments: attachments.len(),
            attachments,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.attachments.len() >= self.expected_attachments
    }

    pub fn push_attachment(&mut self, data: Vec<u8>) {
        self.attachments.push(data);
    }

    /// Text frame for this packet, `_placeholder` markers and all. The
    /// binary attachments themselves are sent separately, in order,
    /// immediately after this frame (§4.3).
    pub fn encode_text(&self) -> String {
        let mut out = String::new();
        out.push(self.kind.as_char());
        if self.kind.is_binary() {
            out.push_str(&self.attachments.len().to_string());
            out.push('-');
        }
        if self.namespace != "/" {
            out.push_str(&self.namespace);
            out.push(',');
        }
        if let Some(id) = self.ack_id {
            out.push_str(&id.to_string());
        }
        if let Some(data) = &self.data {
            out.push_str(&data.to_string());
        }
        out
    }

    pub fn decode_text(text: &str) -> Result<Packet> {
        let mut iter = text.chars();
        let type_char = iter.next().ok_or(Error::UnknownPacketType(0))?;
        let kind = PacketType::from_char(type_char)?;
        let mut rest = iter.as_str();

        let mut expected_attachments = 0usize;
        if kind.is_binary() {
            let dash = rest
                .find('-')
                .ok_or_else(|| Error::UnknownPacketType(type_char as u8))?;
            expected_attachments = rest[..dash].parse().unwrap_or(0);
            rest = &rest[dash + 1..];
        }

        let mut namespace = "/".to_string();
        if rest.starts_with('/') {
            let comma = rest.find(',').unwrap_or(rest.len());
            namespace = rest[..comma].to_string();
            rest = if comma < rest.len() { &rest[comma + 1..] } else { "" };
        }

        let digit_len = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        let ack_id = if digit_len > 0 {
            rest[..digit_len].parse::<i64>().ok()
        } else {
            None
        };
        rest = &rest[digit_len..];

        let data = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str(rest)?)
        };

        Ok(Packet {
            kind,
            namespace,
            ack_id,
            data,
            expected_attachments,
            attachments: Vec::new(),
        })
    }
}

/// One argument passed to `emit`/received by a handler: plain JSON, a raw
/// top-level binary blob, or a JSON tree that may itself carry binary blobs
/// nested at any depth. Keeping binary as its own representation, instead of
/// smuggling bytes through a JSON number or base64 string, is the
/// representation this layer settles on (Design Notes §9).
#[derive(Debug, Clone)]
pub enum EventArg {
    Json(Value),
    Binary(Vec<u8>),
    Value(Value),
}

/// Sentinel object key used to carry a raw binary blob inside a
/// [`Value`] tree ahead of placeholder substitution. `serde_json::Value` has
/// no byte-string variant, so a blob built for [`EventArg::Value`] is wrapped
/// as `{"_raw_binary": [<bytes as numbers>]}` and unwrapped again by
/// [`encode_args`]/[`decode_args`] — this key never appears on the wire.
const RAW_BINARY_KEY: &str = "_raw_binary";

impl EventArg {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            EventArg::Json(v) | EventArg::Value(v) => Some(v),
            EventArg::Binary(_) => None,
        }
    }

    /// Wrap a blob so it can be embedded anywhere inside a `Value` tree
    /// passed to [`EventArg::Value`], not just as a top-level argument.
    pub fn embed_binary(bytes: impl Into<Vec<u8>>) -> Value {
        serde_json::json!({ RAW_BINARY_KEY: Value::Array(bytes.into().into_iter().map(Value::from).collect()) })
    }

    /// Inverse of [`EventArg::embed_binary`]: recover the blob if `value` is
    /// exactly one of its sentinels.
    fn extract_embedded_binary(value: &Value) -> Option<Vec<u8>> {
        let obj = value.as_object()?;
        if obj.len() != 1 {
            return None;
        }
        let bytes = obj.get(RAW_BINARY_KEY)?.as_array()?;
        bytes.iter().map(|b| b.as_u64().map(|n| n as u8)).collect()
    }
}

/// Flatten a list of arguments into the packet's `data` array plus the
/// binary attachments it references. Binary may occur as a top-level
/// argument (`EventArg::Binary`) or anywhere inside an `EventArg::Value`
/// tree (wrapped via [`EventArg::embed_binary`]); both are walked
/// depth-first pre-order and each blob is replaced by a
/// `{"_placeholder":true,"num":i}` marker in encounter order (§4.3.2).
pub fn encode_args(args: Vec<EventArg>) -> (Value, Vec<Vec<u8>>) {
    let mut attachments = Vec::new();
    let values: Vec<Value> = args
        .into_iter()
        .map(|arg| match arg {
            EventArg::Json(v) => v,
            EventArg::Binary(bytes) => placeholder_for(bytes, &mut attachments),
            EventArg::Value(v) => extract_placeholders(v, &mut attachments),
        })
        .collect();
    (Value::Array(values), attachments)
}

fn placeholder_for(bytes: Vec<u8>, attachments: &mut Vec<Vec<u8>>) -> Value {
    let idx = attachments.len();
    attachments.push(bytes);
    serde_json::json!({ "_placeholder": true, "num": idx })
}

fn extract_placeholders(value: Value, attachments: &mut Vec<Vec<u8>>) -> Value {
    if let Some(bytes) = EventArg::extract_embedded_binary(&value) {
        return placeholder_for(bytes, attachments);
    }
    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| extract_placeholders(v, attachments))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, extract_placeholders(v, attachments)))
                .collect(),
        ),
        other => other,
    }
}

/// Inverse of [`encode_args`]: resolve placeholders against a completed
/// attachment list, walking nested objects/arrays depth-first so a blob
/// embedded anywhere in the tree (not just at the top level) is restored.
/// A top-level argument that is itself a placeholder decodes to
/// `EventArg::Binary`; one with a placeholder somewhere underneath decodes
/// to `EventArg::Value` with the blob restored as an
/// [`EventArg::embed_binary`] sentinel; anything else decodes unchanged as
/// `EventArg::Json`.
pub fn decode_args(data: Option<Value>, attachments: &[Vec<u8>]) -> Result<Vec<EventArg>> {
    let values = match data {
        Some(Value::Array(items)) => items,
        Some(other) => vec![other],
        None => Vec::new(),
    };
    values.into_iter().map(|v| resolve_arg(v, attachments)).collect()
}

fn resolve_arg(value: Value, attachments: &[Vec<u8>]) -> Result<EventArg> {
    if is_placeholder(&value) {
        return Ok(EventArg::Binary(resolve_placeholder(&value, attachments)?));
    }
    let mut replaced = false;
    let resolved = resolve_nested(value, attachments, &mut replaced)?;
    Ok(if replaced {
        EventArg::Value(resolved)
    } else {
        EventArg::Json(resolved)
    })
}

fn resolve_nested(value: Value, attachments: &[Vec<u8>], replaced: &mut bool) -> Result<Value> {
    if is_placeholder(&value) {
        *replaced = true;
        let bytes = resolve_placeholder(&value, attachments)?;
        return Ok(EventArg::embed_binary(bytes));
    }
    match value {
        Value::Array(items) => Ok(Value::Array(
            items
                .into_iter()
                .map(|v| resolve_nested(v, attachments, replaced))
                .collect::<Result<Vec<_>>>()?,
        )),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k, resolve_nested(v, attachments, replaced)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other),
    }
}

fn is_placeholder(value: &Value) -> bool {
    matches!(value.get("_placeholder"), Some(Value::Bool(true)))
}

fn resolve_placeholder(value: &Value, attachments: &[Vec<u8>]) -> Result<Vec<u8>> {
    let idx = value.get("num").and_then(Value::as_u64).unwrap_or(0) as usize;
    attachments.get(idx).cloned().ok_or(Error::BinaryCountMismatch {
        expected: idx + 1,
        got: attachments.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_round_trips_through_text() {
        let data = serde_json::json!(["chat message", "hello"]);
        let packet = Packet::event("/", Some(12), data.clone(), Vec::new());
        let text = packet.encode_text();
        assert_eq!(text, "212[\"chat message\",\"hello\"]");
        let decoded = Packet::decode_text(&text).unwrap();
        assert_eq!(decoded.kind, PacketType::Event);
        assert_eq!(decoded.ack_id, Some(12));
        assert_eq!(decoded.namespace, "/");
        assert_eq!(decoded.data, Some(data));
    }

    #[test]
    fn namespace_and_no_ack_round_trips() {
        let packet = Packet::event("/admin", None, serde_json::json!(["ping"]), Vec::new());
        let text = packet.encode_text();
        assert_eq!(text, "2/admin,[\"ping\"]");
        let decoded = Packet::decode_text(&text).unwrap();
        assert_eq!(decoded.namespace, "/admin");
        assert_eq!(decoded.ack_id, None);
    }

    #[test]
    fn binary_event_header_carries_attachment_count() {
        let (data, attachments) = encode_args(vec![
            EventArg::Json(serde_json::json!("image")),
            EventArg::Binary(vec![1, 2, 3]),
        ]);
        let packet = Packet::event("/", Some(3), data, attachments);
        let text = packet.encode_text();
        assert!(text.starts_with("51-3"));
        let mut decoded = Packet::decode_text(&text).unwrap();
        assert_eq!(decoded.expected_attachments, 1);
        assert!(!decoded.is_complete());
        decoded.push_attachment(vec![1, 2, 3]);
        assert!(decoded.is_complete());
        let args = decode_args(decoded.data, &decoded.attachments).unwrap();
        assert_eq!(args.len(), 2);
        assert!(matches!(args[1], EventArg::Binary(ref b) if b == &[1, 2, 3]));
    }

    #[test]
    fn nested_binary_blob_is_placed_depth_first() {
        // spec.md §8 scenario 3: upload("f", <0xDEADBEEF>) nested one level
        // inside an object, not a top-level argument.
        let payload = serde_json::json!({
            "name": "f",
            "data": EventArg::embed_binary(vec![0xDE, 0xAD, 0xBE, 0xEF]),
        });
        let (data, attachments) = encode_args(vec![
            EventArg::Json(serde_json::json!("upload")),
            EventArg::Value(payload),
        ]);
        assert_eq!(attachments, vec![vec![0xDE, 0xAD, 0xBE, 0xEF]]);

        let packet = Packet::event("/", None, data, attachments);
        let text = packet.encode_text();
        assert!(text.starts_with("51-"));

        let mut decoded = Packet::decode_text(&text).unwrap();
        assert_eq!(decoded.expected_attachments, 1);
        assert_eq!(
            decoded.data,
            Some(serde_json::json!([
                "upload",
                { "name": "f", "data": { "_placeholder": true, "num": 0 } }
            ]))
        );
        decoded.push_attachment(vec![0xDE, 0xAD, 0xBE, 0xEF]);

        let args = decode_args(decoded.data, &decoded.attachments).unwrap();
        assert_eq!(args.len(), 2);
        assert!(matches!(args[0], EventArg::Json(Value::String(ref s)) if s == "upload"));
        match &args[1] {
            EventArg::Value(v) => {
                assert_eq!(v.get("name").and_then(Value::as_str), Some("f"));
                let bytes = EventArg::extract_embedded_binary(v.get("data").unwrap()).unwrap();
                assert_eq!(bytes, vec![0xDE, 0xAD, 0xBE, 0xEF]);
            }
            other => panic!("expected EventArg::Value, got {other:?}"),
        }
    }

    #[test]
    fn disconnect_has_no_payload() {
        let packet = Packet::disconnect("/chat");
        assert_eq!(packet.encode_text(), "1/chat,");
        let decoded = Packet::decode_text("1/chat,").unwrap();
        assert_eq!(decoded.kind, PacketType::Disconnect);
        assert_eq!(decoded.data, None);
    }

    #[test]
    fn unknown_type_digit_is_error() {
        assert!(matches!(
            Packet::decode_text("9{}"),
            Err(Error::UnknownPacketType(b'9'))
        ));
    }
}
