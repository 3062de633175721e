//! HTTP long-polling transport (§4.4.1, §4.4.4, §4.4.5).
//!
//! Stateless request helpers plus the polling payload batch codec. The
//! engine drives these from its own task queue: each call below is a plain
//! `async fn` spawned via `tokio::spawn` whose result is posted back as a
//! job, never awaited inline on the queue (§4.1: "tasks may not block").

use std::time::Duration;

use crate::config::{EngineIoClientConfig, ProtocolVersion};
use crate::error::{Error, Result};
use crate::packet::Packet;
use crate::sid::Sid;

const RECORD_SEPARATOR: char = '\u{1e}';

fn base_request(
    client: &reqwest::Client,
    config: &EngineIoClientConfig,
    sid: Option<&Sid>,
) -> reqwest::RequestBuilder {
    let mut url = config.url.clone();
    url.set_path(&config.path);
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("EIO", eio_version(config.protocol_version));
        pairs.append_pair("transport", "polling");
        if let Some(sid) = sid {
            pairs.append_pair("sid", sid.as_ref());
        }
        for (k, v) in &config.connect_params {
            pairs.append_pair(k, v);
        }
    }
    let mut builder = client.get(url);
    for (k, v) in &config.extra_headers {
        builder = builder.header(k, v);
    }
    builder
}

fn eio_version(version: ProtocolVersion) -> &'static str {
    match version {
        ProtocolVersion::V2 => "2",
        ProtocolVersion::V3 => "3",
        ProtocolVersion::V4 => "4",
    }
}

/// Issue the initial handshake `GET` and parse the returned `Open` packet.
pub async fn handshake(
    client: &reqwest::Client,
    config: &EngineIoClientConfig,
) -> Result<(Sid, Packet)> {
    let resp = base_request(client, config, None).send().await?;
    if !resp.status().is_success() {
        return Err(Error::HandshakeStatus(resp.status()));
    }
    let body = resp.text().await?;
    let packets = decode_payload(&body, config.protocol_version, config.max_payload)?;
    let open = packets
        .into_iter()
        .next()
        .ok_or(Error::EmptyPacket)?;
    let sid = match &open {
        Packet::Open(open) => open.sid.clone(),
        other => return Err(Error::BadPacket(other.clone())),
    };
    Ok((sid, open))
}

/// Long-poll `GET` returning whatever packets are currently queued for `sid`
/// server-side. Completes immediately if data is pending, otherwise the
/// server holds the request open until there is something to send.
pub async fn poll(
    client: &reqwest::Client,
    config: &EngineIoClientConfig,
    sid: &Sid,
) -> Result<Vec<Packet>> {
    let resp = base_request(client, config, Some(sid))
        .timeout(Duration::from_secs(120))
        .send()
        .await?;
    if !resp.status().is_success() {
        return Err(Error::HandshakeStatus(resp.status()));
    }
    let body = resp.text().await?;
    decode_payload(&body, config.protocol_version, config.max_payload)
}

/// `POST` a batch of outgoing packets.
pub async fn post(
    client: &reqwest::Client,
    config: &EngineIoClientConfig,
    sid: &Sid,
    packets: Vec<Packet>,
) -> Result<()> {
    let body = encode_payload(packets, config.protocol_version)?;
    let mut url = config.url.clone();
    url.set_path(&config.path);
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("EIO", eio_version(config.protocol_version));
        pairs.append_pair("transport", "polling");
        pairs.append_pair("sid", sid.as_ref());
    }
    let mut builder = client.post(url).body(body);
    for (k, v) in &config.extra_headers {
        builder = builder.header(k, v);
    }
    let resp = builder.send().await?;
    if !resp.status().is_success() {
        return Err(Error::HandshakeStatus(resp.status()));
    }
    Ok(())
}

/// Encode a batch of packets for one polling round-trip (§6).
///
/// v4+ separates packets with the ASCII record separator `\x1e`. v3 prefixes
/// each packet with its UTF-16 code-unit length followed by `:`.
pub fn encode_payload(packets: Vec<Packet>, version: ProtocolVersion) -> Result<String> {
    match version {
        ProtocolVersion::V3 | ProtocolVersion::V2 => {
            let mut out = String::new();
            for packet in packets {
                let s: String = packet.try_into()?;
                out.push_str(&s.encode_utf16().count().to_string());
                out.push(':');
                out.push_str(&s);
            }
            Ok(out)
        }
        ProtocolVersion::V4 => {
            let mut parts = Vec::new();
            for packet in packets {
                parts.push(String::try_from(packet)?);
            }
            Ok(parts.join(&RECORD_SEPARATOR.to_string()))
        }
    }
}

/// Decode a polling response body into its constituent packets (§6).
pub fn decode_payload(
    body: &str,
    version: ProtocolVersion,
    max_payload: usize,
) -> Result<Vec<Packet>> {
    if body.len() > max_payload {
        return Err(Error::PayloadTooLarge(body.len()));
    }
    if body.is_empty() {
        return Ok(Vec::new());
    }
    match version {
        ProtocolVersion::V3 | ProtocolVersion::V2 => {
            let mut packets = Vec::new();
            let mut rest = body;
            while !rest.is_empty() {
                let (len_str, tail) = rest.split_once(':').ok_or(Error::EmptyPacket)?;
                let len: usize = len_str.parse().map_err(|_| Error::EmptyPacket)?;
                let units: Vec<u16> = tail.encode_utf16().collect();
                if len > units.len() {
                    return Err(Error::EmptyPacket);
                }
                let packet_str = String::from_utf16(&units[..len]).map_err(|_| Error::EmptyPacket)?;
                packets.push(Packet::try_from(packet_str)?);
                // Advance rest past the consumed UTF-16 units, converted back
                // to a byte offset in the original UTF-8 string.
                let consumed_chars = units[..len].len();
                rest = &tail[byte_offset_for_utf16_units(tail, consumed_chars)..];
            }
            Ok(packets)
        }
        ProtocolVersion::V4 => body
            .split(RECORD_SEPARATOR)
            .map(|s| Packet::try_from(s.to_string()))
            .collect(),
    }
}

fn byte_offset_for_utf16_units(s: &str, units: usize) -> usize {
    let mut seen = 0usize;
    for (byte_idx, ch) in s.char_indices() {
        if seen >= units {
            return byte_idx;
        }
        seen += ch.len_utf16();
    }
    s.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v4_payload_round_trips() {
        let packets = vec![Packet::Ping, Packet::Message("hello".to_string())];
        let encoded = encode_payload(packets.clone(), ProtocolVersion::V4).unwrap();
        assert_eq!(encoded, "2\u{1e}4hello");
        let decoded = decode_payload(&encoded, ProtocolVersion::V4, 1_000_000).unwrap();
        assert_eq!(decoded, packets);
    }

    #[test]
    fn v3_payload_round_trips() {
        let packets = vec![Packet::Ping, Packet::Message("hi".to_string())];
        let encoded = encode_payload(packets.clone(), ProtocolVersion::V3).unwrap();
        assert_eq!(encoded, "1:24:4hi");
        let decoded = decode_payload(&encoded, ProtocolVersion::V3, 1_000_000).unwrap();
        assert_eq!(decoded, packets);
    }

    #[test]
    fn empty_body_decodes_to_no_packets() {
        assert_eq!(
            decode_payload("", ProtocolVersion::V4, 1_000_000).unwrap(),
            Vec::<Packet>::new()
        );
    }
}
