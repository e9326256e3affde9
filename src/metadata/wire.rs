//! BitTorrent peer-wire framing: the v1 handshake, length-prefixed messages, the
//! BEP 10 extended handshake, and the BEP 9 ut_metadata sub-protocol.
use rand::Rng as _;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::bencode;
use crate::id::InfoHash;

const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";
const HANDSHAKE_LEN: usize = 68;

/// Byte index (from the start of the 8 reserved bytes) and bit mask of the
/// "supports BEP 10 extension protocol" flag.
const EXTENSION_BYTE: usize = 5;
const EXTENSION_MASK: u8 = 0x10;

pub const EXTENDED_MESSAGE_ID: u8 = 20;
pub const EXTENDED_HANDSHAKE_SUBID: u8 = 0;

/// 16 KiB, the fixed metadata piece size (§4.2).
pub const METADATA_PIECE_SIZE: usize = 16 * 1024;

/// Upper bound on a peer-announced `metadata_size`, per §4.2's 10 MiB policy ceiling.
pub const MAX_METADATA_SIZE: usize = 10 * 1024 * 1024;

/// Upper bound on any single peer-wire message this crate will buffer, to avoid
/// a misbehaving peer exhausting memory with a bogus length prefix.
const MAX_MESSAGE_LEN: u32 = (MAX_METADATA_SIZE + 64) as u32;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("peer closed the connection or sent malformed wire data: {0}")]
    Io(#[from] std::io::Error),
    #[error("handshake did not start with the BitTorrent protocol string")]
    BadHandshake,
    #[error("message length {0} exceeds the maximum this indexer will buffer")]
    MessageTooLarge(u32),
    #[error("malformed bencode in extension message: {0}")]
    Bencode(#[from] bencode::DecodeError),
    #[error("malformed extended handshake: {0}")]
    ExtendedHandshake(#[from] serde_bencode::Error),
}

/// The fixed 68-byte BitTorrent v1 handshake.
pub struct Handshake {
    pub extensions: [u8; 8],
    pub info_hash: InfoHash,
    pub peer_id: [u8; 20],
}

impl Handshake {
    /// Builds our own outbound handshake for `info_hash`, with the BEP 10
    /// extension bit set and a random peer ID prefixed per the usual
    /// Azureus-style convention.
    #[must_use]
    pub fn ours(info_hash: InfoHash) -> Self {
        let mut extensions = [0u8; 8];
        extensions[EXTENSION_BYTE] |= EXTENSION_MASK;

        let mut peer_id = [0u8; 20];
        peer_id[..8].copy_from_slice(b"-MG0001-");
        rand::thread_rng().fill(&mut peer_id[8..]);

        Self { extensions, info_hash, peer_id }
    }

    #[must_use]
    pub fn supports_extensions(&self) -> bool {
        self.extensions[EXTENSION_BYTE] & EXTENSION_MASK != 0
    }

    #[must_use]
    pub fn encode(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[0] = 19;
        buf[1..20].copy_from_slice(PROTOCOL);
        buf[20..28].copy_from_slice(&self.extensions);
        buf[28..48].copy_from_slice(self.info_hash.as_bytes());
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    fn decode(buf: &[u8; HANDSHAKE_LEN]) -> Result<Self, Error> {
        if buf[0] != 19 || &buf[1..20] != PROTOCOL {
            return Err(Error::BadHandshake);
        }
        let mut extensions = [0u8; 8];
        extensions.copy_from_slice(&buf[20..28]);
        let info_hash = InfoHash::try_from(&buf[28..48]).expect("slice is exactly 20 bytes");
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);
        Ok(Self { extensions, info_hash, peer_id })
    }

    /// Sends our handshake and reads the peer's, in that order (the deadline
    /// wrapping this call lives in `session.rs`).
    ///
    /// # Errors
    ///
    /// Returns [`Error`] on a connection failure or a malformed peer handshake.
    pub async fn exchange(stream: &mut TcpStream, info_hash: InfoHash) -> Result<Self, Error> {
        let ours = Self::ours(info_hash);
        stream.write_all(&ours.encode()).await?;

        let mut buf = [0u8; HANDSHAKE_LEN];
        stream.read_exact(&mut buf).await?;
        Self::decode(&buf)
    }
}

/// Writes a length-prefixed peer-wire message: `u32` big-endian length (covering
/// `id` and `payload`), then the message id byte, then the payload.
///
/// # Errors
///
/// Returns [`Error::Io`] on a write failure.
pub async fn write_message(stream: &mut TcpStream, id: u8, payload: &[u8]) -> Result<(), Error> {
    let len = u32::try_from(payload.len() + 1).map_err(|_| Error::MessageTooLarge(u32::MAX))?;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_u8(id).await?;
    stream.write_all(payload).await?;
    Ok(())
}

/// Reads one length-prefixed peer-wire message. A zero-length message (a
/// keep-alive) is reported as `id = 0xff` with an empty payload so callers can
/// tell it apart from message id 0 (`choke`).
///
/// # Errors
///
/// Returns [`Error::Io`] on a read failure or [`Error::MessageTooLarge`] if the
/// peer announces a length beyond what this indexer will buffer.
pub async fn read_message(stream: &mut TcpStream) -> Result<(u8, Vec<u8>), Error> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);

    if len == 0 {
        return Ok((0xff, Vec::new()));
    }
    if len > MAX_MESSAGE_LEN {
        return Err(Error::MessageTooLarge(len));
    }

    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    let id = buf[0];
    Ok((id, buf[1..].to_vec()))
}

#[derive(Debug, Serialize, Deserialize)]
struct ExtendedHandshakeDict {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ut_metadata: Option<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ExtendedHandshakePayload {
    m: ExtendedHandshakeDict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata_size: Option<i64>,
}

/// The negotiated parameters from a BEP 10/9 extended handshake exchange: the
/// peer's chosen `ut_metadata` message id and its announced `metadata_size`.
pub struct ExtendedHandshake {
    pub peer_ut_metadata_id: u8,
    pub metadata_size: usize,
}

/// Our outbound `ut_metadata` id, echoed back to us by convention; we never look
/// it up in the peer's reply because we only ever send the one extension.
pub(crate) const OUR_UT_METADATA_ID: u8 = 1;

/// Sends our extended handshake (`m: {ut_metadata: 1}`, `metadata_size: 0` since
/// we have none yet) and parses the peer's reply.
///
/// # Errors
///
/// Returns [`Error`] if the peer's reply is malformed, omits `ut_metadata`, or
/// announces a `metadata_size` outside `[1, MAX_METADATA_SIZE]`.
pub async fn exchange_extended_handshake(stream: &mut TcpStream) -> Result<ExtendedHandshake, Error> {
    let ours = ExtendedHandshakePayload { m: ExtendedHandshakeDict { ut_metadata: Some(OUR_UT_METADATA_ID) }, metadata_size: None };
    let payload = serde_bencode::to_bytes(&ours)?;
    write_message(stream, EXTENDED_MESSAGE_ID, &prefixed(EXTENDED_HANDSHAKE_SUBID, &payload)).await?;

    loop {
        let (id, body) = read_message(stream).await?;
        if id != EXTENDED_MESSAGE_ID {
            continue;
        }
        let Some((&subid, rest)) = body.split_first() else { continue };
        if subid != EXTENDED_HANDSHAKE_SUBID {
            continue;
        }

        let reply: ExtendedHandshakePayload = serde_bencode::from_bytes(rest)?;
        let peer_ut_metadata_id = reply.m.ut_metadata.ok_or(Error::BadHandshake)?;
        let metadata_size = reply.metadata_size.ok_or(Error::BadHandshake)?;
        if metadata_size < 1 || metadata_size as usize > MAX_METADATA_SIZE {
            return Err(Error::BadHandshake);
        }

        return Ok(ExtendedHandshake { peer_ut_metadata_id, metadata_size: metadata_size as usize });
    }
}

#[derive(Debug, Serialize)]
struct UtMetadataRequest {
    msg_type: i64,
    piece: i64,
}

/// Requests metadata piece `index` from the peer, addressed to its negotiated
/// `ut_metadata` extension id.
///
/// # Errors
///
/// Returns [`Error::Io`] on a write failure.
pub async fn request_piece(stream: &mut TcpStream, peer_ut_metadata_id: u8, index: u32) -> Result<(), Error> {
    let request = UtMetadataRequest { msg_type: 0, piece: i64::from(index) };
    let payload = serde_bencode::to_bytes(&request)?;
    write_message(stream, EXTENDED_MESSAGE_ID, &prefixed(peer_ut_metadata_id, &payload)).await
}

/// The outcome of receiving one ut_metadata extension message.
pub enum PieceMessage {
    Data { piece: u32, bytes: Vec<u8> },
    Reject { piece: u32 },
    /// Not a ut_metadata message (some other extension, or an unrelated BT
    /// message); caller should keep reading.
    Other,
}

/// Parses one already-read extension message body (the bytes after the
/// `EXTENDED_MESSAGE_ID` message id) as a ut_metadata `data` or `reject`.
///
/// # Errors
///
/// Returns [`Error::Bencode`] if the leading bencode header is malformed.
pub fn parse_piece_message(our_ut_metadata_id: u8, body: &[u8]) -> Result<PieceMessage, Error> {
    let Some((&subid, rest)) = body.split_first() else {
        return Ok(PieceMessage::Other);
    };
    if subid != our_ut_metadata_id {
        return Ok(PieceMessage::Other);
    }

    let (header, remainder) = bencode::decode_with_remainder(rest)?;

    let msg_type = header.get("msg_type").and_then(bencode::Value::as_int);
    let piece = header.get("piece").and_then(bencode::Value::as_int).unwrap_or(-1);
    let piece = match u32::try_from(piece) {
        Ok(piece) => piece,
        Err(_) => return Ok(PieceMessage::Other),
    };

    match msg_type {
        Some(1) => Ok(PieceMessage::Data { piece, bytes: remainder.to_vec() }),
        Some(2) => Ok(PieceMessage::Reject { piece }),
        _ => Ok(PieceMessage::Other),
    }
}

fn prefixed(subid: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 1);
    out.push(subid);
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_round_trips() {
        let info_hash = InfoHash::random();
        let handshake = Handshake::ours(info_hash);
        let encoded = handshake.encode();
        let decoded = Handshake::decode(&encoded).unwrap();
        assert_eq!(decoded.info_hash, info_hash);
        assert!(decoded.supports_extensions());
    }

    #[test]
    fn rejects_handshake_with_wrong_protocol_string() {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[0] = 19;
        buf[1..20].copy_from_slice(b"NotBitTorrent proto");
        assert!(Handshake::decode(&buf).is_err());
    }

    #[test]
    fn parses_data_piece_message() {
        let header = serde_bencode::to_bytes(&UtMetadataDataHeader { msg_type: 1, piece: 3, total_size: 100 }).unwrap();
        let mut body = vec![OUR_UT_METADATA_ID];
        body.extend_from_slice(&header);
        body.extend_from_slice(b"payload-bytes");

        match parse_piece_message(OUR_UT_METADATA_ID, &body).unwrap() {
            PieceMessage::Data { piece, bytes } => {
                assert_eq!(piece, 3);
                assert_eq!(bytes, b"payload-bytes");
            }
            _ => panic!("expected a data message"),
        }
    }

    #[test]
    fn parses_reject_message() {
        let header = serde_bencode::to_bytes(&UtMetadataReject { msg_type: 2, piece: 7 }).unwrap();
        let mut body = vec![OUR_UT_METADATA_ID];
        body.extend_from_slice(&header);

        match parse_piece_message(OUR_UT_METADATA_ID, &body).unwrap() {
            PieceMessage::Reject { piece } => assert_eq!(piece, 7),
            _ => panic!("expected a reject message"),
        }
    }

    #[derive(Serialize)]
    struct UtMetadataDataHeader {
        msg_type: i64,
        piece: i64,
        total_size: i64,
    }

    #[derive(Serialize)]
    struct UtMetadataReject {
        msg_type: i64,
        piece: i64,
    }
}
