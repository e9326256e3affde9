//! A single leech session's state machine (§4.2): `Connecting → Handshake →
//! ExtHandshake → Fetching → Verifying → Terminal`.
use std::net::SocketAddr;
use std::time::Duration;

use sha1::{Digest, Sha1};
use tokio::net::TcpStream;

use super::info_dict::{self, MetadataRecord};
use super::wire::{self, ExtendedHandshake, Handshake, PieceMessage, EXTENDED_MESSAGE_ID, METADATA_PIECE_SIZE};
use crate::id::InfoHash;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("connect error: {0}")]
    Connect(#[source] std::io::Error),
    #[error("wire error: {0}")]
    Wire(#[from] wire::Error),
    #[error("peer does not support the BEP 10 extension protocol")]
    NoExtensionSupport,
    #[error("peer's handshake info-hash does not match the one we dialled for")]
    InfoHashMismatch,
    #[error("peer rejected metadata piece {0}")]
    PieceRejected(u32),
    #[error("assembled metadata failed SHA-1 verification against the info-hash")]
    HashMismatch,
    #[error("verified metadata was rejected: {0}")]
    InfoDict(#[from] info_dict::Error),
    #[error("info dictionary normalised to zero total size or no files")]
    SemanticReject,
}

/// Runs one leech session to completion (or failure), bounded by `deadline`.
/// Never returns an error past this function: every outcome is `Ok` (a verified
/// record or nothing) because §4.2 treats all session failures as drop-and-move-on.
pub async fn run(addr: SocketAddr, info_hash: InfoHash, deadline: Duration) -> Option<MetadataRecord> {
    match tokio::time::timeout(deadline, leech(addr, info_hash)).await {
        Ok(Ok(record)) => Some(record),
        Ok(Err(source)) => {
            tracing::debug!(%source, %addr, info_hash = %info_hash, "leech session failed");
            None
        }
        Err(_) => {
            tracing::debug!(%addr, info_hash = %info_hash, "leech session exceeded its deadline");
            None
        }
    }
}

async fn leech(addr: SocketAddr, info_hash: InfoHash) -> Result<MetadataRecord, Error> {
    let mut stream = TcpStream::connect(addr).await.map_err(Error::Connect)?;

    let peer_handshake = Handshake::exchange(&mut stream, info_hash).await?;
    if !peer_handshake.supports_extensions() {
        return Err(Error::NoExtensionSupport);
    }
    if peer_handshake.info_hash != info_hash {
        return Err(Error::InfoHashMismatch);
    }

    let ExtendedHandshake { peer_ut_metadata_id, metadata_size } = wire::exchange_extended_handshake(&mut stream).await?;

    let total_pieces = metadata_size.div_ceil(METADATA_PIECE_SIZE);
    let mut buffer = vec![0u8; metadata_size];
    let mut received = vec![false; total_pieces];

    for piece in 0..total_pieces as u32 {
        wire::request_piece(&mut stream, peer_ut_metadata_id, piece).await?;
    }

    let mut remaining = total_pieces;
    while remaining > 0 {
        let (id, body) = wire::read_message(&mut stream).await?;
        if id != EXTENDED_MESSAGE_ID {
            continue;
        }

        match wire::parse_piece_message(wire::OUR_UT_METADATA_ID, &body)? {
            PieceMessage::Data { piece, bytes } => {
                let index = piece as usize;
                if index >= total_pieces || received[index] {
                    continue;
                }
                let offset = index * METADATA_PIECE_SIZE;
                let expected_len = piece_len(index, total_pieces, metadata_size);
                if bytes.len() != expected_len {
                    continue;
                }
                buffer[offset..offset + expected_len].copy_from_slice(&bytes);
                received[index] = true;
                remaining -= 1;
            }
            PieceMessage::Reject { piece } => return Err(Error::PieceRejected(piece)),
            PieceMessage::Other => {}
        }
    }

    let digest = Sha1::digest(&buffer);
    if digest.as_slice() != info_hash.as_bytes() {
        return Err(Error::HashMismatch);
    }

    match info_dict::normalize(info_hash, &buffer)? {
        Some(record) => Ok(record),
        None => Err(Error::SemanticReject),
    }
}

fn piece_len(index: usize, total_pieces: usize, metadata_size: usize) -> usize {
    if index == total_pieces - 1 {
        metadata_size - index * METADATA_PIECE_SIZE
    } else {
        METADATA_PIECE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn piece_len_is_full_size_except_for_the_last_piece() {
        // 40000 bytes = 2 full 16384-byte pieces plus a 7232-byte remainder.
        let total_pieces = 40_000usize.div_ceil(METADATA_PIECE_SIZE);
        assert_eq!(total_pieces, 3);
        assert_eq!(piece_len(0, total_pieces, 40_000), METADATA_PIECE_SIZE);
        assert_eq!(piece_len(1, total_pieces, 40_000), METADATA_PIECE_SIZE);
        assert_eq!(piece_len(2, total_pieces, 40_000), 40_000 - 2 * METADATA_PIECE_SIZE);
    }
}
