//! KRPC message envelope and compact wire formats (BEP 5, BEP 51).
//!
//! Mirrors the envelope/tagged-enum shape used by every reference DHT crate in this
//! space (`krpc_protocol`'s `Message`/`MessageType`/`Query`/`Response`): one outer
//! struct carrying the transaction id, a `#[serde(tag = "y")]` enum for query vs.
//! response vs. error, and an inner `#[serde(tag = "q", content = "a")]` enum per
//! query type. Compact node/peer info is not itself bencode-shaped (it's raw bytes
//! packed 26- or 6-per-entry inside a byte string), so those two fields get their own
//! serde `with` modules rather than deriving directly.
use std::net::{Ipv4Addr, SocketAddrV4};

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_bytes::ByteBuf;

use crate::id::{InfoHash, NodeId};

/// Top-level KRPC message (BEP 5 §"KRPC Protocol").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    #[serde(rename = "t", with = "serde_bytes")]
    pub transaction_id: Vec<u8>,
    #[serde(flatten)]
    pub body: Body,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "y")]
pub enum Body {
    #[serde(rename = "q")]
    Query {
        #[serde(flatten)]
        query: Query,
    },
    #[serde(rename = "r")]
    Response { r: Response },
    #[serde(rename = "e")]
    Error { e: KrpcError },
}

/// `(error_code, message)`, encoded as a bencode list per BEP 5.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KrpcError(pub u32, pub String);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "q", content = "a")]
pub enum Query {
    #[serde(rename = "ping")]
    Ping { id: NodeId },

    #[serde(rename = "find_node")]
    FindNode { id: NodeId, target: NodeId },

    #[serde(rename = "get_peers")]
    GetPeers { id: NodeId, info_hash: InfoHash },

    #[serde(rename = "announce_peer")]
    AnnouncePeer {
        id: NodeId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        implied_port: Option<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
        info_hash: InfoHash,
        #[serde(with = "serde_bytes")]
        token: Vec<u8>,
    },

    #[serde(rename = "sample_infohashes")]
    SampleInfoHashes { id: NodeId, target: NodeId },
}

/// Untagged because BEP 5/51 gives every response shape the same outer key (`r`);
/// the variant is disambiguated by which fields are present, matching the approach
/// every reference DHT crate in this pack takes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Response {
    GetPeers {
        id: NodeId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<ByteBuf>,
        values: Vec<CompactPeer>,
    },
    Samples {
        id: NodeId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        interval: Option<u16>,
        #[serde(with = "compact_nodes")]
        nodes: Vec<NodeEntry>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        num: Option<u32>,
        samples: Vec<InfoHash>,
    },
    NextHop {
        id: NodeId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<ByteBuf>,
        #[serde(with = "compact_nodes")]
        nodes: Vec<NodeEntry>,
    },
    OnlyId {
        id: NodeId,
    },
}

/// One entry of BEP 5 "compact node info": a node id plus its IPv4 socket address,
/// 26 bytes total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeEntry {
    pub id: NodeId,
    pub addr: SocketAddrV4,
}

mod compact_nodes {
    use super::{Ipv4Addr, NodeEntry, NodeId, SocketAddrV4};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_bytes::ByteBuf;

    const ENTRY_LEN: usize = 26;

    pub fn serialize<S>(nodes: &[NodeEntry], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut buf = Vec::with_capacity(nodes.len() * ENTRY_LEN);
        for entry in nodes {
            buf.extend_from_slice(entry.id.as_bytes());
            buf.extend_from_slice(&entry.addr.ip().octets());
            buf.extend_from_slice(&entry.addr.port().to_be_bytes());
        }
        serde_bytes::Bytes::new(&buf).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<NodeEntry>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes = ByteBuf::deserialize(deserializer)?;
        if bytes.len() % ENTRY_LEN != 0 {
            return Err(D::Error::custom("compact node info length is not a multiple of 26"));
        }
        Ok(bytes
            .chunks(ENTRY_LEN)
            .map(|chunk| {
                let id = NodeId::try_from(&chunk[0..20]).expect("chunk is exactly 20 bytes");
                let ip = Ipv4Addr::new(chunk[20], chunk[21], chunk[22], chunk[23]);
                let port = u16::from_be_bytes([chunk[24], chunk[25]]);
                NodeEntry { id, addr: SocketAddrV4::new(ip, port) }
            })
            .collect())
    }
}

/// BEP 5 "compact peer info": 4-byte IPv4 address and 2-byte port, 6 bytes total.
/// Unlike compact node info these are each their own bencode byte string inside
/// a `values` list, so this type implements `Serialize`/`Deserialize` directly
/// rather than going through a `with` module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactPeer(pub SocketAddrV4);

impl Serialize for CompactPeer {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut buf = [0u8; 6];
        buf[..4].copy_from_slice(&self.0.ip().octets());
        buf[4..].copy_from_slice(&self.0.port().to_be_bytes());
        serde_bytes::Bytes::new(&buf).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CompactPeer {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes = ByteBuf::deserialize(deserializer)?;
        if bytes.len() != 6 {
            return Err(D::Error::custom("compact peer info must be 6 bytes"));
        }
        let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
        let port = u16::from_be_bytes([bytes[4], bytes[5]]);
        Ok(CompactPeer(SocketAddrV4::new(ip, port)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_query_round_trips() {
        let envelope = Envelope {
            transaction_id: vec![b'a', b'a'],
            body: Body::Query { query: Query::Ping { id: NodeId::random() } },
        };
        let encoded = serde_bencode::to_bytes(&envelope).unwrap();
        let decoded: Envelope = serde_bencode::from_bytes(&encoded).unwrap();
        assert_eq!(envelope, decoded);
    }

    #[test]
    fn find_node_response_round_trips_compact_nodes() {
        let nodes =
            vec![NodeEntry { id: NodeId::random(), addr: SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 6881) }];
        let envelope = Envelope {
            transaction_id: vec![b'b', b'b'],
            body: Body::Response {
                r: Response::NextHop { id: NodeId::random(), token: None, nodes: nodes.clone() },
            },
        };
        let encoded = serde_bencode::to_bytes(&envelope).unwrap();
        let decoded: Envelope = serde_bencode::from_bytes(&encoded).unwrap();
        match decoded.body {
            Body::Response { r: Response::NextHop { nodes: decoded_nodes, .. } } => {
                assert_eq!(decoded_nodes, nodes);
            }
            other => panic!("unexpected decoded body: {other:?}"),
        }
    }

    #[test]
    fn get_peers_response_round_trips_compact_peers() {
        let values = vec![CompactPeer(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 1234))];
        let envelope = Envelope {
            transaction_id: vec![b'c', b'c'],
            body: Body::Response {
                r: Response::GetPeers { id: NodeId::random(), token: Some(ByteBuf::from(vec![1, 2])), values: values.clone() },
            },
        };
        let encoded = serde_bencode::to_bytes(&envelope).unwrap();
        let decoded: Envelope = serde_bencode::from_bytes(&encoded).unwrap();
        match decoded.body {
            Body::Response { r: Response::GetPeers { values: decoded_values, .. } } => {
                assert_eq!(decoded_values, values);
            }
            other => panic!("unexpected decoded body: {other:?}"),
        }
    }

    #[test]
    fn rejects_compact_node_info_with_bad_length() {
        #[derive(Deserialize)]
        struct Wrapper {
            #[serde(with = "compact_nodes")]
            #[allow(dead_code)]
            nodes: Vec<NodeEntry>,
        }

        #[derive(Serialize)]
        struct RawWrapper {
            nodes: ByteBuf,
        }

        // 25 bytes, one short of a full 26-byte entry.
        let encoded = serde_bencode::to_bytes(&RawWrapper { nodes: ByteBuf::from(vec![0u8; 25]) }).unwrap();
        let result: Result<Wrapper, _> = serde_bencode::from_bytes(&encoded);
        assert!(result.is_err());
    }
}
