//! The DHT trawling manager (§4.1): a pool of indexer endpoints that abuses
//! Kademlia routing-table maintenance to make the swarm advertise info-hashes to us.
pub mod message;
mod neighbors;
mod throttle;

use std::net::SocketAddr;
use std::time::Duration;

use rand::Rng as _;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::id::{InfoHash, NodeId};
use message::{Body, CompactPeer, Envelope, KrpcError, Query, Response};
use neighbors::{Neighbor, NeighborSet};
use throttle::Throttle;

/// Number of leading bytes an outbound reply's node ID shares with the
/// correspondent's, chosen to land us in the correct Kademlia bucket of their
/// routing table (§4.1, §9 decision: hardcoded, not operator-configurable).
const NEIGHBOR_PREFIX_LEN: usize = 15;

/// `find_node` responses carry at most this many compact node entries (BEP 5).
const MAX_NODES_PER_RESPONSE: usize = 8;

const BOOTSTRAP_HOSTS: &[&str] =
    &["router.bittorrent.com:6881", "dht.transmissionbt.com:6881", "router.utorrent.com:6881"];

const MAX_DATAGRAM_SIZE: usize = 2048;

/// A discovered info-hash candidate, paired with the peer address it was learned
/// from (if any — `sample_infohashes` responses carry no specific peer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Discovery {
    pub info_hash: InfoHash,
    pub peer_addr: Option<SocketAddr>,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to bind UDP socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Runs a pool of indexers, one per configured bind address, and exposes their
/// combined discoveries as a single stream.
pub struct TrawlingManager {
    handles: Vec<tokio::task::JoinHandle<()>>,
    output: mpsc::Receiver<Discovery>,
}

impl TrawlingManager {
    /// Spawns one indexer task per `bind_addresses`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`] if any of the addresses fails to bind.
    pub async fn start(
        bind_addresses: &[SocketAddr],
        tick_interval: Duration,
        max_neighbors: usize,
        rate_limit_per_sec: u32,
    ) -> Result<Self, Error> {
        let (tx, rx) = mpsc::channel(4096);

        let mut handles = Vec::with_capacity(bind_addresses.len());
        for &addr in bind_addresses {
            let socket = UdpSocket::bind(addr).await.map_err(|source| Error::Bind { addr, source })?;
            let node_id = NodeId::random();
            let sender = tx.clone();
            let indexer = Indexer {
                socket,
                node_id,
                neighbors: NeighborSet::new(max_neighbors),
                tick_interval,
                rate_limit_per_sec,
                sender,
            };
            handles.push(tokio::spawn(indexer.run()));
        }

        Ok(Self { handles, output: rx })
    }

    /// Receives the next discovered candidate. Returns `None` once every indexer
    /// has terminated and the channel is drained.
    pub async fn next(&mut self) -> Option<Discovery> {
        self.output.recv().await
    }

    /// Aborts every indexer task and closes the output stream.
    pub fn terminate(self) {
        for handle in self.handles {
            handle.abort();
        }
    }
}

struct Indexer {
    socket: UdpSocket,
    node_id: NodeId,
    neighbors: NeighborSet,
    tick_interval: Duration,
    rate_limit_per_sec: u32,
    sender: mpsc::Sender<Discovery>,
}

impl Indexer {
    #[tracing::instrument(skip(self), fields(node_id = %self.node_id))]
    async fn run(mut self) {
        self.bootstrap().await;

        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut throttle = Throttle::new(self.rate_limit_per_sec, self.tick_interval);
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.on_tick(&mut throttle).await;
                }
                recv = self.socket.recv_from(&mut buf) => {
                    match recv {
                        Ok((len, from)) => self.on_datagram(&buf[..len], from).await,
                        Err(source) => tracing::debug!(%source, "udp recv error"),
                    }
                }
            }
        }
    }

    /// Seeds the neighbour set by sending `find_node` to the hardcoded bootstrap
    /// hosts, resolved once (§4.1: "if the neighbour set is empty").
    async fn bootstrap(&mut self) {
        for host in BOOTSTRAP_HOSTS {
            let Ok(mut addrs) = tokio::net::lookup_host(host).await else {
                tracing::debug!(host, "bootstrap host did not resolve");
                continue;
            };
            if let Some(addr) = addrs.next() {
                let target = NodeId::random();
                let query = self.envelope(Body::Query { query: Query::FindNode { id: self.node_id, target } });
                self.send(&query, addr).await;
            }
        }
    }

    async fn on_tick(&mut self, throttle: &mut Throttle) {
        let neighbor_addrs: Vec<(NodeId, SocketAddr)> = self.neighbors.iter().map(|n| (n.id, n.addr)).collect();
        for (_, addr) in neighbor_addrs {
            if !throttle.take() {
                break;
            }
            let target = NodeId::random();
            let query = self.envelope(Body::Query { query: Query::FindNode { id: self.node_id, target } });
            self.send(&query, addr).await;
        }

        if self.neighbors.is_empty() {
            self.bootstrap().await;
        }
    }

    async fn on_datagram(&mut self, bytes: &[u8], from: SocketAddr) {
        let envelope: Envelope = match serde_bencode::from_bytes(bytes) {
            Ok(envelope) => envelope,
            Err(source) => {
                tracing::debug!(%source, %from, "malformed bencode datagram");
                return;
            }
        };

        let transaction_id = envelope.transaction_id.clone();

        match envelope.body {
            Body::Query { query } => self.on_query(transaction_id, query, from).await,
            Body::Response { r } => self.on_response(r, from).await,
            Body::Error { e: KrpcError(code, message) } => {
                tracing::debug!(code, message, %from, "peer returned krpc error");
            }
        }
    }

    async fn on_query(&mut self, transaction_id: Vec<u8>, query: Query, from: SocketAddr) {
        match query {
            Query::Ping { id } => {
                let reply = self.reply(transaction_id, Response::OnlyId { id: self.spoofed_id(&id) });
                self.send(&reply, from).await;
            }
            Query::FindNode { id, .. } => {
                let reply =
                    self.reply(transaction_id, Response::NextHop { id: self.spoofed_id(&id), token: None, nodes: Vec::new() });
                self.send(&reply, from).await;
            }
            Query::GetPeers { id, info_hash } => {
                let token = token_for(&id);
                let reply = self.reply(
                    transaction_id,
                    Response::GetPeers { id: self.spoofed_id(&id), token: Some(token.into()), values: Vec::new() },
                );
                self.send(&reply, from).await;
                self.emit(Discovery { info_hash, peer_addr: None }).await;
            }
            Query::AnnouncePeer { id, info_hash, port, implied_port, .. } => {
                let peer_port = if implied_port == Some(1) { from.port() } else { port.unwrap_or(from.port()) };
                let peer_addr = SocketAddr::new(from.ip(), peer_port);
                let reply = self.reply(transaction_id, Response::OnlyId { id: self.spoofed_id(&id) });
                self.send(&reply, from).await;
                self.emit(Discovery { info_hash, peer_addr: Some(peer_addr) }).await;
            }
            Query::SampleInfoHashes { id, .. } => {
                let reply = self.reply(
                    transaction_id,
                    Response::Samples { id: self.spoofed_id(&id), interval: None, nodes: Vec::new(), num: Some(0), samples: Vec::new() },
                );
                self.send(&reply, from).await;
            }
        }
    }

    async fn on_response(&mut self, response: Response, from: SocketAddr) {
        match response {
            Response::NextHop { nodes, .. } => {
                for entry in nodes.into_iter().take(MAX_NODES_PER_RESPONSE) {
                    self.neighbors.insert(Neighbor { id: entry.id, addr: SocketAddr::V4(entry.addr) });
                }
            }
            Response::Samples { id, nodes, samples, .. } => {
                self.neighbors.insert(Neighbor { id, addr: from });
                for entry in nodes.into_iter().take(MAX_NODES_PER_RESPONSE) {
                    self.neighbors.insert(Neighbor { id: entry.id, addr: SocketAddr::V4(entry.addr) });
                }
                for info_hash in samples {
                    self.emit(Discovery { info_hash, peer_addr: Some(from) }).await;
                }
            }
            Response::GetPeers { values, .. } => {
                for CompactPeer(addr) in values {
                    tracing::trace!(%addr, "get_peers returned a compact peer we did not query for");
                }
            }
            Response::OnlyId { .. } => {}
        }
    }

    async fn emit(&self, discovery: Discovery) {
        if self.sender.send(discovery).await.is_err() {
            tracing::debug!("discovery channel closed, dropping candidate");
        }
    }

    fn spoofed_id(&self, correspondent: &NodeId) -> NodeId {
        NodeId::with_shared_prefix(correspondent, NEIGHBOR_PREFIX_LEN)
    }

    fn envelope(&self, body: Body) -> Envelope {
        Envelope { transaction_id: random_transaction_id(), body }
    }

    fn reply(&self, transaction_id: Vec<u8>, response: Response) -> Envelope {
        Envelope { transaction_id, body: Body::Response { r: response } }
    }

    async fn send(&self, envelope: &Envelope, to: SocketAddr) {
        let Ok(bytes) = serde_bencode::to_bytes(envelope) else {
            tracing::debug!("failed to encode outbound krpc message");
            return;
        };
        if let Err(source) = self.socket.send_to(&bytes, to).await {
            tracing::debug!(%source, %to, "udp send error");
        }
    }
}

fn random_transaction_id() -> Vec<u8> {
    let mut bytes = [0u8; 2];
    rand::thread_rng().fill(&mut bytes);
    bytes.to_vec()
}

/// A 2-byte `get_peers` token, deterministically derived from the correspondent's
/// node ID (§4.1) so we can accept the matching `announce_peer` without keeping
/// per-peer state.
fn token_for(correspondent: &NodeId) -> Vec<u8> {
    correspondent.as_bytes()[..2].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_for_is_deterministic() {
        let id = NodeId::random();
        assert_eq!(token_for(&id), token_for(&id));
    }

    #[test]
    fn random_transaction_id_is_two_bytes() {
        assert_eq!(random_transaction_id().len(), 2);
    }
}
