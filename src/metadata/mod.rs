//! The metadata sink (§4.2): a bounded pool of concurrent BEP 9 leech sessions.
pub mod info_dict;
mod session;
mod wire;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};

pub use info_dict::{FileEntry, MetadataRecord};

use crate::id::InfoHash;

/// A candidate surfaced by the trawling manager: an info-hash and the address
/// of a peer believed to have it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub info_hash: InfoHash,
    pub peer_addr: SocketAddr,
}

/// Owns the concurrency budget and in-flight dedup set for the leech pool, and
/// exposes the verified-metadata output stream.
pub struct MetadataSink {
    semaphore: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<InfoHash>>>,
    deadline: Duration,
    result_tx: mpsc::Sender<MetadataRecord>,
    result_rx: mpsc::Receiver<MetadataRecord>,
}

impl MetadataSink {
    #[must_use]
    pub fn new(deadline: Duration, max_concurrent_sessions: usize) -> Self {
        let (result_tx, result_rx) = mpsc::channel(1024);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent_sessions)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            deadline,
            result_tx,
            result_rx,
        }
    }

    /// Enqueues `candidate` for leeching. A no-op if its info-hash is already
    /// being leeched or if the pool is at capacity (§4.2: "dropped otherwise").
    pub fn sink(&self, candidate: Candidate) {
        {
            let mut in_flight = self.in_flight.lock().expect("in-flight set mutex poisoned");
            if in_flight.contains(&candidate.info_hash) {
                return;
            }
            let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
                tracing::debug!(info_hash = %candidate.info_hash, "metadata sink at capacity, dropping candidate");
                return;
            };
            in_flight.insert(candidate.info_hash);
            drop(in_flight);

            let in_flight_handle = Arc::clone(&self.in_flight);
            let result_tx = self.result_tx.clone();
            let deadline = self.deadline;

            tokio::spawn(async move {
                let _permit = permit;
                if let Some(record) = session::run(candidate.peer_addr, candidate.info_hash, deadline).await {
                    let _ = result_tx.send(record).await;
                }
                in_flight_handle.lock().expect("in-flight set mutex poisoned").remove(&candidate.info_hash);
            });
        }
    }

    /// Receives the next verified metadata record. Returns `None` once every
    /// session has finished and all senders have been dropped.
    pub async fn drain(&mut self) -> Option<MetadataRecord> {
        self.result_rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sink_drops_duplicate_in_flight_candidates() {
        let sink = MetadataSink::new(Duration::from_millis(50), 10);
        let candidate = Candidate { info_hash: InfoHash::random(), peer_addr: "127.0.0.1:1".parse().unwrap() };

        sink.sink(candidate);
        sink.sink(candidate);

        assert_eq!(sink.in_flight.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sink_drops_candidates_beyond_capacity() {
        let sink = MetadataSink::new(Duration::from_secs(5), 1);
        let first = Candidate { info_hash: InfoHash::random(), peer_addr: "127.0.0.1:1".parse().unwrap() };
        let second = Candidate { info_hash: InfoHash::random(), peer_addr: "127.0.0.1:2".parse().unwrap() };

        sink.sink(first);
        sink.sink(second);

        // Only `first` should have acquired a permit; `second` was dropped outright.
        assert_eq!(sink.in_flight.lock().unwrap().len(), 1);
    }
}
