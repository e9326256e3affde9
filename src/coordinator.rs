//! The event loop that multiplexes the trawling manager's discoveries, the
//! metadata sink's verified records, and the shutdown signal (§2, §5).
use crate::config::Config;
use crate::dht::{Discovery, TrawlingManager};
use crate::metadata::{Candidate, MetadataSink};
use crate::store::{File, Store};

/// Runs the coordinator until `shutdown` resolves. The dedup database check
/// lives here, between the two streams, exactly as it does upstream: a
/// discovery is handed to the metadata sink only if its info-hash is not
/// already stored.
pub async fn run(store: &Store, config: &Config, shutdown: impl std::future::Future<Output = ()>) {
    let mut trawling_manager = match TrawlingManager::start(
        &config.dht.bind_addresses,
        config.dht.tick_interval(),
        config.dht.max_neighbors,
        config.dht.rate_limit_per_sec,
    )
    .await
    {
        Ok(manager) => manager,
        Err(source) => {
            tracing::error!(%source, "failed to start the trawling manager");
            return;
        }
    };

    let mut metadata_sink = MetadataSink::new(config.metadata.session_deadline(), config.metadata.max_concurrent_sessions);

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            discovery = trawling_manager.next() => {
                match discovery {
                    Some(discovery) => handle_discovery(store, &metadata_sink, discovery),
                    None => {
                        tracing::warn!("trawling manager output stream closed unexpectedly");
                        break;
                    }
                }
            }
            record = metadata_sink.drain() => {
                match record {
                    Some(record) => handle_metadata_record(store, record),
                    None => {
                        tracing::warn!("metadata sink output stream closed unexpectedly");
                        break;
                    }
                }
            }
            () = &mut shutdown => {
                tracing::info!("shutdown signal received");
                break;
            }
        }
    }

    trawling_manager.terminate();
}

fn handle_discovery(store: &Store, metadata_sink: &MetadataSink, discovery: Discovery) {
    let Some(peer_addr) = discovery.peer_addr else {
        // `get_peers` queries surface an info-hash with no specific peer; there is
        // nothing to dial yet.
        return;
    };

    let exists = match store.does_torrent_exist(&discovery.info_hash) {
        Ok(exists) => exists,
        Err(source) => {
            tracing::warn!(%source, "dedup check failed, skipping candidate");
            return;
        }
    };

    if !exists {
        metadata_sink.sink(Candidate { info_hash: discovery.info_hash, peer_addr });
    }
}

fn handle_metadata_record(store: &Store, record: crate::metadata::MetadataRecord) {
    let files: Vec<File> = record.files.into_iter().map(|f| File { path: f.path, size: f.size }).collect();

    if let Err(source) = store.add_new_torrent(&record.info_hash, &record.name, &files) {
        tracing::warn!(%source, info_hash = %record.info_hash, "failed to persist verified torrent");
    }
}
