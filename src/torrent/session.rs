//! Torrent session supervisor.
//!
//! Owns the lifecycle of one download: the planner, peer set, and storage
//! live here, tracker tasks and workers borrow shared handles to them, and
//! cancellation flows one way, from the supervisor's token down into every
//! task. Nothing holds a reference back to the session.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::utils::generate_peer_id;

use super::download::{Worker, WorkerOutcome};
use super::metainfo::Metainfo;
use super::peers::PeerSet;
use super::planner::Planner;
use super::storage::Storage;
use super::tracker::Tracker;

/// Upper bound on concurrently connected peers.
const MAX_WORKERS: usize = 40;
/// How long the supervisor dozes when there is no peer to hand out.
const IDLE_POLL: Duration = Duration::from_millis(500);

/// One torrent's download session.
pub struct Session {
    peer_id: [u8; 20],
    port: u16,
    output_dir: PathBuf,
}

impl Session {
    /// `port` is what trackers are told; this client does not listen for
    /// incoming connections.
    pub fn new(port: u16, output_dir: PathBuf) -> Self {
        Self {
            peer_id: generate_peer_id(),
            port,
            output_dir,
        }
    }

    pub fn peer_id(&self) -> [u8; 20] {
        self.peer_id
    }

    /// Runs the download to completion or external cancellation.
    ///
    /// Startup failures (storage initialization) are the only errors that
    /// escape; everything after that is handled by retrying with other
    /// peers. Returns `true` when every piece was acquired, `false` when the
    /// session was cancelled first.
    pub async fn download(
        &self,
        metainfo: &Metainfo,
        cancel: CancellationToken,
    ) -> Result<bool, Error> {
        let storage = Arc::new(Storage::create(&self.output_dir, metainfo)?);
        let planner = Arc::new(Planner::new(metainfo));
        let peers = Arc::new(PeerSet::new());
        info!(
            name = metainfo.name(),
            pieces = planner.total(),
            bytes = metainfo.total_length(),
            peer_id = %crate::utils::peer_id_str(&self.peer_id),
            "session started"
        );

        if metainfo.announce_urls().is_empty() {
            warn!("metainfo declares no trackers; waiting for cancellation");
        }

        // Trackers and workers get a child token so the session can shut
        // them down as soon as the last piece lands.
        let inner_cancel = cancel.child_token();
        let mut tracker_tasks = JoinSet::new();
        for url in metainfo.announce_urls() {
            let tracker = Tracker::new(
                url.clone(),
                metainfo.info_hash(),
                self.peer_id,
                self.port,
                metainfo.total_length(),
            );
            tracker_tasks.spawn(tracker.run(Arc::clone(&peers), inner_cancel.clone()));
        }

        let mut workers = JoinSet::new();
        while !planner.done() && !cancel.is_cancelled() {
            // Reap finished workers without blocking the spawn loop.
            while let Some(joined) = workers.try_join_next() {
                log_outcome(joined);
            }

            if workers.len() < MAX_WORKERS {
                if let Some(addr) = peers.take() {
                    debug!(peer = %addr, active = workers.len() + 1, "spawning worker");
                    let worker = Worker::new(
                        addr,
                        metainfo.info_hash(),
                        self.peer_id,
                        Arc::clone(&planner),
                        Arc::clone(&storage),
                        inner_cancel.clone(),
                    );
                    workers.spawn(worker.run());
                    continue;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(IDLE_POLL) => {}
            }
        }

        inner_cancel.cancel();
        while let Some(joined) = workers.join_next().await {
            log_outcome(joined);
        }
        while tracker_tasks.join_next().await.is_some() {}

        let complete = planner.done();
        if complete {
            info!(name = metainfo.name(), "download complete");
        } else {
            info!(
                name = metainfo.name(),
                remaining = planner.remaining(),
                "session cancelled"
            );
        }
        Ok(complete)
    }
}

fn log_outcome(joined: Result<WorkerOutcome, tokio::task::JoinError>) {
    match joined {
        Ok(WorkerOutcome::Completed) => debug!("worker finished: queue drained"),
        Ok(WorkerOutcome::Cancelled) => debug!("worker cancelled"),
        Ok(WorkerOutcome::PeerFailed(err)) => debug!(error = %err, "worker dropped peer"),
        Ok(WorkerOutcome::HashMismatch) => warn!("worker dropped peer after bad piece"),
        Err(err) => warn!(error = %err, "worker task panicked"),
    }
}
