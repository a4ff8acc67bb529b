//! Forwarder thread draining the admission queue into the dispatch queue.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use flume::{Receiver, Sender};
use tracing::{debug, warn};
use uuid::Uuid;

use super::lifecycle::InFlight;
use super::PoolCounters;

/// Moves tasks from the lobby to the dispatch queue in arrival order.
///
/// The dispatch queue is a rendezvous channel, so each send waits for an idle
/// worker. Returns once every lobby sender is gone and the lobby is empty.
pub(super) fn forward<T: Send>(
    pool_id: Uuid,
    lobby_rx: &Receiver<T>,
    dispatch_tx: &Sender<T>,
    in_flight: &Arc<InFlight>,
    counters: &Arc<PoolCounters>,
) {
    debug!(%pool_id, "Forwarder started");

    for task in lobby_rx.iter() {
        if dispatch_tx.send(task).is_err() {
            // Only possible once every worker is gone.
            warn!(%pool_id, "Dispatch queue closed while forwarding, dropping task");
            counters.queued_tasks.fetch_sub(1, Ordering::Relaxed);
            counters.abandoned_tasks.fetch_add(1, Ordering::Relaxed);
            in_flight.finish();
        }
    }

    debug!(%pool_id, "Lobby closed, forwarder exiting");
}
