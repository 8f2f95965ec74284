//! Parallel iterative k-closest lookup.
//!
//! One driver task owns the query state; up to alpha RPCs are in flight at a
//! time, always aimed at the closest not-yet-queried candidate. Responses
//! merge newly learned peers into the shortlist; the accept predicate runs on
//! the driver task so result selection is deterministic.

use std::collections::HashMap;
use std::future::Future;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use cairn_types::PeerId;

use crate::error::{DhtError, DhtResult};
use crate::key::DhtKey;

/// Concurrency and result-set parameters for one lookup.
#[derive(Clone, Copy, Debug)]
pub struct QueryConfig {
    pub k: usize,
    pub alpha: usize,
}

/// What a single RPC contributed to the query.
#[derive(Debug, Default)]
pub struct QueryStep<R> {
    /// Peers the responder believes are closer to the target.
    pub closer: Vec<PeerId>,
    /// Payload items (records, providers, the target itself).
    pub found: Vec<R>,
}

/// Final state of a finished query.
#[derive(Debug)]
pub struct QueryOutcome<R> {
    /// Accumulated payload items, in driver-observed order.
    pub results: Vec<R>,
    /// The k closest peers that responded, ascending by distance.
    pub closest: Vec<PeerId>,
    /// Number of RPCs completed (success or failure).
    pub queried: usize,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum PeerState {
    Candidate,
    InFlight,
    Responded,
    Failed,
}

/// Run an iterative lookup toward `target`.
///
/// `qfn` performs one RPC; `done` inspects the accumulated results and
/// signals early success (value found and verified, enough providers, …).
/// The query also terminates when every candidate among the k closest live
/// peers has been queried, or when `cancel` fires.
pub async fn run_query<R, F, Fut, D>(
    target: DhtKey,
    seeds: Vec<PeerId>,
    cfg: QueryConfig,
    cancel: CancellationToken,
    qfn: F,
    done: D,
) -> DhtResult<QueryOutcome<R>>
where
    F: Fn(PeerId) -> Fut,
    Fut: Future<Output = DhtResult<QueryStep<R>>>,
    D: Fn(&[R]) -> bool,
{
    if seeds.is_empty() {
        return Err(DhtError::LookupFailure);
    }

    let mut states: HashMap<PeerId, PeerState> = HashMap::new();
    // Arrival order; ties on distance resolve to the earlier arrival.
    let mut seen: Vec<PeerId> = Vec::new();
    for peer in seeds {
        if states.insert(peer, PeerState::Candidate).is_none() {
            seen.push(peer);
        }
    }

    let mut results: Vec<R> = Vec::new();
    let mut queried = 0usize;
    let mut inflight = FuturesUnordered::new();

    loop {
        if done(&results) {
            break;
        }

        while inflight.len() < cfg.alpha {
            let Some(next) = next_candidate(&target, &seen, &states, cfg.k) else {
                break;
            };
            states.insert(next, PeerState::InFlight);
            trace!(peer = %next.short_hex(), "query dispatch");
            let fut = qfn(next);
            inflight.push(async move { (next, fut.await) });
        }

        if inflight.is_empty() {
            // Every shortlist peer has been queried.
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(DhtError::Cancelled),
            Some((peer, outcome)) = inflight.next() => {
                queried += 1;
                match outcome {
                    Ok(step) => {
                        states.insert(peer, PeerState::Responded);
                        for closer in step.closer {
                            if let std::collections::hash_map::Entry::Vacant(entry) =
                                states.entry(closer)
                            {
                                entry.insert(PeerState::Candidate);
                                seen.push(closer);
                            }
                        }
                        results.extend(step.found);
                    }
                    Err(err) => {
                        debug!(peer = %peer.short_hex(), %err, "query rpc failed");
                        states.insert(peer, PeerState::Failed);
                    }
                }
            }
        }
    }

    let mut closest: Vec<PeerId> = seen
        .iter()
        .copied()
        .filter(|p| states.get(p) == Some(&PeerState::Responded))
        .collect();
    closest.sort_by_key(|p| target.distance(&DhtKey::for_peer(p)));
    closest.truncate(cfg.k);

    Ok(QueryOutcome {
        results,
        closest,
        queried,
    })
}

/// The closest unqueried peer among the k closest live candidates.
fn next_candidate(
    target: &DhtKey,
    seen: &[PeerId],
    states: &HashMap<PeerId, PeerState>,
    k: usize,
) -> Option<PeerId> {
    let mut live: Vec<PeerId> = seen
        .iter()
        .copied()
        .filter(|p| states.get(p) != Some(&PeerState::Failed))
        .collect();
    // Stable sort: equal distances keep arrival order.
    live.sort_by_key(|p| target.distance(&DhtKey::for_peer(p)));
    live.into_iter()
        .take(k)
        .find(|p| states.get(p) == Some(&PeerState::Candidate))
}
