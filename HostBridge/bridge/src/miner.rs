//! Proof-of-work miner as a background task.
//!
//! A handler sends a JSON `MineRequest`; the task hashes nonces in batches
//! of `MinerConfig::batch_size` and keeps going until the cutoff passes or
//! the nonce range runs out (`Expired`). Every candidate that beats the best
//! digest so far and meets the difficulty is sent as a `Solution`, so later
//! solutions are strictly better. `Progress` follows each batch. The search
//! stops early once the handler has gone away.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use keel_hostapi::{ErrorValue, HostError};
use keel_primitives::pow::{self, Solution};
use keel_primitives::{ErrorCode, Hash, Pubkey};

use crate::config::MinerConfig;
use crate::worker::{BackgroundTask, HandlerId, WorkerDispatcher, WorkerScope};

/// Name the miner is registered under.
pub const MINER_TASK: &str = "miner";

fn unbounded() -> u64 {
    u64::MAX
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MineRequest {
    pub challenge: Hash,
    pub difficulty: Hash,
    pub signer: Pubkey,
    pub nonce_start: u64,
    /// Exclusive end of the nonce range, see `pow::nonce_range`.
    #[serde(default = "unbounded")]
    pub nonce_end: u64,
    pub cutoff_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MinerEvent {
    Solution(Solution),
    /// `nonce` is the next nonce to be tried.
    Progress { nonce: u64, remaining_ms: u64 },
    Expired { nonce: u64 },
}

pub struct MinerTask {
    config: MinerConfig,
}

impl MinerTask {
    pub fn new(config: MinerConfig) -> Self {
        Self { config }
    }

    fn mine(&self, scope: &WorkerScope, id: HandlerId, request: &MineRequest) {
        tracing::info!(?id, nonce = request.nonce_start, "challenge received");
        let started = Instant::now();
        let cutoff = Duration::from_millis(request.cutoff_ms);
        let mut nonce = request.nonce_start;
        let mut best = None;

        loop {
            let left = request.nonce_end.saturating_sub(nonce);
            if left == 0 {
                scope.respond_json(id, &MinerEvent::Expired { nonce });
                return;
            }
            let count = self.config.batch_size.clamp(1, left);
            let connected = pow::search(
                &request.challenge,
                &request.difficulty,
                &request.signer,
                nonce,
                count,
                &mut best,
                |solution| {
                    tracing::info!(?id, nonce = solution.nonce, "improved solution found");
                    scope.respond_json(id, &MinerEvent::Solution(solution))
                },
            );
            if !connected {
                tracing::debug!(?id, "handler disconnected, stopping search");
                return;
            }
            nonce += count;

            let elapsed = started.elapsed();
            if elapsed >= cutoff {
                scope.respond_json(id, &MinerEvent::Expired { nonce });
                return;
            }
            let remaining_ms = u64::try_from((cutoff - elapsed).as_millis()).unwrap_or(u64::MAX);
            if !scope.respond_json(id, &MinerEvent::Progress { nonce, remaining_ms }) {
                tracing::debug!(?id, "handler disconnected, stopping search");
                return;
            }
        }
    }
}

impl BackgroundTask for MinerTask {
    fn received(&mut self, scope: &WorkerScope, id: HandlerId, payload: Vec<u8>) {
        match serde_json::from_slice::<MineRequest>(&payload) {
            Ok(request) => self.mine(scope, id, &request),
            Err(err) => {
                tracing::error!(?id, "bad mine request: {err}");
                scope.respond_error(
                    id,
                    ErrorValue::new(ErrorCode::DeserializationFailure, err.to_string()),
                );
            }
        }
    }
}

/// Register the miner with `dispatcher` under `MINER_TASK`.
pub fn register_miner(dispatcher: &WorkerDispatcher, config: MinerConfig) {
    dispatcher.register_task(MINER_TASK, move || {
        Ok(Box::new(MinerTask::new(config.clone())) as Box<dyn BackgroundTask>)
    });
}

/// Convenience for callers holding a `TaskHandle` to the miner.
pub fn decode_event(payload: &[u8]) -> Result<MinerEvent, HostError> {
    serde_json::from_slice(payload).map_err(|e| HostError::DeserializationFailure(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::Envelope;

    const WAIT: Duration = Duration::from_secs(10);

    fn dispatcher(batch_size: u64) -> WorkerDispatcher {
        let d = WorkerDispatcher::new();
        register_miner(&d, MinerConfig { batch_size });
        d
    }

    fn request(difficulty: [u8; 32], nonce_start: u64, nonce_end: u64, cutoff_ms: u64) -> MineRequest {
        MineRequest {
            challenge: Hash([7; 32]),
            difficulty: Hash(difficulty),
            signer: Pubkey([9; 32]),
            nonce_start,
            nonce_end,
            cutoff_ms,
        }
    }

    #[test]
    fn test_easiest_difficulty_solves_first_nonce() {
        let handle = dispatcher(16).spawn(MINER_TASK).unwrap();
        let req = request([0xff; 32], 42, u64::MAX, 60_000);
        handle.send_json(&req).unwrap();
        match handle.recv_json::<MinerEvent>(WAIT).unwrap() {
            Some(MinerEvent::Solution(sol)) => {
                assert_eq!(sol.nonce, 42);
                assert!(pow::verify(&req.challenge, &req.difficulty, &req.signer, &sol));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    fn collect_until_expired(handle: &crate::worker::TaskHandle) -> Vec<MinerEvent> {
        let mut events = Vec::new();
        while let Some(event) = handle.recv_json::<MinerEvent>(WAIT).unwrap() {
            let done = matches!(event, MinerEvent::Expired { .. });
            events.push(event);
            if done {
                break;
            }
        }
        events
    }

    #[test]
    fn test_keeps_mining_after_first_solution() {
        let handle = dispatcher(50).spawn(MINER_TASK).unwrap();
        let req = request([0xff; 32], 0, 200, 60_000);
        handle.send_json(&req).unwrap();
        let events = collect_until_expired(&handle);

        let solutions: Vec<Solution> = events
            .iter()
            .filter_map(|e| match e {
                MinerEvent::Solution(sol) => Some(*sol),
                _ => None,
            })
            .collect();
        let mut expected = Vec::new();
        let mut lowest: Option<Hash> = None;
        for nonce in 0..200 {
            let hash = pow::hash_candidate(&req.challenge, &req.signer, nonce);
            if lowest.map_or(true, |l| hash < l) {
                lowest = Some(hash);
                expected.push(Solution { hash, nonce });
            }
        }
        assert_eq!(solutions, expected);
        assert!(solutions.windows(2).all(|w| w[1].hash < w[0].hash));
        assert!(solutions
            .iter()
            .all(|sol| pow::verify(&req.challenge, &req.difficulty, &req.signer, sol)));

        let progress: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                MinerEvent::Progress { nonce, .. } => Some(*nonce),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![50, 100, 150, 200]);
        assert_eq!(events.last(), Some(&MinerEvent::Expired { nonce: 200 }));
    }

    #[test]
    fn test_exhausted_range_reports_progress_then_expired() {
        let handle = dispatcher(10).spawn(MINER_TASK).unwrap();
        handle.send_json(&request([0; 32], 100, 125, 60_000)).unwrap();
        let events = collect_until_expired(&handle);
        let progress: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                MinerEvent::Progress { nonce, .. } => Some(*nonce),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![110, 120, 125]);
        assert_eq!(events.last(), Some(&MinerEvent::Expired { nonce: 125 }));
    }

    #[test]
    fn test_zero_cutoff_expires_after_one_batch() {
        let handle = dispatcher(5).spawn(MINER_TASK).unwrap();
        handle.send_json(&request([0; 32], 0, u64::MAX, 0)).unwrap();
        assert_eq!(
            handle.recv_json::<MinerEvent>(WAIT).unwrap(),
            Some(MinerEvent::Expired { nonce: 5 })
        );
    }

    #[test]
    fn test_bad_request_is_error_envelope() {
        let handle = dispatcher(5).spawn(MINER_TASK).unwrap();
        handle.send(b"not json".to_vec()).unwrap();
        match handle.recv_timeout(WAIT).unwrap() {
            Some(Envelope::Error(err)) => assert_eq!(err.code, ErrorCode::DeserializationFailure),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_nonce_end_defaults_to_unbounded() {
        let json = br#"{"challenge":[0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0],
            "difficulty":[0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0],
            "signer":[0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0],
            "nonce_start":3,"cutoff_ms":10}"#;
        let req: MineRequest = serde_json::from_slice(json).unwrap();
        assert_eq!(req.nonce_end, u64::MAX);
    }

    #[test]
    fn test_decode_event() {
        let bytes = serde_json::to_vec(&MinerEvent::Expired { nonce: 9 }).unwrap();
        assert_eq!(decode_event(&bytes).unwrap(), MinerEvent::Expired { nonce: 9 });
        assert!(decode_event(b"{}").is_err());
    }
}
