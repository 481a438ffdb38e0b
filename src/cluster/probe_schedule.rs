//! One round's worth of probe targets.
//!
//! Each round the schedule is refilled from the membership table and
//! shuffled uniformly, so every member is probed exactly once per round and
//! probe load spreads evenly. Members joining mid-round wait for the next
//! refill; that keeps per-period work bounded.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::cluster::member::MemberId;

/// A queued probe target, pinned to the incarnation it had at refill time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProbeTarget {
    pub member: MemberId,
    pub incarnation: u64,
}

pub(crate) struct ProbeSchedule {
    // General-purpose shuffling RNG. Deliberately not the crypto RNG that
    // mints IVs; the two sources must stay independent.
    rng: StdRng,
    queue: VecDeque<ProbeTarget>,
}

impl ProbeSchedule {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            queue: VecDeque::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Start a new round over `candidates`, in uniformly random order.
    pub fn refill(&mut self, candidates: Vec<(MemberId, u64)>) {
        let mut targets: Vec<ProbeTarget> = candidates
            .into_iter()
            .map(|(member, incarnation)| ProbeTarget {
                member,
                incarnation,
            })
            .collect();
        targets.shuffle(&mut self.rng);
        self.queue = targets.into();
    }

    pub fn pop(&mut self) -> Option<ProbeTarget> {
        self.queue.pop_front()
    }

    /// Up to `count` proxy candidates from the head of the remaining round,
    /// never including `exclude`. Near the end of a round fewer may be
    /// available; callers use whatever they get.
    pub fn proxies(&self, count: usize, exclude: &MemberId) -> Vec<MemberId> {
        self.queue
            .iter()
            .filter(|target| &target.member != exclude)
            .take(count)
            .map(|target| target.member.clone())
            .collect()
    }
}
