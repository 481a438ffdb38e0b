//! The authoritative local view of the cluster.
//!
//! Every fact about a peer is a `(status, incarnation)` pair, and conflicts
//! resolve by two rules only: a higher incarnation always wins, and at equal
//! incarnation a strictly harsher status wins. Reports about the local member
//! never stick — the table answers them by bumping its own incarnation and
//! re-announcing itself alive.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::SocketAddr;

use crate::cluster::member::{MemberId, MemberRecord, MemberStatus};

/// How many probe rounds a suspect gets to refute before being declared
/// faulty, per unit of `⌈log₂(k+1)⌉`.
const SUSPICION_MULT: u32 = 3;

/// Observable membership transition. At-least-once delivery to the
/// dissemination layer; consumers must be idempotent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    /// A previously unknown peer entered the table.
    Joined(MemberRecord),
    /// A known peer changed status.
    StatusChanged {
        record: MemberRecord,
        previous: MemberStatus,
    },
    /// A faulty peer was removed after its grace period.
    Evicted(MemberId),
    /// The local member rebutted a suspect/faulty rumor about itself
    /// by moving to this incarnation.
    Refuted { incarnation: u64 },
}

#[derive(Debug, Clone)]
struct MemberEntry {
    addr: SocketAddr,
    status: MemberStatus,
    incarnation: u64,
}

/// Membership table for one node. The local member lives outside the peer
/// map and is always alive at `local_incarnation`.
pub(crate) struct MembershipTable {
    local_id: MemberId,
    local_addr: SocketAddr,
    local_incarnation: u64,
    peers: HashMap<MemberId, MemberEntry>,
}

impl MembershipTable {
    pub fn new(local_id: MemberId, local_addr: SocketAddr) -> Self {
        Self {
            local_id,
            local_addr,
            local_incarnation: 0,
            peers: HashMap::new(),
        }
    }

    pub fn local_id(&self) -> &MemberId {
        &self.local_id
    }

    pub fn local_incarnation(&self) -> u64 {
        self.local_incarnation
    }

    /// The local member's current self-description: always alive.
    pub fn local_record(&self) -> MemberRecord {
        MemberRecord {
            member: self.local_id.clone(),
            addr: self.local_addr,
            status: MemberStatus::Alive,
            incarnation: self.local_incarnation,
        }
    }

    /// Snapshot of all non-local, not-yet-evicted entries.
    pub fn members(&self) -> Vec<MemberRecord> {
        self.peers
            .iter()
            .map(|(member, entry)| MemberRecord {
                member: member.clone(),
                addr: entry.addr,
                status: entry.status,
                incarnation: entry.incarnation,
            })
            .collect()
    }

    /// Peers worth probing: everyone not yet declared faulty.
    pub fn probe_candidates(&self) -> Vec<(MemberId, u64)> {
        self.peers
            .iter()
            .filter(|(_, entry)| entry.status != MemberStatus::Faulty)
            .map(|(member, entry)| (member.clone(), entry.incarnation))
            .collect()
    }

    pub fn addr_of(&self, member: &MemberId) -> Option<SocketAddr> {
        self.peers.get(member).map(|entry| entry.addr)
    }

    pub fn status_of(&self, member: &MemberId) -> Option<MemberStatus> {
        self.peers.get(member).map(|entry| entry.status)
    }

    pub fn incarnation_of(&self, member: &MemberId) -> Option<u64> {
        self.peers.get(member).map(|entry| entry.incarnation)
    }

    /// Number of members this node currently knows of, itself included.
    pub fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }

    /// Apply one membership report, local refutation included.
    /// Returns the events the mutation produced (zero or one).
    pub fn apply(&mut self, record: MemberRecord) -> Vec<MembershipEvent> {
        if record.member == self.local_id {
            return self.refute(record);
        }

        match self.peers.entry(record.member.clone()) {
            Entry::Vacant(vacant) => {
                vacant.insert(MemberEntry {
                    addr: record.addr,
                    status: record.status,
                    incarnation: record.incarnation,
                });
                vec![MembershipEvent::Joined(record)]
            }
            Entry::Occupied(occupied) => {
                let entry = occupied.into_mut();
                let supersedes = record.incarnation > entry.incarnation
                    || (record.incarnation == entry.incarnation
                        && record.status > entry.status);
                if !supersedes {
                    return vec![];
                }

                let previous = entry.status;
                entry.status = record.status;
                entry.incarnation = record.incarnation;
                entry.addr = record.addr;

                if record.status == previous {
                    // Pure incarnation refresh, nothing observable changed.
                    return vec![];
                }
                tracing::info!(member = %record.member, ?previous, status = ?record.status,
                    incarnation = record.incarnation, "membership transition");
                vec![MembershipEvent::StatusChanged { record, previous }]
            }
        }
    }

    /// Locally observed verdict about `member` at its current incarnation.
    /// Used by the detector when a probe round ends in silence, and by the
    /// suspicion sweep. A no-op unless the status ordering permits it.
    pub fn escalate(&mut self, member: &MemberId, status: MemberStatus) -> Vec<MembershipEvent> {
        let Some(entry) = self.peers.get(member) else {
            return vec![];
        };
        self.apply(MemberRecord {
            member: member.clone(),
            addr: entry.addr,
            status,
            incarnation: entry.incarnation,
        })
    }

    /// Remove a faulty member for good. Evicted members are forgotten
    /// entirely; if they come back they re-join as new.
    pub fn evict(&mut self, member: &MemberId) -> Vec<MembershipEvent> {
        match self.peers.get(member) {
            Some(entry) if entry.status == MemberStatus::Faulty => {
                self.peers.remove(member);
                tracing::info!(%member, "evicted faulty member");
                vec![MembershipEvent::Evicted(member.clone())]
            }
            _ => vec![],
        }
    }

    fn refute(&mut self, record: MemberRecord) -> Vec<MembershipEvent> {
        if !record.status.not_alive() {
            // Our own alive announcement echoed back.
            return vec![];
        }
        if record.incarnation < self.local_incarnation {
            // Stale rumor, already superseded by a newer self-announcement.
            return vec![];
        }
        self.local_incarnation = record.incarnation.max(self.local_incarnation) + 1;
        tracing::info!(
            incarnation = self.local_incarnation,
            rumored = ?record.status,
            "refuting rumor about local member"
        );
        vec![MembershipEvent::Refuted {
            incarnation: self.local_incarnation,
        }]
    }
}

/// Suspicion window in ticks: `protocol_period × ⌈log₂(k+1)⌉ × 3`, so larger
/// clusters give suspects proportionally longer to refute.
pub(crate) fn suspicion_ticks(protocol_period_ticks: u32, cluster_size: usize) -> u32 {
    let k = cluster_size.max(1) as f64;
    let rounds = ((k + 1.0).log2().ceil() as u32).max(1);
    protocol_period_ticks * rounds * SUSPICION_MULT
}
