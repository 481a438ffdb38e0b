//! Piggyback buffer for membership rumors.
//!
//! Every probe/ack datagram carries as many pending rumors as fit. Each rumor
//! is retransmitted `3 × ⌈log₂ N⌉` times, the budget the SWIM dissemination
//! analysis needs for whole-cluster convergence, then dropped.

use crate::cluster::member::MemberRecord;

// UDP does not fragment for us; a datagram that outgrows the path MTU is
// silently lost. The rumor payload therefore gets a hard byte budget, leaving
// headroom for the packet header and the sealed-envelope overhead.
const MAX_GOSSIP_BYTES: usize = 900;

// With at most 64 entries a plain sorted Vec beats fancier structures.
const MAX_ENTRIES: usize = 64;

const LAMBDA: u32 = 3;

#[derive(Default)]
pub(crate) struct GossipBuffer {
    // Sorted descending by `remaining`, so the freshest rumors go first and
    // the most-transmitted entry is always last.
    entries: Vec<GossipEntry>,
}

#[derive(PartialEq, Eq)]
struct GossipEntry {
    record: MemberRecord,
    remaining: u32,
}

impl PartialOrd for GossipEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GossipEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.remaining.cmp(&other.remaining)
    }
}

impl GossipBuffer {
    /// Queue a rumor for dissemination. A newer rumor about the same member
    /// replaces the old one and starts a fresh retransmission budget.
    pub(crate) fn enqueue(&mut self, record: MemberRecord, cluster_size: usize) {
        if record.encoded_size() > MAX_GOSSIP_BYTES {
            tracing::warn!(member = %record.member,
                "dropping rumor larger than the datagram budget");
            return;
        }

        let remaining = dissemination_count(cluster_size);

        if let Some(pos) = self
            .entries
            .iter()
            .position(|e| e.record.member == record.member)
        {
            self.entries.remove(pos);
        }

        if self.entries.len() >= MAX_ENTRIES {
            // Sorted descending: the least-fresh entry is at the tail.
            self.entries.pop();
        }

        let insert_pos = self
            .entries
            .binary_search_by(|e| e.remaining.cmp(&remaining).reverse())
            .unwrap_or_else(|pos| pos);
        self.entries
            .insert(insert_pos, GossipEntry { record, remaining });
    }

    /// Take one datagram's worth of rumors, freshest first, and burn one
    /// retransmission from each rumor included.
    pub(crate) fn collect(&mut self) -> Vec<MemberRecord> {
        let mut result = Vec::new();
        let mut total_bytes = 0usize;

        for entry in &self.entries {
            let size = entry.record.encoded_size();
            if total_bytes + size > MAX_GOSSIP_BYTES {
                break;
            }
            total_bytes += size;
            result.push(entry.record.clone());
        }

        let included = result.len();
        for entry in self.entries.iter_mut().take(included) {
            entry.remaining = entry.remaining.saturating_sub(1);
        }

        self.entries.retain(|e| e.remaining > 0);
        self.entries.sort_by(|a, b| b.cmp(a));

        result
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// `3 × ⌈log₂ N⌉` retransmissions (minimum 3) for O(log N) convergence.
#[inline]
pub(crate) fn dissemination_count(cluster_size: usize) -> u32 {
    if cluster_size <= 1 {
        return LAMBDA;
    }
    let n = cluster_size as f64;
    let count = LAMBDA * (n.log2().ceil() as u32);
    count.max(LAMBDA)
}
