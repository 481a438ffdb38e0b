use std::net::SocketAddr;

use bincode::{Decode, Encode};

use crate::cluster::WIRE_CONFIG;

/// Opaque peer identity. Operators usually name nodes `host:port`, but the
/// protocol only ever compares and hashes it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl From<&str> for MemberId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for MemberId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<SocketAddr> for MemberId {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::ops::Deref for MemberId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for MemberId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Per-member liveness verdict. The derived ordering is load-bearing:
/// at equal incarnation a report only wins if its status is strictly
/// greater under `Alive < Suspect < Faulty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Encode, Decode)]
pub enum MemberStatus {
    Alive,
    Suspect,
    Faulty,
}

impl MemberStatus {
    pub fn not_alive(self) -> bool {
        self != MemberStatus::Alive
    }
}

/// One membership fact as it travels on the wire: who, where, what we
/// believe about them, and at which incarnation. Suspect and Faulty records
/// must circulate too, or the rest of the cluster never learns of failures.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct MemberRecord {
    pub member: MemberId,
    pub addr: SocketAddr,
    pub status: MemberStatus,
    pub incarnation: u64,
}

impl MemberRecord {
    #[inline]
    pub(crate) fn encoded_size(&self) -> usize {
        bincode::encode_to_vec(self, WIRE_CONFIG)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}
