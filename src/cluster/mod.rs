pub(crate) mod actor;
pub(crate) mod detector;
mod gossip_buffer;
pub(crate) mod member;
pub(crate) mod membership;
pub(crate) mod messages;
mod probe_schedule;
pub(crate) mod transport;


pub use member::{MemberId, MemberRecord, MemberStatus};
pub use membership::MembershipEvent;
pub use transport::TransportStats;

/// Wire encoding shared by every node; must never change behind the
/// cluster's back.
pub(crate) const WIRE_CONFIG: bincode::config::Configuration = bincode::config::standard();
