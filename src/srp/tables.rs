//! State tables of the source-routed protocol: the send buffer, the
//! initiated- and forwarded-request maps, and the unidirectional-link
//! blacklist.

use crate::packet::Packet;
use crate::timestamp::Timestamp;
use std::net::Ipv4Addr;

// Send buffer: packets held per destination while a route is discovered.
pub const SENDBUFFER_MAX_LENGTH: usize = 5;
pub const SENDBUFFER_MAX_BURST: usize = 5;
pub const SENDBUFFER_TIMEOUT_MS: i64 = 5000;
pub const SENDBUFFER_TIMER_INTERVAL_MS: i64 = 1000;

// Forwarded-request map expiry.
pub const RREQ_TIMEOUT_MS: i64 = 600_000;
pub const RREQ_EXPIRE_TIMER_INTERVAL_MS: i64 = 15_000;

// Request origination: first request goes out with a large TTL and a
// short delay; each reissue doubles the delay up to the cap.
pub const RREQ_TTL1: u8 = 255;
pub const RREQ_TTL2: u8 = 255;
pub const RREQ_DELAY1_MS: i64 = 500;
pub const RREQ_DELAY2_MS: i64 = 500;
pub const RREQ_BACKOFF_FACTOR: i64 = 2;
pub const RREQ_MAX_DELAY_MS: i64 = 5000;
pub const RREQ_ISSUE_TIMER_INTERVAL_MS: i64 = 300;

// Blacklist: entries downgrade from probable to questionable after a
// while; unidirectionality tests get a short deadline.
pub const BLACKLIST_UNITEST_TIMEOUT_MS: i64 = 1000;
pub const BLACKLIST_TIMER_INTERVAL_MS: i64 = 300;
pub const BLACKLIST_ENTRY_TIMEOUT_MS: i64 = 45_000;

/// A packet parked while its destination's route is discovered.
#[derive(Debug)]
pub struct BufferedPacket {
    pub packet: Packet,
    pub time_added: Timestamp,
}

impl BufferedPacket {
    pub fn new(packet: Packet, now: Timestamp) -> BufferedPacket {
        BufferedPacket { packet, time_added: now }
    }
}

/// Origination state for one destination we are querying.
#[derive(Debug, Clone)]
pub struct InitiatedRequest {
    pub target: Ipv4Addr,
    pub ttl: u8,
    pub time_last_issued: Timestamp,
    /// Requests issued since the last reply.
    pub times_issued: u32,
    /// Delay before the next reissue, in ms.
    pub backoff_interval_ms: i64,
}

impl InitiatedRequest {
    pub fn new(target: Ipv4Addr, now: Timestamp) -> InitiatedRequest {
        InitiatedRequest {
            target,
            ttl: RREQ_TTL1,
            time_last_issued: now,
            times_issued: 1,
            backoff_interval_ms: RREQ_DELAY1_MS,
        }
    }

    /// Advances the backoff for a reissue.
    pub fn reissue(&mut self, now: Timestamp) {
        if self.times_issued == 1 {
            self.backoff_interval_ms = RREQ_DELAY2_MS;
        } else {
            self.backoff_interval_ms =
                (self.backoff_interval_ms * RREQ_BACKOFF_FACTOR).min(RREQ_MAX_DELAY_MS);
        }
        self.times_issued += 1;
        self.time_last_issued = now;
        self.ttl = RREQ_TTL2;
    }
}

/// Key of the forwarded-request map: one flooded request instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ForwardedReqKey {
    pub src: Ipv4Addr,
    pub target: Ipv4Addr,
    pub id: u16,
}

/// What we know about a request we have forwarded (or are holding for a
/// unidirectionality test).
#[derive(Debug)]
pub struct ForwardedReqVal {
    pub time_forwarded: Timestamp,
    /// Best composite metric forwarded so far.
    pub best_metric: u16,
    /// Set while a one-hop test is outstanding: when it was issued and
    /// the held request packet.
    pub time_unidtest_issued: Timestamp,
    pub pending: Option<Packet>,
}

/// Blacklist status of a neighbor suspected of a one-way link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlacklistStatus {
    Probable,
    Questionable,
}

#[derive(Debug, Clone, Copy)]
pub struct BlacklistEntry {
    pub time_updated: Timestamp,
    pub status: BlacklistStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_to_cap() {
        let t0 = Timestamp::from_sec(0);
        let mut req = InitiatedRequest::new(Ipv4Addr::new(10, 0, 0, 9), t0);
        assert_eq!(req.backoff_interval_ms, 500);
        let mut intervals = Vec::new();
        for _ in 0..6 {
            req.reissue(t0);
            intervals.push(req.backoff_interval_ms);
        }
        assert_eq!(intervals, vec![500, 1000, 2000, 4000, 5000, 5000]);
        assert_eq!(req.times_issued, 7);
    }
}
