//! Server statistics
//!
//! Counters updated by the dispatch loop and its per-datagram tasks.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct ServerCounters {
    pub(crate) datagrams_received: AtomicU64,
    pub(crate) malformed_packets: AtomicU64,
    pub(crate) unsupported_codes: AtomicU64,
    pub(crate) retransmissions: AtomicU64,
    pub(crate) handler_failures: AtomicU64,
    pub(crate) handler_timeouts: AtomicU64,
    pub(crate) responses_sent: AtomicU64,
    pub(crate) send_failures: AtomicU64,
    pub(crate) admission_rejected: AtomicU64,
}

impl ServerCounters {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, in_flight: usize) -> ServerStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        ServerStats {
            datagrams_received: load(&self.datagrams_received),
            malformed_packets: load(&self.malformed_packets),
            unsupported_codes: load(&self.unsupported_codes),
            retransmissions: load(&self.retransmissions),
            handler_failures: load(&self.handler_failures),
            handler_timeouts: load(&self.handler_timeouts),
            responses_sent: load(&self.responses_sent),
            send_failures: load(&self.send_failures),
            admission_rejected: load(&self.admission_rejected),
            in_flight,
        }
    }
}

/// Point-in-time copy of the server counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStats {
    /// Datagrams read from the socket
    pub datagrams_received: u64,
    /// Datagrams dropped because they could not be decoded
    pub malformed_packets: u64,
    /// Packets dropped because they were not Accounting-Requests
    pub unsupported_codes: u64,
    /// Requests dropped as retransmissions
    pub retransmissions: u64,
    /// Requests the handler refused
    pub handler_failures: u64,
    /// Requests whose handler did not finish in time
    pub handler_timeouts: u64,
    /// Accounting-Responses sent
    pub responses_sent: u64,
    /// Accounting-Responses that could not be sent
    pub send_failures: u64,
    /// Datagrams dropped because too many requests were in flight
    pub admission_rejected: u64,
    /// Requests currently being processed
    pub in_flight: usize,
}
