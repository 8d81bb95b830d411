//! Serializes writes to the light group.
//!
//! At most one push is outstanding. The guard is plain state; the host keeps
//! it behind the engine's mutex so that the check of `in_flight` and the set
//! happen atomically, while the network round-trip runs outside the lock.

use serde::Serialize;

use crate::types::SolarPoint;

/// Permission to issue exactly one combined `ct`/`bri` write. Must be handed
/// back through [`UpdateGuard::complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushTicket {
    pub target: SolarPoint,
    seq: u64,
}

impl PushTicket {
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushMode {
    /// Scheduler tick: skipped when the target equals what the group holds.
    IfChanged,
    /// Manual override or out-of-cycle refresh: always written.
    Always,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateGuard {
    #[serde(rename = "pushInFlight")]
    in_flight: bool,
    #[serde(rename = "lastPushedCct")]
    last_pushed_cct: Option<u8>,
    #[serde(rename = "lastPushedDim")]
    last_pushed_dim: Option<u8>,
    #[serde(rename = "pending")]
    pending: Option<SolarPoint>,
    #[serde(skip)]
    next_seq: u64,
}

impl UpdateGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn last_pushed(&self) -> (Option<u8>, Option<u8>) {
        (self.last_pushed_cct, self.last_pushed_dim)
    }

    pub fn pending(&self) -> Option<SolarPoint> {
        self.pending
    }

    fn matches_last_pushed(&self, target: SolarPoint) -> bool {
        self.last_pushed_cct == Some(target.cct) && self.last_pushed_dim == Some(target.dim)
    }

    /// Asks to write `target`. While another push is outstanding nothing is
    /// issued; forced requests park in a single slot (newest wins) that
    /// [`complete`](Self::complete) drains, tick requests are dropped and
    /// reconsidered on the next tick.
    pub fn request(&mut self, target: SolarPoint, mode: PushMode) -> Option<PushTicket> {
        if self.in_flight {
            if mode == PushMode::Always {
                self.pending = Some(target);
            }
            return None;
        }

        if mode == PushMode::IfChanged && self.matches_last_pushed(target) {
            return None;
        }

        Some(self.issue(target))
    }

    fn issue(&mut self, target: SolarPoint) -> PushTicket {
        self.in_flight = true;
        self.next_seq = self.next_seq.wrapping_add(1);
        PushTicket {
            target,
            seq: self.next_seq,
        }
    }

    /// Records the outcome of a push. Success or failure, the target becomes
    /// the last pushed value and the slot is released, so a failed write is
    /// retried only if a later request asks for it again.
    pub fn complete(&mut self, ticket: PushTicket) -> Option<PushTicket> {
        if !self.in_flight || ticket.seq != self.next_seq {
            return None;
        }

        self.in_flight = false;
        self.last_pushed_cct = Some(ticket.target.cct);
        self.last_pushed_dim = Some(ticket.target.dim);

        let pending = self.pending.take()?;
        Some(self.issue(pending))
    }

    /// Best-effort refresh from what the gateway reports for the group.
    /// Ignored while a push is outstanding, since the reading may predate it.
    pub fn reconcile(&mut self, remote_cct: Option<u8>, remote_dim: Option<u8>) {
        if self.in_flight {
            return;
        }
        if remote_cct.is_some() {
            self.last_pushed_cct = remote_cct;
        }
        if remote_dim.is_some() {
            self.last_pushed_dim = remote_dim;
        }
    }
}
