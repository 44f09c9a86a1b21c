use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionLifecycleState {
    Idle,
    Connecting,
    /// TCP established, data transfer not yet activated
    Inactive,
    /// STARTDT confirmed, I-frames may flow
    Active,
    Closing,
    Closed,
    Failed(String),
}

/// Link-layer events surfaced to subscribers. `Failed` (and any variant a
/// later revision adds) is outside the set the command flow reacts to.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Opened,
    Closed,
    StartDtConfirmed,
    StopDtConfirmed,
    Failed(String),
}

/// SessionConfig holds timing and capacity parameters for an IEC104 session.
///
/// - t2: Acknowledge aggregation timeout for S-frames
/// - t3: Idle test frame interval
/// - k: Maximum number of unacknowledged I-frames (window size)
/// - w: Acknowledge aggregation threshold (number of I-frames)
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Connection establishment timeout (ms)
    pub connection_timeout_ms: u64,
    pub t2_ms: u64,
    pub t3_ms: u64,
    pub k_window: u16,
    pub w_threshold: u16,
    pub send_queue_capacity: usize,
    pub tcp_nodelay: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connection_timeout_ms: 5000,
            t2_ms: 10_000,
            t3_ms: 20_000,
            k_window: 12,
            w_threshold: 8,
            send_queue_capacity: 64,
            tcp_nodelay: true,
        }
    }
}

/// SessionState encapsulates sequence counters and timers for an active
/// link-layer session.
#[derive(Debug)]
pub struct SessionState {
    pub send_sn: u16,
    pub ack_sendsn: u16,
    pub rcv_sn: u16,
    pub ack_rcvsn: u16,

    pub idle_since: Instant,
    pub unacked_rcv_since: Option<Instant>,
}

impl SessionState {
    pub fn new(now: Instant) -> Self {
        Self {
            send_sn: 0,
            ack_sendsn: 0,
            rcv_sn: 0,
            ack_rcvsn: 0,
            idle_since: now,
            unacked_rcv_since: None,
        }
    }

    /// Number of outstanding I-frames in flight (unacknowledged)
    pub fn inflight_count(&self) -> u16 {
        Self::seq_distance(self.ack_sendsn, self.send_sn)
    }

    /// Whether window has available slots to send new I-frames
    pub fn window_has_capacity(&self, k_window: u16) -> bool {
        self.inflight_count() < k_window
    }

    /// Update send acknowledge number given remote ack `rcv_sn` from incoming
    /// I/S frames. Returns false when the ack falls outside the send window.
    pub fn update_send_ack(&mut self, ack_rcv_no: u16) -> bool {
        if !Self::seq_in_range_inclusive(self.ack_sendsn, self.send_sn, ack_rcv_no) {
            return false;
        }
        self.ack_sendsn = ack_rcv_no;
        true
    }

    /// Advance local receive sequence on an incoming I-frame with `send_sn`.
    /// Returns false when the sequence is not the expected one.
    pub fn advance_receive_seq(&mut self, incoming_send_sn: u16) -> bool {
        if incoming_send_sn != self.rcv_sn {
            return false;
        }
        self.rcv_sn = Self::seq_add(self.rcv_sn, 1);
        true
    }

    /// Whether an aggregated S-ACK is due, by w threshold or t2 timer.
    pub fn should_send_s_ack(&self, now: Instant, t2_ms: u64, w_threshold: u16) -> bool {
        if self.ack_rcvsn == self.rcv_sn {
            return false;
        }
        let unacked = Self::seq_distance(self.ack_rcvsn, self.rcv_sn);
        if unacked >= w_threshold {
            return true;
        }
        match self.unacked_rcv_since {
            Some(since) => now.duration_since(since).as_millis() as u64 >= t2_ms,
            None => false,
        }
    }

    /// Mark that we received data and have unacked rx
    pub fn mark_unacked_receive(&mut self, now: Instant) {
        if self.ack_rcvsn == self.rcv_sn {
            self.unacked_rcv_since = Some(now);
        }
    }

    /// Advance ack_rcvsn to rcv_sn when an S-ACK went out
    pub fn mark_s_ack_sent(&mut self) {
        self.ack_rcvsn = self.rcv_sn;
        self.unacked_rcv_since = None;
    }

    /// Add with sequence wrap modulo 32768
    pub fn seq_add(seq: u16, delta: u16) -> u16 {
        ((seq as u32 + delta as u32) % 32768) as u16
    }

    /// Distance from `from` to `to` in modulo space [0, 32767]
    pub fn seq_distance(from: u16, to: u16) -> u16 {
        ((to as i32 - from as i32 + 32768) % 32768) as u16
    }

    /// Is x within [start, end] in modulo space, inclusive on end
    pub fn seq_in_range_inclusive(start: u16, end: u16, x: u16) -> bool {
        Self::seq_distance(start, x) <= Self::seq_distance(start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn seq_arithmetic_wraps_modulo_32768() {
        assert_eq!(SessionState::seq_add(32767, 1), 0);
        assert_eq!(SessionState::seq_distance(32767, 1), 2);
        assert!(SessionState::seq_in_range_inclusive(32766, 1, 0));
        assert!(!SessionState::seq_in_range_inclusive(0, 2, 3));
    }

    #[test]
    fn ack_outside_window_rejected() {
        let mut state = SessionState::new(Instant::now());
        state.send_sn = 2;
        assert!(state.update_send_ack(1));
        assert_eq!(state.ack_sendsn, 1);
        assert!(!state.update_send_ack(5));
    }

    #[test]
    fn receive_seq_must_be_consecutive() {
        let mut state = SessionState::new(Instant::now());
        assert!(state.advance_receive_seq(0));
        assert!(!state.advance_receive_seq(0));
        assert!(state.advance_receive_seq(1));
        assert_eq!(state.rcv_sn, 2);
    }

    #[test]
    fn s_ack_due_on_threshold_or_timer() {
        let now = Instant::now();
        let mut state = SessionState::new(now);
        assert!(!state.should_send_s_ack(now, 100, 2));

        state.mark_unacked_receive(now);
        state.rcv_sn = 1;
        assert!(!state.should_send_s_ack(now, 100, 2));
        assert!(state.should_send_s_ack(now + Duration::from_millis(150), 100, 2));

        state.rcv_sn = 2;
        assert!(state.should_send_s_ack(now, 100, 2));

        state.mark_s_ack_sent();
        assert!(!state.should_send_s_ack(now + Duration::from_millis(150), 100, 2));
    }
}
