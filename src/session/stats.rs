//! Reception statistics for one RTP source (RFC 3550 Appendix A).

/// Consecutive-sequence gap still treated as in-order (A.1).
pub const MAX_DROPOUT: u16 = 3000;

/// Backward distance still treated as a late or duplicate packet (A.1).
pub const MAX_MISORDER: u16 = 100;

const RTP_SEQ_MOD: u32 = 1 << 16;

/// How a sequence number related to the packets seen before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceUpdate {
    /// First packet of the session.
    First,
    /// New highest sequence number, possibly after a small gap.
    InOrder,
    /// New highest sequence number after crossing 65535 → 0.
    Wrapped,
    /// Duplicate or out-of-order packet; the high-water mark is unchanged.
    Late,
    /// Far outside the expected window. The packet should be dropped; if
    /// the next one follows it, the tracker restarts.
    Jump,
    /// Second packet in a row after a [`Jump`](Self::Jump): the source
    /// restarted its sequence space and statistics follow it.
    Restarted,
}

impl SequenceUpdate {
    /// Whether the packet should be delivered.
    pub fn is_valid(self) -> bool {
        self != Self::Jump
    }
}

/// Extended sequence number and loss accounting (A.1, A.3).
///
/// The wire carries 16 bits; the tracker counts wraps so the extended
/// highest sequence number (`cycles + max_seq`) never goes backwards, for
/// late or duplicate packets or across a restart. A wrap is only counted
/// when a packet lands just past 65535 relative to the current maximum, so
/// a late packet from before a wrap cannot count it twice.
///
/// Counters are never reset once the first packet is seen. A forward
/// restart counts the skipped range as lost. A backward restart moves the
/// extended maximum on by one cycle and shifts the base so the phantom
/// gap is not counted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SequenceTracker {
    initialized: bool,
    max_seq: u16,
    /// Wrap count shifted left by 16.
    cycles: u32,
    base_seq: u32,
    bad_seq: Option<u16>,
    received: u64,
    expected_prior: u64,
    received_prior: u64,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `seq` the new maximum, counting a wrap if it lies past 65535.
    fn advance(&mut self, seq: u16) -> bool {
        let wrapped = seq < self.max_seq;
        if wrapped {
            self.cycles = self.cycles.wrapping_add(RTP_SEQ_MOD);
        }
        self.max_seq = seq;
        wrapped
    }

    /// Follow the source into a new sequence space. `seq` directly follows
    /// the held-back jump packet, so both count as received.
    fn restart(&mut self, seq: u16) {
        let udelta = u32::from(seq.wrapping_sub(self.max_seq));
        if udelta >= RTP_SEQ_MOD / 2 {
            // Backward: only the two packets of the new run are expected.
            self.base_seq = self.base_seq.wrapping_add(udelta - 2);
        }
        self.advance(seq);
        self.bad_seq = None;
        self.received += 2;
    }

    /// Account for a received sequence number.
    pub fn update(&mut self, seq: u16) -> SequenceUpdate {
        if !self.initialized {
            self.initialized = true;
            self.max_seq = seq;
            self.base_seq = u32::from(seq);
            self.received = 1;
            return SequenceUpdate::First;
        }

        let udelta = seq.wrapping_sub(self.max_seq);
        if udelta < MAX_DROPOUT {
            self.received += 1;
            if self.advance(seq) {
                SequenceUpdate::Wrapped
            } else {
                SequenceUpdate::InOrder
            }
        } else if u32::from(udelta) <= RTP_SEQ_MOD - u32::from(MAX_MISORDER) {
            if self.bad_seq == Some(seq) {
                self.restart(seq);
                SequenceUpdate::Restarted
            } else {
                self.bad_seq = Some(seq.wrapping_add(1));
                SequenceUpdate::Jump
            }
        } else {
            self.received += 1;
            SequenceUpdate::Late
        }
    }

    /// Whether any packet has been seen.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Highest sequence number seen, extended by the wrap count.
    pub fn extended_max(&self) -> u32 {
        self.cycles.wrapping_add(u32::from(self.max_seq))
    }

    /// Number of sequence wraps observed.
    pub fn wraps(&self) -> u32 {
        self.cycles >> 16
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// Packets expected since the first one.
    pub fn expected(&self) -> u64 {
        if !self.initialized {
            return 0;
        }
        (u64::from(self.cycles) + u64::from(self.max_seq)) - u64::from(self.base_seq) + 1
    }

    /// Total packets lost since the session started. Negative when
    /// duplicates outnumber losses.
    pub fn cumulative_lost(&self) -> i64 {
        self.expected() as i64 - self.received as i64
    }

    /// Fraction lost since the previous call, as an 8-bit fixed-point
    /// value (A.3). Starts a new interval.
    pub fn take_interval_fraction(&mut self) -> u8 {
        let expected = self.expected();
        let expected_interval = expected.saturating_sub(self.expected_prior);
        let received_interval = self.received.saturating_sub(self.received_prior);
        self.expected_prior = expected;
        self.received_prior = self.received;

        let lost_interval = expected_interval as i64 - received_interval as i64;
        if expected_interval == 0 || lost_interval <= 0 {
            0
        } else {
            ((lost_interval << 8) / expected_interval as i64).min(255) as u8
        }
    }
}

/// Interarrival jitter estimator (A.8).
///
/// `J += (|D| - J) / 16`, where `D` is the change in transit time
/// (arrival minus RTP timestamp) between consecutive packets. Arrival
/// times must be in RTP timestamp units.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JitterEstimator {
    last_transit: Option<i32>,
    jitter: f64,
}

impl JitterEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, timestamp: u32, arrival: u32) {
        let transit = arrival.wrapping_sub(timestamp) as i32;
        if let Some(last) = self.last_transit {
            let d = f64::from(transit.wrapping_sub(last).unsigned_abs());
            self.jitter += (d - self.jitter) / 16.0;
        }
        self.last_transit = Some(transit);
    }

    /// Current estimate in timestamp units, as carried in a report block.
    pub fn jitter(&self) -> u32 {
        self.jitter as u32
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
