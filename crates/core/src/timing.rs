use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock presentation instant split into whole seconds and
/// microseconds, with the microsecond field always below one million.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MediaTimestamp {
    pub sec: i64,
    pub usec: u32,
}

impl MediaTimestamp {
    pub const ZERO: MediaTimestamp = MediaTimestamp { sec: 0, usec: 0 };

    /// Current wall-clock time. Clocks set before the Unix epoch clamp to
    /// zero.
    pub fn now() -> Self {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(since) => Self {
                sec: since.as_secs() as i64,
                usec: since.subsec_micros(),
            },
            Err(_) => Self::ZERO,
        }
    }

    /// Advance by `delta` microseconds, carrying overflow into the seconds
    /// field.
    ///
    /// # Example
    /// ```rust
    /// use argus_core::timing::MediaTimestamp;
    ///
    /// let t = MediaTimestamp { sec: 10, usec: 999_990 };
    /// let t = t.advance_us(33_333);
    /// assert_eq!((t.sec, t.usec), (11, 33_323));
    /// ```
    pub fn advance_us(self, delta: u64) -> Self {
        let total = self.usec as u64 + delta;
        Self {
            sec: self.sec + (total / 1_000_000) as i64,
            usec: (total % 1_000_000) as u32,
        }
    }

    pub fn as_micros(self) -> i64 {
        self.sec * 1_000_000 + self.usec as i64
    }
}

/// Presentation-time bookkeeping for paced byte delivery.
///
/// The first delivery is stamped with the wall clock. Every later delivery
/// advances the stamp by the duration of the *previous* delivery, so each
/// stamp says when the bytes being handed out now are due to play.
#[derive(Clone, Copy, Debug, Default)]
pub struct TimingState {
    presentation: MediaTimestamp,
    last_duration_us: u64,
}

impl TimingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp a delivery spanning `duration_us` of media time and return its
    /// presentation time.
    pub fn on_delivery(&mut self, duration_us: u64) -> MediaTimestamp {
        if self.presentation == MediaTimestamp::ZERO {
            self.presentation = MediaTimestamp::now();
        } else {
            self.presentation = self.presentation.advance_us(self.last_duration_us);
        }
        self.last_duration_us = duration_us;
        self.presentation
    }

    /// Current stamp without advancing. `ZERO` until the first delivery.
    pub fn presentation(&self) -> MediaTimestamp {
        self.presentation
    }

    /// Forget the anchor so the next delivery re-stamps from the wall
    /// clock. Called when a stream stops.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
