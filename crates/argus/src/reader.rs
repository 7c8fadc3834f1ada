//! Re-slices variable-length encoder packets into caller-sized reads.

use std::sync::Arc;
use std::thread;

use argus_codec::{EncoderError, ReceiveOutcome, VideoEncoder};
use argus_core::format::FrameInterval;
use argus_core::metrics::FlowCounters;
use argus_core::timing::{MediaTimestamp, TimingState};
use tracing::warn;

use crate::tunables::ReaderTunables;

/// What one [`ChunkReader::read`] call delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadOutcome {
    pub bytes: usize,
    /// Complete packets accounted to this read. A packet split across
    /// reads counts on the read that delivers its tail.
    pub frames: u32,
    /// When the delivered bytes are due to play.
    pub timestamp: MediaTimestamp,
    /// Media time spanned by the accounted packets.
    pub duration_us: u64,
    pub end_of_stream: bool,
}

/// Pulls compressed packets out of an encoder and re-slices them to the
/// caller's buffer size.
///
/// Packets rarely match read sizes, so the reader keeps the tail of a
/// split packet in a leftover buffer and delivers it at the start of the
/// next read. No byte is ever dropped or reordered: concatenating reads
/// reproduces the packet stream exactly.
pub struct ChunkReader {
    encoder: Arc<dyn VideoEncoder>,
    counters: Arc<FlowCounters>,
    leftover: Vec<u8>,
    tunables: ReaderTunables,
    timing: TimingState,
    frame_duration_us: u64,
}

impl ChunkReader {
    pub fn new(
        encoder: Arc<dyn VideoEncoder>,
        interval: FrameInterval,
        tunables: ReaderTunables,
        counters: Arc<FlowCounters>,
    ) -> Self {
        Self {
            encoder,
            counters,
            leftover: Vec::new(),
            tunables: tunables.sanitized(),
            timing: TimingState::new(),
            frame_duration_us: interval.frame_duration_us().max(1),
        }
    }

    /// Fill `dst` from the compressed stream.
    ///
    /// Leftover bytes from a previously split packet go first, then whole
    /// packets while they fit. A packet larger than the remaining space
    /// is split: the head fills `dst`, the tail waits for the next read.
    /// While nothing has been delivered yet the reader polls the encoder
    /// at `poll_interval` (bounded by `poll_budget`); once any byte has
    /// been delivered, a dry poll ends the read instead of blocking.
    ///
    /// An encoder error surfaces as `Err` only when the read has
    /// delivered nothing; otherwise the partial read is returned and the
    /// error is left to the next call.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<ReadOutcome, EncoderError> {
        if dst.is_empty() {
            return Ok(ReadOutcome {
                bytes: 0,
                frames: 0,
                timestamp: self.timing.presentation(),
                duration_us: 0,
                end_of_stream: false,
            });
        }

        let mut written = 0usize;
        let mut frames = 0u32;
        let mut end_of_stream = false;

        if !self.leftover.is_empty() {
            let take = self.leftover.len().min(dst.len());
            dst[..take].copy_from_slice(&self.leftover[..take]);
            written = take;
            if take == self.leftover.len() {
                self.leftover.clear();
                frames += 1;
                self.counters.packet_delivered();
            } else {
                // Still too big for one read; shift the rest down.
                self.leftover.copy_within(take.., 0);
                let rest = self.leftover.len() - take;
                self.leftover.truncate(rest);
            }
        }

        let mut polls_left = self.tunables.poll_budget;
        while written < dst.len() {
            match self.encoder.try_receive() {
                Ok(ReceiveOutcome::Packet(packet)) => {
                    let room = dst.len() - written;
                    if packet.data.len() <= room {
                        dst[written..written + packet.data.len()].copy_from_slice(&packet.data);
                        written += packet.data.len();
                        frames += 1;
                        self.counters.packet_delivered();
                    } else {
                        dst[written..].copy_from_slice(&packet.data[..room]);
                        written = dst.len();
                        let tail = &packet.data[room..];
                        assert!(
                            tail.len() <= self.tunables.leftover_capacity,
                            "packet tail of {} bytes exceeds leftover capacity {}; \
                             raise ReaderTunables::leftover_capacity",
                            tail.len(),
                            self.tunables.leftover_capacity,
                        );
                        self.leftover.clear();
                        self.leftover.extend_from_slice(tail);
                    }
                }
                Ok(ReceiveOutcome::Pending) => {
                    if written > 0 {
                        break;
                    }
                    if let Some(budget) = polls_left.as_mut() {
                        if *budget == 0 {
                            break;
                        }
                        *budget -= 1;
                    }
                    self.counters.reader_stall();
                    thread::sleep(self.tunables.poll_interval);
                }
                Ok(ReceiveOutcome::Finished) => {
                    end_of_stream = true;
                    break;
                }
                Err(err) => {
                    if written == 0 {
                        return Err(err);
                    }
                    warn!(code = err.code(), error = %err, "encoder failed mid-read; returning partial data");
                    break;
                }
            }
        }

        let duration_us = u64::from(frames) * self.frame_duration_us;
        let timestamp = if written > 0 {
            self.timing.on_delivery(duration_us)
        } else {
            self.timing.presentation()
        };
        Ok(ReadOutcome {
            bytes: written,
            frames,
            timestamp,
            duration_us,
            end_of_stream,
        })
    }

    /// Bytes held back from a split packet.
    pub fn buffered(&self) -> usize {
        self.leftover.len()
    }

    /// Drop buffered bytes and forget the presentation anchor so a future
    /// stream starts clean.
    pub fn reset(&mut self) {
        self.leftover.clear();
        self.timing.reset();
    }
}
