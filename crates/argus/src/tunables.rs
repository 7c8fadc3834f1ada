//! Pipeline configuration.

use std::time::Duration;

use argus_codec::EncoderOptions;
use argus_core::format::{FrameInterval, Resolution};

/// Default capture device path.
pub const DEFAULT_DEVICE: &str = "/dev/video0";
/// Default mapped buffers in the driver ring.
pub const DEFAULT_BUFFER_COUNT: u32 = 4;
/// Default wait before a silent device is declared wedged.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(2);
/// Default room for the tail of a split packet.
pub const DEFAULT_LEFTOVER_CAPACITY: usize = 512 * 1024;
/// Default wait between encoder polls on an empty read.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Everything needed to open a camera and stream H.264 from it.
///
/// # Example
/// ```rust
/// use argus::tunables::CameraConfig;
///
/// let mut config = CameraConfig::default();
/// config.device = "/dev/video2".into();
/// assert_eq!(config.buffer_count, 4);
/// ```
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CameraConfig {
    pub device: String,
    pub resolution: Resolution,
    pub interval: FrameInterval,
    pub buffer_count: u32,
    /// How long `acquire` may block before the device is presumed wedged.
    pub acquire_timeout: Duration,
    pub encoder: EncoderOptions,
    pub reader: ReaderTunables,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.into(),
            resolution: Resolution::VGA,
            interval: FrameInterval::default(),
            buffer_count: DEFAULT_BUFFER_COUNT,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            encoder: EncoderOptions::default(),
            reader: ReaderTunables::default(),
        }
    }
}

impl CameraConfig {
    /// Clamp out-of-range settings instead of failing at open time.
    pub fn sanitized(&self) -> Self {
        let mut config = self.clone();
        config.buffer_count = config.buffer_count.clamp(2, 32);
        config.acquire_timeout = config.acquire_timeout.max(Duration::from_millis(10));
        config.encoder = config.encoder.sanitized();
        config.reader = config.reader.sanitized();
        config
    }
}

/// Tunables for the chunking reader.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ReaderTunables {
    /// Upper bound on the tail kept from a split packet. Must exceed the
    /// largest access unit the encoder can emit.
    pub leftover_capacity: usize,
    /// Wait between encoder polls while a read has delivered nothing yet.
    pub poll_interval: Duration,
    /// Maximum dry polls per read. `None` polls until data arrives or the
    /// stream ends.
    pub poll_budget: Option<u32>,
}

impl Default for ReaderTunables {
    fn default() -> Self {
        Self {
            leftover_capacity: DEFAULT_LEFTOVER_CAPACITY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_budget: None,
        }
    }
}

impl ReaderTunables {
    pub fn sanitized(&self) -> Self {
        Self {
            leftover_capacity: self.leftover_capacity.max(4096),
            poll_interval: self.poll_interval.max(Duration::from_micros(50)),
            poll_budget: self.poll_budget,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_a_vga_webcam() {
        let config = CameraConfig::default();
        assert_eq!(config.device, "/dev/video0");
        assert_eq!(config.resolution, Resolution::VGA);
        assert_eq!(config.interval.frame_duration_us(), 33_333);
        assert_eq!(config.acquire_timeout, Duration::from_secs(2));
    }

    #[test]
    fn sanitized_clamps_degenerate_settings() {
        let config = CameraConfig {
            buffer_count: 0,
            acquire_timeout: Duration::ZERO,
            reader: ReaderTunables {
                leftover_capacity: 16,
                poll_interval: Duration::ZERO,
                poll_budget: Some(5),
            },
            ..CameraConfig::default()
        };
        let config = config.sanitized();
        assert_eq!(config.buffer_count, 2);
        assert_eq!(config.acquire_timeout, Duration::from_millis(10));
        assert_eq!(config.reader.leftover_capacity, 4096);
        assert_eq!(config.reader.poll_interval, Duration::from_micros(50));
        assert_eq!(config.reader.poll_budget, Some(5));
    }
}
