use std::fmt;
use std::num::NonZeroU32;

/// Byte layout of a raw video frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PixelLayout {
    /// Packed 4:2:2, two bytes per pixel, `Y0 U Y1 V` per pixel pair.
    Yuyv422,
    /// Planar 4:2:0. Full-resolution luma plane followed by two
    /// half-resolution chroma planes.
    I420,
}

impl PixelLayout {
    /// Total bytes of one frame at `res` in this layout.
    ///
    /// # Example
    /// ```rust
    /// use argus_core::format::{PixelLayout, Resolution};
    ///
    /// let vga = Resolution::new(640, 480).unwrap();
    /// assert_eq!(PixelLayout::Yuyv422.frame_bytes(vga), 614_400);
    /// assert_eq!(PixelLayout::I420.frame_bytes(vga), 460_800);
    /// ```
    pub fn frame_bytes(self, res: Resolution) -> usize {
        let w = res.width.get() as usize;
        let h = res.height.get() as usize;
        match self {
            PixelLayout::Yuyv422 => w * h * 2,
            PixelLayout::I420 => w * h + (w / 2) * (h / 2) * 2,
        }
    }
}

impl fmt::Display for PixelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelLayout::Yuyv422 => f.write_str("YUYV"),
            PixelLayout::I420 => f.write_str("I420"),
        }
    }
}

/// Frame dimensions in pixels. Zero dimensions are unrepresentable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Resolution {
    pub width: NonZeroU32,
    pub height: NonZeroU32,
}

impl Resolution {
    pub const VGA: Resolution = match (NonZeroU32::new(640), NonZeroU32::new(480)) {
        (Some(width), Some(height)) => Resolution { width, height },
        _ => unreachable!(),
    };

    /// Returns `None` if either dimension is zero.
    pub fn new(width: u32, height: u32) -> Option<Self> {
        Some(Self {
            width: NonZeroU32::new(width)?,
            height: NonZeroU32::new(height)?,
        })
    }

    pub fn pixels(&self) -> u64 {
        self.width.get() as u64 * self.height.get() as u64
    }

    /// Both dimensions divisible by two. Required by 4:2:0 chroma
    /// subsampling.
    pub fn is_even(&self) -> bool {
        self.width.get() % 2 == 0 && self.height.get() % 2 == 0
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Nominal frame interval as a rational number of seconds.
///
/// # Example
/// ```rust
/// use argus_core::format::FrameInterval;
///
/// let thirty = FrameInterval::from_fps(30);
/// assert_eq!(thirty.frame_duration_us(), 33_333);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FrameInterval {
    pub numerator: u32,
    pub denominator: u32,
}

impl FrameInterval {
    pub fn from_fps(fps: u32) -> Self {
        Self {
            numerator: 1,
            denominator: fps.max(1),
        }
    }

    pub fn fps(&self) -> f64 {
        self.denominator as f64 / self.numerator.max(1) as f64
    }

    /// Whole microseconds per frame, truncated. A 1/30 interval yields
    /// 33_333.
    pub fn frame_duration_us(&self) -> u64 {
        1_000_000u64 * self.numerator as u64 / self.denominator.max(1) as u64
    }
}

impl Default for FrameInterval {
    fn default() -> Self {
        Self::from_fps(30)
    }
}
