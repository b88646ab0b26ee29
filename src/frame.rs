use std::time::Instant;

#[cfg(feature = "ipc")]
use iceoryx2::prelude::ZeroCopySend;

/// Pixel format identifier (matches common fourcc codes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "ipc", derive(ZeroCopySend))]
pub enum PixelFormat {
    Yuv420 = 0x32315559, // YU12 / I420
    Nv12 = 0x3231564E,   // NV12
    Nv21 = 0x3132564E,   // NV21
    Unknown = 0,
}

impl PixelFormat {
    /// Map a fourcc code to a known format.
    pub fn from_fourcc(code: u32) -> Self {
        match code {
            0x32315559 => PixelFormat::Yuv420,
            0x3231564E => PixelFormat::Nv12,
            0x3132564E => PixelFormat::Nv21,
            _ => PixelFormat::Unknown,
        }
    }

    /// All supported formats start with a full-resolution 8-bit luma plane.
    pub fn has_luma_plane(self) -> bool {
        !matches!(self, PixelFormat::Unknown)
    }
}

/// One captured image.
///
/// Pixel storage is private and the type is not `Clone`: the coordinator
/// owns it for one inference attempt and it is gone once that attempt ends.
pub struct Frame {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub captured_at: Instant,
    pixels: Vec<u8>,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("format", &self.format)
            .field("len", &self.pixels.len())
            .finish()
    }
}

impl Frame {
    pub fn new(
        sequence: u64,
        width: u32,
        height: u32,
        stride: u32,
        format: PixelFormat,
        pixels: Vec<u8>,
    ) -> Self {
        Self::captured(sequence, width, height, stride, format, pixels, Instant::now())
    }

    /// Build a frame with an explicit capture instant.
    pub fn captured(
        sequence: u64,
        width: u32,
        height: u32,
        stride: u32,
        format: PixelFormat,
        pixels: Vec<u8>,
        captured_at: Instant,
    ) -> Self {
        Self {
            sequence,
            width,
            height,
            stride,
            format,
            captured_at,
            pixels,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// The luma plane including stride padding; `None` if the buffer is too
    /// short to hold `stride * height` bytes.
    pub fn luma_plane(&self) -> Option<&[u8]> {
        let len = self.stride as usize * self.height as usize;
        self.pixels.get(..len)
    }
}
