use std::fmt;

use serde::{Deserialize, Serialize};

/// Pixel layout of a frame.
///
/// Discriminants match `dai::ImgFrame::Type`.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageFrameType {
    RGB888p = 7,
    BGR888p = 8,
    RGB888i = 9,
    BGR888i = 10,
    RAW16 = 14,
    RAW8 = 18,
    NV12 = 22,
    GRAY8 = 30,
}

impl ImageFrameType {
    pub fn from_raw(value: i32) -> Option<Self> {
        use ImageFrameType::*;
        match value {
            7 => Some(RGB888p),
            8 => Some(BGR888p),
            9 => Some(RGB888i),
            10 => Some(BGR888i),
            14 => Some(RAW16),
            18 => Some(RAW8),
            22 => Some(NV12),
            30 => Some(GRAY8),
            _ => None,
        }
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }

    /// Whether color planes are interleaved (`RGBRGB...`) rather than planar.
    pub fn is_interleaved(self) -> bool {
        matches!(self, ImageFrameType::RGB888i | ImageFrameType::BGR888i)
    }

    /// Size in bytes of one frame of this type.
    pub fn bytes_per_frame(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            ImageFrameType::RGB888p
            | ImageFrameType::BGR888p
            | ImageFrameType::RGB888i
            | ImageFrameType::BGR888i => pixels * 3,
            ImageFrameType::RAW16 => pixels * 2,
            ImageFrameType::RAW8 | ImageFrameType::GRAY8 => pixels,
            // 4:2:0, one full-resolution luma plane plus a half-size chroma plane.
            ImageFrameType::NV12 => pixels + pixels / 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ImageFrameType::RGB888p => "RGB888p",
            ImageFrameType::BGR888p => "BGR888p",
            ImageFrameType::RGB888i => "RGB888i",
            ImageFrameType::BGR888i => "BGR888i",
            ImageFrameType::RAW16 => "RAW16",
            ImageFrameType::RAW8 => "RAW8",
            ImageFrameType::NV12 => "NV12",
            ImageFrameType::GRAY8 => "GRAY8",
        }
    }
}

impl fmt::Display for ImageFrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CameraBoardSocket {
    #[default]
    Auto = -1,
    CamA = 0,
    CamB = 1,
    CamC = 2,
    CamD = 3,
}

impl CameraBoardSocket {
    pub fn as_raw(self) -> i32 {
        self as i32
    }

    pub fn from_raw(value: i32) -> Self {
        match value {
            0 => CameraBoardSocket::CamA,
            1 => CameraBoardSocket::CamB,
            2 => CameraBoardSocket::CamC,
            3 => CameraBoardSocket::CamD,
            _ => CameraBoardSocket::Auto,
        }
    }
}

impl fmt::Display for CameraBoardSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Channel order of color output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ColorOrder {
    #[default]
    Bgr,
    Rgb,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type_raw_values() {
        assert_eq!(ImageFrameType::from_raw(9), Some(ImageFrameType::RGB888i));
        assert_eq!(ImageFrameType::GRAY8.as_raw(), 30);
        assert_eq!(ImageFrameType::from_raw(-5), None);
    }

    #[test]
    fn test_bytes_per_frame() {
        assert_eq!(ImageFrameType::BGR888i.bytes_per_frame(4, 2), 24);
        assert_eq!(ImageFrameType::RAW16.bytes_per_frame(4, 2), 16);
        assert_eq!(ImageFrameType::NV12.bytes_per_frame(4, 2), 12);
        assert!(ImageFrameType::RGB888i.is_interleaved());
        assert!(!ImageFrameType::RGB888p.is_interleaved());
    }

    #[test]
    fn test_board_socket_fallback() {
        assert_eq!(CameraBoardSocket::from_raw(2), CameraBoardSocket::CamC);
        assert_eq!(CameraBoardSocket::from_raw(42), CameraBoardSocket::Auto);
    }
}
