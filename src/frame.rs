//! Image frames delivered by output channels

use std::time::Instant;

use image::{DynamicImage, GrayImage, RgbImage};

use crate::common::ImageFrameType;

/// One captured image.
///
/// Frames are immutable once produced; retrieving one from a channel moves it
/// to the caller.
#[derive(Debug, Clone)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: ImageFrameType,
    sequence_num: u64,
    timestamp: Instant,
}

impl Frame {
    pub fn new(width: u32, height: u32, format: ImageFrameType, data: Vec<u8>) -> Self {
        Frame {
            data,
            width,
            height,
            format,
            sequence_num: 0,
            timestamp: Instant::now(),
        }
    }

    /// Create a test pattern frame of the given format
    pub fn test_pattern(width: u32, height: u32, format: ImageFrameType, pattern: TestPattern) -> Self {
        let len = format.bytes_per_frame(width, height);
        let w = width.max(1) as usize;
        let data = match pattern {
            TestPattern::Gradient => (0..len)
                .map(|i| {
                    let x = i % w;
                    let y = i / w;
                    ((x + y) % 256) as u8
                })
                .collect(),
            TestPattern::Checkerboard => (0..len)
                .map(|i| {
                    let x = i % w;
                    let y = i / w;
                    if (x / 32 + y / 32) % 2 == 0 { 255 } else { 0 }
                })
                .collect(),
        };
        Frame::new(width, height, format, data)
    }

    pub(crate) fn with_sequence_num(mut self, sequence_num: u64) -> Self {
        self.sequence_num = sequence_num;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> ImageFrameType {
        self.format
    }

    /// Position of this frame in its channel's production order, starting at 0.
    pub fn sequence_num(&self) -> u64 {
        self.sequence_num
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn describe(&self) -> String {
        format!("{}x{} {} #{}", self.width, self.height, self.format, self.sequence_num)
    }

    /// Convert to an `image` buffer.
    ///
    /// Only interleaved 8-bit color and grayscale frames are supported; BGR data
    /// is swizzled to RGB. Returns `None` for other formats or a short buffer.
    pub fn to_image(&self) -> Option<DynamicImage> {
        match self.format {
            ImageFrameType::RGB888i => {
                RgbImage::from_raw(self.width, self.height, self.data.clone()).map(DynamicImage::ImageRgb8)
            }
            ImageFrameType::BGR888i => {
                let mut rgb = self.data.clone();
                for px in rgb.chunks_exact_mut(3) {
                    px.swap(0, 2);
                }
                RgbImage::from_raw(self.width, self.height, rgb).map(DynamicImage::ImageRgb8)
            }
            ImageFrameType::GRAY8 => {
                GrayImage::from_raw(self.width, self.height, self.data.clone()).map(DynamicImage::ImageLuma8)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TestPattern {
    #[default]
    Gradient,
    Checkerboard,
}
