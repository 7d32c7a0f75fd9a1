//! Frame utilities: resize, padded crop, JPEG encoding

use crate::error::Result;
use crate::models::{BBox, Frame, FrameSize};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};

/// Resize a frame to the configured size, or return it untouched when it
/// already matches (sources may ignore the requested dimensions)
pub fn resize_to(frame: Frame, size: FrameSize) -> Frame {
    if frame.width() == size.width && frame.height() == size.height {
        return frame;
    }
    imageops::resize(&frame, size.width, size.height, FilterType::Triangle)
}

/// Pixel rectangle `(x, y, width, height)` of a box grown by `padding` on
/// every side and clamped to the frame
pub fn padded_region(bbox: &BBox, padding: u32, frame_width: u32, frame_height: u32) -> (u32, u32, u32, u32) {
    let pad = padding as i64;
    let x1 = (bbox.x1 as i64 - pad).clamp(0, frame_width as i64);
    let y1 = (bbox.y1 as i64 - pad).clamp(0, frame_height as i64);
    let x2 = (bbox.x2 as i64 + pad).clamp(0, frame_width as i64);
    let y2 = (bbox.y2 as i64 + pad).clamp(0, frame_height as i64);

    (
        x1 as u32,
        y1 as u32,
        (x2 - x1).max(0) as u32,
        (y2 - y1).max(0) as u32,
    )
}

/// Crop the region around a person with fixed padding
///
/// A box lying entirely outside the frame yields the full frame.
pub fn crop_with_padding(frame: &Frame, bbox: &BBox, padding: u32) -> Frame {
    let (x, y, w, h) = padded_region(bbox, padding, frame.width(), frame.height());
    if w == 0 || h == 0 {
        return frame.clone();
    }
    imageops::crop_imm(frame, x, y, w, h).to_image()
}

/// Encode a frame as JPEG bytes
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
    encoder.encode_image(frame)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_resize_noop_when_matching() {
        let frame = Frame::from_pixel(64, 48, Rgb([1, 2, 3]));
        let out = resize_to(frame.clone(), FrameSize::new(64, 48));
        assert_eq!(out, frame);
    }

    #[test]
    fn test_resize_changes_dimensions() {
        let frame = Frame::new(128, 96);
        let out = resize_to(frame, FrameSize::new(64, 48));
        assert_eq!((out.width(), out.height()), (64, 48));
    }

    #[test]
    fn test_padded_region_clamped() {
        let bbox = BBox::new(10.0, 5.0, 100.0, 90.0).unwrap();
        assert_eq!(padded_region(&bbox, 20, 110, 100), (0, 0, 110, 100));

        let inner = BBox::new(40.0, 40.0, 60.0, 60.0).unwrap();
        assert_eq!(padded_region(&inner, 20, 200, 200), (20, 20, 60, 60));
    }

    #[test]
    fn test_crop_with_padding() {
        let frame = Frame::new(200, 100);
        let bbox = BBox::new(50.0, 30.0, 80.0, 70.0).unwrap();
        let crop = crop_with_padding(&frame, &bbox, 20);
        assert_eq!((crop.width(), crop.height()), (70, 80));
    }

    #[test]
    fn test_crop_outside_frame_falls_back_to_full_frame() {
        let frame = Frame::new(50, 50);
        let bbox = BBox::new(500.0, 500.0, 600.0, 600.0).unwrap();
        let crop = crop_with_padding(&frame, &bbox, 20);
        assert_eq!((crop.width(), crop.height()), (50, 50));
    }

    #[test]
    fn test_encode_jpeg() {
        let frame = Frame::from_pixel(16, 16, Rgb([200, 10, 10]));
        let bytes = encode_jpeg(&frame, 85).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }
}
