use std::path::Path;
use std::sync::Arc;

use image::RgbImage;
use serde::Serialize;
use tracing::{info, warn};

use crate::font_assets::{resolve_watermark_font, TextMask, WatermarkFont};
use crate::scheduler::{Frame, FrameSequence};

pub const MIN_FONT_SIZE: f32 = 12.0;
pub const MARGIN: i64 = 10;
pub const PADDING: i64 = 5;
pub const BACKDROP_COLOR: [u8; 4] = [0, 0, 0, 128];
pub const TEXT_COLOR: [u8; 4] = [255, 255, 255, 200];

/// Font size for a frame `width` pixels wide: one fiftieth of the width, at least 12.
pub fn font_size_for_width(width: u32) -> f32 {
    ((width / 50) as f32).max(MIN_FONT_SIZE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rect {
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
}

/// Where the text and its backdrop land in a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WatermarkLayout {
    pub text_x: i64,
    pub text_y: i64,
    pub backdrop: Rect,
}

/// Text rendered once, stamped onto each frame.
#[derive(Debug, Clone)]
pub struct Watermark {
    text: String,
    mask: TextMask,
}

impl Watermark {
    pub fn new(text: &str, font: &WatermarkFont, frame_width: u32) -> Self {
        let size = font_size_for_width(frame_width);
        Self {
            text: text.to_owned(),
            mask: font.rasterize(text, size),
        }
    }

    /// Resolve the font (explicit path, then system fonts, then builtin) and render `text`.
    pub fn resolve(text: &str, font_path: Option<&Path>, frame_width: u32) -> Self {
        let font = resolve_watermark_font(font_path, text);
        info!(font = %font.label(), "watermark font");
        Self::new(text, &font, frame_width)
    }

    /// Bottom-right placement with a fixed margin and backdrop padding.
    pub fn layout(&self, frame_width: u32, frame_height: u32) -> WatermarkLayout {
        let text_w = i64::from(self.mask.width);
        let text_h = i64::from(self.mask.height);
        let text_x = i64::from(frame_width) - text_w - MARGIN;
        let text_y = i64::from(frame_height) - text_h - MARGIN;
        WatermarkLayout {
            text_x,
            text_y,
            backdrop: Rect {
                x: text_x - PADDING,
                y: text_y - PADDING,
                w: text_w + PADDING * 2,
                h: text_h + PADDING * 2,
            },
        }
    }

    pub fn stamp(&self, frame: &mut RgbImage) {
        if self.mask.is_empty() {
            return;
        }
        let layout = self.layout(frame.width(), frame.height());
        fill_rect(frame, layout.backdrop, BACKDROP_COLOR);
        blend_mask(frame, layout.text_x, layout.text_y, &self.mask, TEXT_COLOR);
    }
}

/// Stamp every frame. Runs of frames sharing one buffer are stamped once and
/// keep sharing the stamped copy; the unstamped buffers are never modified.
pub fn apply_watermark(frames: FrameSequence, watermark: &Watermark) -> FrameSequence {
    if watermark.mask.is_empty() {
        warn!(
            text = %watermark.text,
            "watermark text renders no pixels, leaving frames untouched"
        );
        return frames;
    }

    let geometry = frames.geometry();
    let mut stamped_frames: Vec<Frame> = Vec::with_capacity(frames.len());
    let mut last: Option<(Frame, Frame)> = None;

    for frame in frames.into_frames() {
        if let Some((source, stamped)) = &last {
            if Arc::ptr_eq(source, &frame) {
                stamped_frames.push(Arc::clone(stamped));
                continue;
            }
        }
        let mut copy = frame.as_ref().clone();
        watermark.stamp(&mut copy);
        let stamped = Arc::new(copy);
        stamped_frames.push(Arc::clone(&stamped));
        last = Some((frame, stamped));
    }

    FrameSequence::new(geometry, stamped_frames)
}

fn fill_rect(frame: &mut RgbImage, rect: Rect, color: [u8; 4]) {
    let width = i64::from(frame.width());
    let height = i64::from(frame.height());
    let x0 = rect.x.clamp(0, width);
    let y0 = rect.y.clamp(0, height);
    let x1 = rect.x.saturating_add(rect.w).clamp(0, width);
    let y1 = rect.y.saturating_add(rect.h).clamp(0, height);

    for y in y0..y1 {
        for x in x0..x1 {
            blend_pixel(frame, x as u32, y as u32, color);
        }
    }
}

fn blend_mask(frame: &mut RgbImage, x: i64, y: i64, mask: &TextMask, color: [u8; 4]) {
    let width = i64::from(frame.width());
    let height = i64::from(frame.height());

    for row in 0..mask.height {
        let py = y + i64::from(row);
        if py < 0 || py >= height {
            continue;
        }
        for col in 0..mask.width {
            let px = x + i64::from(col);
            if px < 0 || px >= width {
                continue;
            }
            let coverage = mask.at(col, row);
            if coverage == 0 {
                continue;
            }
            let alpha = ((u16::from(coverage) * u16::from(color[3])) / 255) as u8;
            blend_pixel(
                frame,
                px as u32,
                py as u32,
                [color[0], color[1], color[2], alpha],
            );
        }
    }
}

fn blend_pixel(frame: &mut RgbImage, x: u32, y: u32, src: [u8; 4]) {
    let alpha = u16::from(src[3]);
    if alpha == 0 {
        return;
    }
    let inv_alpha = 255_u16 - alpha;
    let pixel = frame.get_pixel_mut(x, y);
    for channel in 0..3 {
        let dst = u16::from(pixel[channel]);
        let src_c = u16::from(src[channel]);
        pixel[channel] = ((src_c * alpha + dst * inv_alpha + 127) / 255) as u8;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use image::{Rgb, RgbImage};

    use crate::font_assets::WatermarkFont;
    use crate::geometry::WindowGeometry;
    use crate::scheduler::FrameSequence;

    use super::{apply_watermark, font_size_for_width, Rect, Watermark, WatermarkLayout};

    fn white(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([255, 255, 255]))
    }

    #[test]
    fn font_size_scales_with_width_and_floors_at_twelve() {
        assert_eq!(font_size_for_width(200), 12.0);
        assert_eq!(font_size_for_width(800), 16.0);
        assert_eq!(font_size_for_width(1920), 38.0);
    }

    #[test]
    fn layout_is_flush_bottom_right() {
        let watermark = Watermark::new("AB", &WatermarkFont::Builtin, 200);
        assert_eq!(
            watermark.layout(200, 100),
            WatermarkLayout {
                text_x: 168,
                text_y: 76,
                backdrop: Rect {
                    x: 163,
                    y: 71,
                    w: 32,
                    h: 24
                },
            }
        );
    }

    #[test]
    fn stamp_darkens_backdrop_and_leaves_rest_alone() {
        let watermark = Watermark::new("AB", &WatermarkFont::Builtin, 200);
        let mut frame = white(200, 100);
        watermark.stamp(&mut frame);

        // backdrop corner: white under black at alpha 128
        assert_eq!(frame.get_pixel(163, 71), &Rgb([127, 127, 127]));
        assert_eq!(frame.get_pixel(194, 94), &Rgb([127, 127, 127]));
        assert_eq!(frame.get_pixel(162, 71), &Rgb([255, 255, 255]));
        assert_eq!(frame.get_pixel(195, 95), &Rgb([255, 255, 255]));
        assert_eq!(frame.get_pixel(10, 10), &Rgb([255, 255, 255]));

        // inked text pixel: light text at alpha 200 over the backdrop
        let inked = frame.get_pixel(170, 76);
        assert!(inked[0] > 200, "text pixel should be light, got {inked:?}");
    }

    #[test]
    fn shared_frames_stay_shared_and_originals_untouched() {
        let geometry = WindowGeometry {
            width: 120,
            height: 60,
        };
        let top = Arc::new(white(120, 60));
        let bottom = Arc::new(RgbImage::from_pixel(120, 60, Rgb([0, 0, 255])));
        let frames = FrameSequence::new(
            geometry,
            vec![top.clone(), top.clone(), bottom.clone(), bottom.clone()],
        );

        let watermark = Watermark::new("hi", &WatermarkFont::Builtin, 120);
        let stamped = apply_watermark(frames, &watermark);
        let stored = stamped.frames();

        assert_eq!(stored.len(), 4);
        assert!(Arc::ptr_eq(&stored[0], &stored[1]));
        assert!(Arc::ptr_eq(&stored[2], &stored[3]));
        assert!(!Arc::ptr_eq(&stored[0], &top));
        assert_eq!(top.get_pixel(119, 59), &Rgb([255, 255, 255]));
        assert_ne!(stored[0].as_ref(), top.as_ref());
    }

    #[test]
    fn blank_text_leaves_frames_untouched() {
        let geometry = WindowGeometry {
            width: 60,
            height: 30,
        };
        let frame = Arc::new(white(60, 30));
        let frames = FrameSequence::new(geometry, vec![frame.clone(), frame.clone()]);

        let watermark = Watermark::new("", &WatermarkFont::Builtin, 60);
        let stamped = apply_watermark(frames, &watermark);
        assert!(stamped
            .frames()
            .iter()
            .all(|stored| Arc::ptr_eq(stored, &frame)));
    }

    #[test]
    fn oversized_text_is_clipped_not_panicking() {
        let watermark = Watermark::new(
            "a very long watermark that cannot fit",
            &WatermarkFont::Builtin,
            40,
        );
        let mut frame = white(40, 20);
        watermark.stamp(&mut frame);
        assert_eq!(frame.dimensions(), (40, 20));
    }
}
