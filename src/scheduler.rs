//! Scroll scheduling and window extraction.
//!
//! Planning is pure arithmetic over heights ([`plan_scroll`]); extraction
//! ([`extract_frames`]) turns the offset list into pixel buffers. Consecutive
//! frames at the same offset share one buffer.

use std::sync::Arc;

use image::{imageops, Rgb, RgbImage};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::ScrollMode;
use crate::geometry::WindowGeometry;

/// Frames emitted when the image is too short to scroll and no pause is set.
pub const STATIC_MIN_FRAMES: u32 = 30;

/// Fill for the part of a window that runs past the bottom of the image.
pub const PAD_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

pub type Frame = Arc<RgbImage>;

/// `round(pause_seconds * fps)`, floored at zero.
pub fn pause_frame_count(pause_seconds: f64, fps: u32) -> u32 {
    let frames = (pause_seconds * f64::from(fps)).round();
    if frames.is_finite() && frames > 0.0 {
        frames.min(f64::from(u32::MAX)) as u32
    } else {
        0
    }
}

/// Ordered scroll offsets, one per output frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScrollPlan {
    pub offsets: Vec<u32>,
    pub pause_frames: u32,
    pub max_offset: u32,
    /// Where the last scroll step ended.
    pub final_offset: u32,
}

impl ScrollPlan {
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn is_static(&self) -> bool {
        self.max_offset == 0
    }
}

pub fn plan_scroll(
    scaled_height: u32,
    window_height: u32,
    scroll_speed: u32,
    pause_frames: u32,
    mode: ScrollMode,
) -> ScrollPlan {
    if scaled_height <= window_height {
        let count = pause_frames.max(STATIC_MIN_FRAMES);
        return ScrollPlan {
            offsets: vec![0; count as usize],
            pause_frames,
            max_offset: 0,
            final_offset: 0,
        };
    }

    let step = scroll_speed.max(1);
    let max_offset = scaled_height - window_height;
    let hold = pause_frames as usize;
    let mut offsets = Vec::with_capacity(hold * 2 + (max_offset / step) as usize * 2 + 2);

    offsets.extend(std::iter::repeat(0).take(hold));

    let mut offset = 0_u32;
    while offset < max_offset {
        offset = offset.saturating_add(step).min(max_offset);
        offsets.push(offset);
    }

    offsets.extend(std::iter::repeat(max_offset).take(hold));

    match mode {
        ScrollMode::Down => {}
        ScrollMode::RoundTrip => {
            while offset > 0 {
                offset = offset.saturating_sub(step);
                offsets.push(offset);
            }
        }
        ScrollMode::SinglePass => {
            offsets.truncate(offsets.len() - hold);
        }
    }

    ScrollPlan {
        offsets,
        pause_frames,
        max_offset,
        final_offset: offset,
    }
}

/// Crop a `geometry`-sized window whose top edge is at `offset`. Rows past
/// the bottom of the image are filled with [`PAD_COLOR`].
pub fn extract_window(scaled: &RgbImage, geometry: WindowGeometry, offset: u32) -> RgbImage {
    let top = offset.min(scaled.height());
    let available = scaled.height() - top;
    let width = geometry.width.min(scaled.width());

    if available >= geometry.height && width == geometry.width {
        return imageops::crop_imm(scaled, 0, top, width, geometry.height).to_image();
    }

    let mut window = RgbImage::from_pixel(geometry.width, geometry.height, PAD_COLOR);
    let rows = available.min(geometry.height);
    if rows > 0 && width > 0 {
        let visible = imageops::crop_imm(scaled, 0, top, width, rows).to_image();
        imageops::replace(&mut window, &visible, 0, 0);
    }
    window
}

/// Ordered frames of identical size; index order is playback order.
#[derive(Debug, Clone)]
pub struct FrameSequence {
    geometry: WindowGeometry,
    frames: Vec<Frame>,
}

impl FrameSequence {
    pub fn new(geometry: WindowGeometry, frames: Vec<Frame>) -> Self {
        Self { geometry, frames }
    }

    pub fn geometry(&self) -> WindowGeometry {
        self.geometry
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn iter(&self) -> impl Iterator<Item = &RgbImage> {
        self.frames.iter().map(|frame| frame.as_ref())
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }
}

pub fn extract_frames(
    scaled: &RgbImage,
    geometry: WindowGeometry,
    plan: &ScrollPlan,
) -> FrameSequence {
    let mut frames: Vec<Frame> = Vec::with_capacity(plan.len());
    let mut previous: Option<(u32, Frame)> = None;

    for &offset in &plan.offsets {
        let frame = match &previous {
            Some((last_offset, frame)) if *last_offset == offset => Arc::clone(frame),
            _ => Arc::new(extract_window(scaled, geometry, offset)),
        };
        previous = Some((offset, Arc::clone(&frame)));
        frames.push(frame);
    }

    debug!(
        frames = frames.len(),
        distinct = count_distinct(&frames),
        "extracted windows"
    );
    info!(
        frames = frames.len(),
        width = geometry.width,
        height = geometry.height,
        "scheduled frames"
    );
    FrameSequence::new(geometry, frames)
}

fn count_distinct(frames: &[Frame]) -> usize {
    frames
        .windows(2)
        .filter(|pair| !Arc::ptr_eq(&pair[0], &pair[1]))
        .count()
        + usize::from(!frames.is_empty())
}
