//! One scroll render, start to finish.
//!
//! Each stage consumes the previous stage's value and returns a new one:
//! `SourceImage` -> window height -> `PreparedImage` -> `ScrollPlan` +
//! `FrameSequence` -> `EncodedOutput`. The caller's [`Config`] is only read.

use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::config::Config;
use crate::encoding::{encode_frames, EncodeSettings, EncodedOutput, EncoderKind, VideoCapability};
use crate::geometry::{resolve_window_height, WindowGeometry};
use crate::preprocess::{load_source, prepare};
use crate::scheduler::{extract_frames, pause_frame_count, plan_scroll, FrameSequence, ScrollPlan};
use crate::watermark::{apply_watermark, Watermark};

/// Frames ready for encoding, plus what produced them.
#[derive(Debug, Clone)]
pub struct RenderedFrames {
    pub source_size: (u32, u32),
    pub scaled_size: (u32, u32),
    pub plan: ScrollPlan,
    pub frames: FrameSequence,
}

impl RenderedFrames {
    pub fn geometry(&self) -> WindowGeometry {
        self.frames.geometry()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderSummary {
    pub output_path: PathBuf,
    pub bytes: u64,
    pub frame_count: usize,
    pub width: u32,
    pub height: u32,
    pub encoder: EncoderKind,
    pub fell_back: bool,
}

/// Load, size, resample, schedule and (optionally) watermark.
pub fn build_frames(config: &Config) -> Result<RenderedFrames> {
    config.validate_parameters()?;

    let source = load_source(&config.source_image)?;
    let window_height = resolve_window_height(
        config.output_width,
        &config.aspect_ratio,
        config.output_height,
        Some(source.dimensions()),
    )?;
    info!(
        width = config.output_width,
        height = window_height,
        aspect = config.aspect_ratio.keyword(),
        "requested window"
    );

    let prepared = prepare(
        &source,
        config.output_width,
        window_height,
        config.quality_factor,
    );

    let pause_frames = pause_frame_count(config.pause_duration, config.framerate);
    let plan = plan_scroll(
        prepared.scaled.height(),
        prepared.geometry.height,
        config.scroll_speed,
        pause_frames,
        config.scroll_mode,
    );
    let mut frames = extract_frames(&prepared.scaled, prepared.geometry, &plan);

    if config.add_watermark {
        let watermark = Watermark::resolve(
            &config.watermark_text,
            config.watermark_font.as_deref(),
            prepared.geometry.width,
        );
        frames = apply_watermark(frames, &watermark);
    }

    Ok(RenderedFrames {
        source_size: source.dimensions(),
        scaled_size: prepared.scaled.dimensions(),
        plan,
        frames,
    })
}

/// Run the whole pipeline and write the output file.
pub fn run(config: &Config, capability: &VideoCapability) -> Result<RenderSummary> {
    let rendered = build_frames(config)?;
    let settings = EncodeSettings::new(config.framerate, config.scroll_mode);
    let requested = config.output_path();

    let output: EncodedOutput = encode_frames(
        &rendered.frames,
        config.output_format,
        &settings,
        &requested,
        capability,
    )
    .with_context(|| format!("failed to encode {}", requested.display()))?;

    let geometry = rendered.geometry();
    Ok(RenderSummary {
        output_path: output.path,
        bytes: output.bytes,
        frame_count: rendered.frames.len(),
        width: geometry.width,
        height: geometry.height,
        encoder: output.kind,
        fell_back: output.fell_back,
    })
}

/// Run one pipeline invocation on a background thread. The caller must not
/// start two runs against the same output path.
pub fn spawn_render(
    config: Config,
    capability: VideoCapability,
) -> Result<JoinHandle<Result<RenderSummary>>> {
    thread::Builder::new()
        .name("scrollify-render".to_owned())
        .spawn(move || run(&config, &capability))
        .context("failed to spawn render thread")
}
