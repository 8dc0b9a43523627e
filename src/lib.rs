//! Scrollify turns one tall image into frames that scroll a fixed-size
//! window down it (and optionally back up), then writes them out as an
//! animated GIF or a video.

pub mod config;
pub mod encoding;
pub mod error_codes;
pub mod font_assets;
pub mod font_data;
pub mod geometry;
pub mod pipeline;
pub mod preprocess;
pub mod scheduler;
pub mod watermark;

pub use config::{AspectMode, Config, OutputFormat, ScrollMode};
pub use encoding::{FfmpegMode, VideoCapability};
pub use pipeline::{build_frames, run, RenderSummary};
