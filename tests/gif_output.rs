use std::fs::{self, File};
use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use tempfile::tempdir;

use scrollify::config::{AspectMode, Config, OutputFormat, ScrollMode};
use scrollify::encoding::{
    encode_frames, partial_path, EncodeSettings, EncoderKind, VideoCapability,
};
use scrollify::error_codes::{find_coded_error, CodedErrorKind};
use scrollify::geometry::WindowGeometry;
use scrollify::pipeline::{self, spawn_render};
use scrollify::scheduler::FrameSequence;

fn write_gradient_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(y % 256) as u8, (x * 4 % 256) as u8, 90])
    });
    let path = dir.join(name);
    image.save(&path).expect("fixture png should write");
    path
}

/// 64x256 source in a 64x64 window, 16 px per frame at 10 fps with a half
/// second hold: 5 + 12 + 5 = 22 frames.
fn small_job(dir: &Path) -> Config {
    let mut config = Config::new(write_gradient_png(dir, "page.png", 64, 256));
    config.output_width = 64;
    config.aspect_ratio = AspectMode::Ratio("1:1".to_owned());
    config.quality_factor = 1.0;
    config.scroll_speed = 16;
    config.framerate = 10;
    config.pause_duration = 0.5;
    config
}

struct DecodedGif {
    width: u16,
    height: u16,
    delays: Vec<u16>,
    disposals: Vec<gif::DisposalMethod>,
}

fn decode_gif(path: &Path) -> DecodedGif {
    let mut options = gif::DecodeOptions::new();
    options.set_color_output(gif::ColorOutput::RGBA);
    let mut decoder = options
        .read_info(File::open(path).expect("gif should open"))
        .expect("gif header should decode");
    let width = decoder.width();
    let height = decoder.height();
    let mut delays = Vec::new();
    let mut disposals = Vec::new();
    while let Some(frame) = decoder.read_next_frame().expect("gif frame should decode") {
        delays.push(frame.delay);
        disposals.push(frame.dispose);
    }
    DecodedGif {
        width,
        height,
        delays,
        disposals,
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

#[test]
fn gif_merges_holds_and_keeps_total_duration() {
    let dir = tempdir().unwrap();
    let mut config = small_job(dir.path());
    config.output_path = Some(dir.path().join("page.gif"));

    let summary = pipeline::run(&config, &VideoCapability::unavailable("not needed"))
        .expect("gif render should succeed");
    assert_eq!(summary.output_path, dir.path().join("page.gif"));
    assert_eq!(summary.frame_count, 22);
    assert_eq!((summary.width, summary.height), (64, 64));
    assert_eq!(summary.encoder, EncoderKind::Gif);
    assert!(!summary.fell_back);
    assert_eq!(
        summary.bytes,
        fs::metadata(&summary.output_path).unwrap().len()
    );

    let decoded = decode_gif(&summary.output_path);
    assert_eq!((decoded.width, decoded.height), (64, 64));
    // top hold, eleven moving frames, then the last step merged into the bottom hold
    assert_eq!(decoded.delays.len(), 13);
    assert_eq!(decoded.delays[0], 50);
    assert_eq!(decoded.delays[12], 60);
    assert_eq!(decoded.delays.iter().map(|&d| u32::from(d)).sum::<u32>(), 220);
    assert!(decoded
        .disposals
        .iter()
        .all(|&dispose| dispose == gif::DisposalMethod::Background));

    assert!(!partial_path(&summary.output_path).exists());
}

#[test]
fn loop_extension_follows_scroll_mode() {
    let dir = tempdir().unwrap();

    let mut looping = small_job(dir.path());
    looping.output_path = Some(dir.path().join("loop.gif"));
    pipeline::run(&looping, &VideoCapability::unavailable("gif")).unwrap();
    let bytes = fs::read(dir.path().join("loop.gif")).unwrap();
    assert!(bytes.starts_with(b"GIF89a"));
    assert!(contains(&bytes, b"NETSCAPE2.0"));

    let mut once = small_job(dir.path());
    once.scroll_mode = ScrollMode::SinglePass;
    once.output_path = Some(dir.path().join("once.gif"));
    pipeline::run(&once, &VideoCapability::unavailable("gif")).unwrap();
    let bytes = fs::read(dir.path().join("once.gif")).unwrap();
    assert!(!contains(&bytes, b"NETSCAPE2.0"));
    // single pass ends on the last scroll step: 5 + 12 frames, 5 of them merged
    assert_eq!(decode_gif(&dir.path().join("once.gif")).delays.len(), 13);
}

#[test]
fn video_without_capability_falls_back_to_gif() {
    let dir = tempdir().unwrap();
    let mut config = small_job(dir.path());
    config.output_format = OutputFormat::Mp4;
    config.output_path = Some(dir.path().join("clip.mp4"));

    let summary = pipeline::run(&config, &VideoCapability::unavailable("ffmpeg not found"))
        .expect("fallback render should succeed");
    assert!(summary.fell_back);
    assert_eq!(summary.encoder, EncoderKind::Gif);
    assert_eq!(summary.output_path, dir.path().join("clip.gif"));
    assert!(!dir.path().join("clip.mp4").exists());

    let bytes = fs::read(dir.path().join("clip.gif")).unwrap();
    assert!(bytes.starts_with(b"GIF89a"));
}

#[test]
fn default_output_sits_next_to_source() {
    let dir = tempdir().unwrap();
    let config = small_job(dir.path());
    let summary = pipeline::run(&config, &VideoCapability::unavailable("gif")).unwrap();
    assert_eq!(summary.output_path, dir.path().join("page_scroll.gif"));
    assert!(summary.output_path.is_file());
}

#[test]
fn empty_sequence_is_rejected_before_writing() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("empty.gif");
    let frames = FrameSequence::new(
        WindowGeometry {
            width: 8,
            height: 8,
        },
        Vec::new(),
    );

    let error = encode_frames(
        &frames,
        OutputFormat::Gif,
        &EncodeSettings::new(24, ScrollMode::Down),
        &output,
        &VideoCapability::unavailable("gif"),
    )
    .unwrap_err();
    assert_eq!(
        find_coded_error(&error).map(|coded| coded.kind),
        Some(CodedErrorKind::NoFrames)
    );
    assert!(!output.exists());
    assert!(!partial_path(&output).exists());
}

#[test]
fn unwritable_destination_reports_encode_failure() {
    let dir = tempdir().unwrap();
    let mut config = small_job(dir.path());
    let output = dir.path().join("missing-dir").join("page.gif");
    config.output_path = Some(output.clone());

    let error = pipeline::run(&config, &VideoCapability::unavailable("gif")).unwrap_err();
    assert_eq!(
        find_coded_error(&error).map(|coded| coded.kind),
        Some(CodedErrorKind::EncodeFailed)
    );
    assert!(!output.exists());
    assert!(!partial_path(&output).exists());
}

#[test]
fn background_render_joins_with_summary() {
    let dir = tempdir().unwrap();
    let mut config = small_job(dir.path());
    config.scroll_mode = ScrollMode::RoundTrip;
    config.output_path = Some(dir.path().join("bg.gif"));

    let handle = spawn_render(config, VideoCapability::unavailable("gif")).unwrap();
    let summary = handle
        .join()
        .expect("render thread should not panic")
        .expect("render should succeed");
    // 5 + 12 + 5 + 12
    assert_eq!(summary.frame_count, 34);
    assert!(summary.output_path.is_file());
}

/// Stand-in for ffmpeg: reads every raw frame from stdin, then runs `tail`
/// with the output path (the last argument) as `$out`.
#[cfg(unix)]
fn fake_ffmpeg(dir: &Path, name: &str, tail: &str) -> VideoCapability {
    use std::os::unix::fs::PermissionsExt;

    let script = dir.join(name);
    fs::write(
        &script,
        format!("#!/bin/sh\nfor out in \"$@\"; do :; done\nbytes=$(wc -c | tr -d ' ')\n{tail}\n"),
    )
    .unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    VideoCapability::Available {
        ffmpeg: script,
        source: "system",
    }
}

#[cfg(unix)]
#[test]
fn video_encoder_streams_every_frame_to_ffmpeg() {
    let dir = tempdir().unwrap();
    let capability = fake_ffmpeg(dir.path(), "ffmpeg-ok", "printf '%s' \"$bytes\" > \"$out\"");
    let mut config = small_job(dir.path());
    config.output_format = OutputFormat::Mp4;
    config.output_path = Some(dir.path().join("clip.mp4"));

    let summary = pipeline::run(&config, &capability).expect("video render should succeed");
    assert_eq!(summary.encoder, EncoderKind::Video);
    assert!(!summary.fell_back);
    assert_eq!(summary.output_path, dir.path().join("clip.mp4"));
    assert!(!partial_path(&summary.output_path).exists());

    // 22 raw rgb24 frames of 64x64
    let written = fs::read_to_string(&summary.output_path).unwrap();
    assert_eq!(written, (22 * 64 * 64 * 3).to_string());
    assert_eq!(summary.bytes, written.len() as u64);
}

#[cfg(unix)]
#[test]
fn video_to_bare_path_is_written_as_mp4() {
    let dir = tempdir().unwrap();
    let capability = fake_ffmpeg(dir.path(), "ffmpeg-ok", "printf video > \"$out\"");
    let mut config = small_job(dir.path());
    config.output_format = OutputFormat::Mp4;
    config.output_path = Some(dir.path().join("clip"));

    let summary = pipeline::run(&config, &capability).unwrap();
    assert_eq!(summary.output_path, dir.path().join("clip.mp4"));
    assert_eq!(fs::read(&summary.output_path).unwrap(), b"video");
}

#[cfg(unix)]
#[test]
fn failing_ffmpeg_reports_encode_failure_and_cleans_up() {
    let dir = tempdir().unwrap();
    let capability = fake_ffmpeg(
        dir.path(),
        "ffmpeg-fail",
        "printf junk > \"$out\"\necho 'Unknown encoder libx264' >&2\nexit 1",
    );
    let mut config = small_job(dir.path());
    config.output_format = OutputFormat::Mp4;
    let output = dir.path().join("clip.mp4");
    config.output_path = Some(output.clone());

    let error = pipeline::run(&config, &capability).unwrap_err();
    assert_eq!(
        find_coded_error(&error).map(|coded| coded.kind),
        Some(CodedErrorKind::EncodeFailed)
    );
    assert!(format!("{error:#}").contains("Unknown encoder libx264"));
    assert!(!output.exists());
    assert!(!partial_path(&output).exists());
    assert!(!dir.path().join("clip.gif").exists());
}
