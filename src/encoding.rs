use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{OutputFormat, ScrollMode};
use crate::error_codes::{CodedError, CodedErrorKind};
use crate::scheduler::FrameSequence;

/// NeuQuant sampling speed passed to the GIF quantiser (1 = best, 30 = fastest).
pub const GIF_QUANTIZE_SPEED: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum FfmpegMode {
    /// System ffmpeg, then the sidecar binary when built with `sidecar_ffmpeg`.
    #[default]
    Auto,
    System,
    Sidecar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKind {
    Gif,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopMode {
    Infinite,
    Once,
}

impl LoopMode {
    pub fn for_scroll_mode(mode: ScrollMode) -> Self {
        match mode {
            ScrollMode::SinglePass => Self::Once,
            ScrollMode::Down | ScrollMode::RoundTrip => Self::Infinite,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeSettings {
    pub fps: u32,
    pub loop_mode: LoopMode,
}

impl EncodeSettings {
    pub fn new(fps: u32, scroll_mode: ScrollMode) -> Self {
        Self {
            fps,
            loop_mode: LoopMode::for_scroll_mode(scroll_mode),
        }
    }

    /// Per-frame display time, `round(1000 / fps)` milliseconds.
    pub fn frame_duration_ms(&self) -> u32 {
        (1000.0 / f64::from(self.fps.max(1))).round() as u32
    }
}

/// Whether a video encoder can run in this environment. Probed once per run,
/// before anything is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoCapability {
    Available { ffmpeg: PathBuf, source: &'static str },
    Unavailable { reason: String },
}

impl VideoCapability {
    pub fn probe(mode: FfmpegMode) -> Self {
        let capability = match mode {
            FfmpegMode::System => probe_system(),
            FfmpegMode::Sidecar => probe_sidecar(),
            FfmpegMode::Auto => match probe_system() {
                available @ Self::Available { .. } => available,
                Self::Unavailable { reason } => match probe_sidecar() {
                    available @ Self::Available { .. } => available,
                    Self::Unavailable { reason: sidecar } => Self::Unavailable {
                        reason: format!("{reason}; {sidecar}"),
                    },
                },
            },
        };
        debug!(?capability, "video capability probed");
        capability
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }
}

fn probe_system() -> VideoCapability {
    probe_binary(Path::new("ffmpeg"), "system")
}

#[cfg(feature = "sidecar_ffmpeg")]
fn probe_sidecar() -> VideoCapability {
    let path = ffmpeg_sidecar::paths::ffmpeg_path();
    if !path.exists() {
        if let Err(error) = ffmpeg_sidecar::download::auto_download() {
            return VideoCapability::unavailable(format!(
                "failed to auto-download ffmpeg sidecar binary: {error}"
            ));
        }
    }
    probe_binary(&path, "sidecar")
}

#[cfg(not(feature = "sidecar_ffmpeg"))]
fn probe_sidecar() -> VideoCapability {
    VideoCapability::unavailable(
        "sidecar ffmpeg requested but scrollify was built without `sidecar_ffmpeg`",
    )
}

fn probe_binary(path: &Path, source: &'static str) -> VideoCapability {
    let status = Command::new(path)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match status {
        Ok(status) if status.success() => VideoCapability::Available {
            ffmpeg: path.to_path_buf(),
            source,
        },
        Ok(status) => VideoCapability::unavailable(format!(
            "{} -version exited with {status}",
            path.display()
        )),
        Err(error) if error.kind() == ErrorKind::NotFound => {
            VideoCapability::unavailable(format!("{} not found", path.display()))
        }
        Err(error) => VideoCapability::unavailable(format!(
            "failed to run {}: {error}",
            path.display()
        )),
    }
}

/// Writes a frame sequence into one container file.
trait FrameEncoder {
    fn kind(&self) -> EncoderKind;
    fn write(&self, frames: &FrameSequence, settings: &EncodeSettings, path: &Path) -> Result<()>;
}

struct GifEncoder;

struct VideoEncoder {
    ffmpeg: PathBuf,
    source: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodedOutput {
    pub path: PathBuf,
    pub bytes: u64,
    pub kind: EncoderKind,
    /// Video was requested but the GIF encoder was used instead.
    pub fell_back: bool,
}

/// Pick the encoder for `format` and where it writes. Video without a
/// capability falls back to GIF at `<requested>.gif`; video to a path with
/// no extension writes `<requested>.mp4`.
fn select_encoder(
    format: OutputFormat,
    capability: &VideoCapability,
    requested: &Path,
) -> (Box<dyn FrameEncoder>, PathBuf, bool) {
    match (format, capability) {
        (OutputFormat::Gif, _) => (Box::new(GifEncoder), requested.to_path_buf(), false),
        (OutputFormat::Mp4, VideoCapability::Available { ffmpeg, source }) => {
            let path = if requested.extension().is_none() {
                requested.with_extension(OutputFormat::Mp4.extension())
            } else {
                requested.to_path_buf()
            };
            (
                Box::new(VideoEncoder {
                    ffmpeg: ffmpeg.clone(),
                    source: *source,
                }),
                path,
                false,
            )
        }
        (OutputFormat::Mp4, VideoCapability::Unavailable { reason }) => {
            let fallback = requested.with_extension("gif");
            warn!(
                code = CodedErrorKind::EncodingCapabilityUnavailable.code(),
                reason = %reason,
                output = %fallback.display(),
                "video encoding unavailable, writing GIF instead"
            );
            (Box::new(GifEncoder), fallback, true)
        }
    }
}

pub fn encode_frames(
    frames: &FrameSequence,
    format: OutputFormat,
    settings: &EncodeSettings,
    output_path: &Path,
    capability: &VideoCapability,
) -> Result<EncodedOutput> {
    if frames.is_empty() {
        return Err(anyhow!(CodedError::no_frames(
            "no frames were generated; nothing to encode"
        )));
    }

    let (encoder, path, fell_back) = select_encoder(format, capability, output_path);
    let partial = partial_path(&path);
    info!(
        encoder = ?encoder.kind(),
        frames = frames.len(),
        output = %path.display(),
        "encoding"
    );

    if let Err(error) = encoder.write(frames, settings, &partial) {
        let _ = fs::remove_file(&partial);
        return Err(anyhow!(CodedError::new(
            CodedErrorKind::EncodeFailed,
            format!("failed to write {}: {error:#}", path.display()),
        )));
    }
    if let Err(error) = fs::rename(&partial, &path) {
        let _ = fs::remove_file(&partial);
        return Err(anyhow!(error).context(format!(
            "failed to move finished output into place at {}",
            path.display()
        )));
    }

    let bytes = fs::metadata(&path)
        .with_context(|| format!("failed to stat output {}", path.display()))?
        .len();
    info!(bytes, output = %path.display(), "output written");

    Ok(EncodedOutput {
        path,
        bytes,
        kind: encoder.kind(),
        fell_back,
    })
}

/// Hidden sibling of `path` that keeps its extension, e.g. `.out.partial.gif`.
pub fn partial_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_owned());
    let name = match path.extension() {
        Some(ext) => format!(".{stem}.partial.{}", ext.to_string_lossy()),
        None => format!(".{stem}.partial"),
    };
    path.with_file_name(name)
}

impl FrameEncoder for GifEncoder {
    fn kind(&self) -> EncoderKind {
        EncoderKind::Gif
    }

    fn write(&self, frames: &FrameSequence, settings: &EncodeSettings, path: &Path) -> Result<()> {
        let geometry = frames.geometry();
        let width = u16::try_from(geometry.width)
            .map_err(|_| anyhow!("GIF width {} exceeds 65535", geometry.width))?;
        let height = u16::try_from(geometry.height)
            .map_err(|_| anyhow!("GIF height {} exceeds 65535", geometry.height))?;

        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        let mut encoder = gif::Encoder::new(BufWriter::new(file), width, height, &[])
            .context("failed to start GIF stream")?;
        if settings.loop_mode == LoopMode::Infinite {
            encoder
                .set_repeat(gif::Repeat::Infinite)
                .context("failed to write GIF loop extension")?;
        }

        let runs = merge_identical_runs(frames, settings.frame_duration_ms());
        debug!(
            frames = frames.len(),
            gif_frames = runs.len(),
            "merged identical consecutive frames"
        );

        for (index, duration_ms) in runs {
            let image = &frames.frames()[index];
            let mut frame =
                gif::Frame::from_rgb_speed(width, height, image.as_raw(), GIF_QUANTIZE_SPEED);
            frame.delay = gif_delay_cs(duration_ms);
            frame.dispose = gif::DisposalMethod::Background;
            encoder
                .write_frame(&frame)
                .with_context(|| format!("failed to write GIF frame {index}"))?;
        }

        let mut writer = encoder
            .into_inner()
            .context("failed to finish GIF stream")?;
        writer.flush().context("failed to flush GIF output")?;
        Ok(())
    }
}

/// `(first_index, total_duration_ms)` for each run of identical frames.
fn merge_identical_runs(frames: &FrameSequence, duration_ms: u32) -> Vec<(usize, u32)> {
    let stored = frames.frames();
    let mut runs: Vec<(usize, u32)> = Vec::new();
    for (index, frame) in stored.iter().enumerate() {
        if let Some((first, total)) = runs.last_mut() {
            let head = &stored[*first];
            if std::sync::Arc::ptr_eq(head, frame) || head.as_raw() == frame.as_raw() {
                *total = total.saturating_add(duration_ms);
                continue;
            }
        }
        runs.push((index, duration_ms));
    }
    runs
}

fn gif_delay_cs(duration_ms: u32) -> u16 {
    ((duration_ms + 5) / 10).clamp(1, u32::from(u16::MAX)) as u16
}

impl FrameEncoder for VideoEncoder {
    fn kind(&self) -> EncoderKind {
        EncoderKind::Video
    }

    fn write(&self, frames: &FrameSequence, settings: &EncodeSettings, path: &Path) -> Result<()> {
        let geometry = frames.geometry();
        let size = format!("{}x{}", geometry.width, geometry.height);
        let args = ffmpeg_args(&size, settings.fps, path);

        let mut child = Command::new(&self.ffmpeg)
            .args(args.iter().map(String::as_str))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| {
                anyhow!(
                    "failed to spawn ffmpeg (source={}, resolved_path={}): {error}",
                    self.source,
                    self.ffmpeg.display()
                )
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("failed to capture ffmpeg stdin"))?;
        let mut stderr_pipe = child.stderr.take();

        let mut write_result = Ok(());
        for (index, frame) in frames.iter().enumerate() {
            if let Err(error) = stdin.write_all(frame.as_raw()) {
                write_result = Err(anyhow!(error).context(format!(
                    "failed to write frame {index} to ffmpeg stdin"
                )));
                break;
            }
        }
        if write_result.is_ok() {
            write_result = stdin.flush().context("failed to flush ffmpeg stdin");
        }
        drop(stdin);

        let status = child.wait().context("failed waiting for ffmpeg process")?;
        let stderr_tail = read_stderr_tail(&mut stderr_pipe)?;
        if !status.success() {
            bail!(
                "ffmpeg failed with status {status} (source={}, args='{}', stderr_tail='{}')",
                self.source,
                args.join(" "),
                stderr_tail
            );
        }
        write_result
    }
}

pub fn ffmpeg_args(size: &str, fps: u32, output_path: &Path) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_owned(),
        "-loglevel".to_owned(),
        "error".to_owned(),
        "-y".to_owned(),
        "-f".to_owned(),
        "rawvideo".to_owned(),
        "-pix_fmt".to_owned(),
        "rgb24".to_owned(),
        "-s:v".to_owned(),
        size.to_owned(),
        "-r".to_owned(),
        fps.to_string(),
        "-i".to_owned(),
        "-".to_owned(),
        "-an".to_owned(),
    ];
    let container = video_container(output_path);
    args.extend(ffmpeg_codec_args(container));
    // The partial file's extension does not always name a muxer ffmpeg knows.
    args.push("-f".to_owned());
    args.push(container.to_owned());
    args.push(output_path.to_string_lossy().into_owned());
    args
}

/// Muxer for `output_path`: QuickTime for `.mov`, MP4 for everything else.
fn video_container(output_path: &Path) -> &'static str {
    let is_mov = output_path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("mov"));
    if is_mov {
        "mov"
    } else {
        "mp4"
    }
}

fn ffmpeg_codec_args(container: &str) -> Vec<String> {
    let codec: &[&str] = if container == "mov" {
        &["-c:v", "prores_ks", "-profile:v", "2", "-pix_fmt", "yuv422p10le"]
    } else {
        &[
            "-vf",
            "pad=ceil(iw/2)*2:ceil(ih/2)*2",
            "-c:v",
            "libx264",
            "-preset",
            "medium",
            "-crf",
            "18",
            "-pix_fmt",
            "yuv420p",
            "-movflags",
            "+faststart",
        ]
    };
    codec.iter().map(|arg| (*arg).to_owned()).collect()
}

fn read_stderr_tail(stderr: &mut Option<std::process::ChildStderr>) -> Result<String> {
    let Some(mut pipe) = stderr.take() else {
        return Ok(String::new());
    };
    let mut buf = Vec::new();
    pipe.read_to_end(&mut buf)
        .context("failed reading ffmpeg stderr")?;
    let text = String::from_utf8_lossy(&buf).to_string();
    Ok(last_n_chars(&text, 500))
}

fn last_n_chars(s: &str, max_chars: usize) -> String {
    let chars = s.chars().collect::<Vec<_>>();
    let start = chars.len().saturating_sub(max_chars);
    chars[start..].iter().collect::<String>().trim().to_owned()
}
