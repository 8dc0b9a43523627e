use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error_codes::CodedError;

pub const DEFAULT_WIDTH: u32 = 800;
pub const DEFAULT_SCROLL_SPEED: u32 = 8;
pub const DEFAULT_FRAMERATE: u32 = 24;
pub const DEFAULT_PAUSE_SECONDS: f64 = 2.0;
pub const DEFAULT_QUALITY: f64 = 0.8;
pub const DEFAULT_WATERMARK_TEXT: &str = "Created with Scrollify";

/// How the window height is derived from the output width.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AspectMode {
    /// Keep the source image's own aspect ratio.
    Source,
    /// Use the explicit `output_height`.
    Custom,
    /// A `w:h` token such as `16:9`. Parsed lazily so a malformed token can
    /// degrade to the default ratio instead of failing the run.
    Ratio(String),
}

impl AspectMode {
    pub fn keyword(&self) -> &str {
        match self {
            Self::Source => "source",
            Self::Custom => "custom",
            Self::Ratio(token) => token.as_str(),
        }
    }
}

impl Default for AspectMode {
    fn default() -> Self {
        Self::Ratio("16:9".to_owned())
    }
}

impl From<String> for AspectMode {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "source" => Self::Source,
            "custom" => Self::Custom,
            _ => Self::Ratio(value.trim().to_owned()),
        }
    }
}

impl From<AspectMode> for String {
    fn from(value: AspectMode) -> Self {
        value.keyword().to_owned()
    }
}

impl FromStr for AspectMode {
    type Err = std::convert::Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(value.to_owned()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
pub enum ScrollMode {
    /// Scroll to the bottom, hold at both ends, loop forever.
    #[default]
    #[serde(rename = "down")]
    #[value(name = "down")]
    Down,
    /// Scroll down, hold, then scroll back up to the top.
    #[serde(rename = "down-up", alias = "round-trip")]
    #[value(name = "down-up", alias = "round-trip")]
    RoundTrip,
    /// Scroll down once with no bottom hold; plays a single time.
    #[serde(rename = "down-once", alias = "single-pass")]
    #[value(name = "down-once", alias = "single-pass")]
    SinglePass,
}

impl ScrollMode {
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Down => "down",
            Self::RoundTrip => "down-up",
            Self::SinglePass => "down-once",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OutputFormat {
    #[default]
    Gif,
    Mp4,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Result<Self> {
        Self::try_from(value.to_owned()).map_err(|error| anyhow!(error))
    }

    fn unsupported(value: &str) -> CodedError {
        CodedError::unsupported_format(format!("unsupported output format '{value}'"))
            .with_details(json!({
                "provided": value,
                "allowed": ["GIF", "MP4"]
            }))
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Self::Gif => "GIF",
            Self::Mp4 => "MP4",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Gif => "gif",
            Self::Mp4 => "mp4",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl TryFrom<String> for OutputFormat {
    type Error = CodedError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gif" => Ok(Self::Gif),
            "mp4" => Ok(Self::Mp4),
            _ => Err(Self::unsupported(&value)),
        }
    }
}

impl From<OutputFormat> for String {
    fn from(value: OutputFormat) -> Self {
        value.keyword().to_owned()
    }
}

/// One scroll-render job. Built by the CLI or loaded from a YAML job file,
/// validated once, then handed to the pipeline read-only.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub source_image: PathBuf,
    #[serde(default)]
    pub aspect_ratio: AspectMode,
    #[serde(default = "default_width")]
    pub output_width: u32,
    #[serde(default)]
    pub output_height: Option<u32>,
    #[serde(default = "default_scroll_speed")]
    pub scroll_speed: u32,
    #[serde(default = "default_framerate")]
    pub framerate: u32,
    #[serde(default)]
    pub scroll_mode: ScrollMode,
    #[serde(default = "default_pause")]
    pub pause_duration: f64,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default)]
    pub output_path: Option<PathBuf>,
    #[serde(default = "default_quality")]
    pub quality_factor: f64,
    #[serde(default)]
    pub add_watermark: bool,
    #[serde(default = "default_watermark_text")]
    pub watermark_text: String,
    #[serde(default)]
    pub watermark_font: Option<PathBuf>,
}

/// The one job field whose bad values carry their own error kind.
#[derive(Deserialize)]
struct FormatField {
    #[serde(default)]
    output_format: Option<String>,
}

fn default_width() -> u32 {
    DEFAULT_WIDTH
}

fn default_scroll_speed() -> u32 {
    DEFAULT_SCROLL_SPEED
}

fn default_framerate() -> u32 {
    DEFAULT_FRAMERATE
}

fn default_pause() -> f64 {
    DEFAULT_PAUSE_SECONDS
}

fn default_quality() -> f64 {
    DEFAULT_QUALITY
}

fn default_watermark_text() -> String {
    DEFAULT_WATERMARK_TEXT.to_owned()
}

impl Config {
    pub fn new(source_image: impl Into<PathBuf>) -> Self {
        Self {
            source_image: source_image.into(),
            aspect_ratio: AspectMode::default(),
            output_width: DEFAULT_WIDTH,
            output_height: None,
            scroll_speed: DEFAULT_SCROLL_SPEED,
            framerate: DEFAULT_FRAMERATE,
            scroll_mode: ScrollMode::default(),
            pause_duration: DEFAULT_PAUSE_SECONDS,
            output_format: OutputFormat::default(),
            output_path: None,
            quality_factor: DEFAULT_QUALITY,
            add_watermark: false,
            watermark_text: default_watermark_text(),
            watermark_font: None,
        }
    }

    /// Load a YAML job file. Relative paths inside it resolve against the
    /// job file's directory.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read job file {}", path.display()))?;

        if let Ok(FormatField {
            output_format: Some(raw),
        }) = serde_yaml::from_str::<FormatField>(&contents)
        {
            OutputFormat::parse(&raw)
                .with_context(|| format!("invalid output_format in job file {}", path.display()))?;
        }

        let mut config: Config = serde_yaml::from_str(&contents).map_err(|error| {
            let location = error
                .location()
                .map(|location| format!("line {}, column {}", location.line(), location.column()))
                .unwrap_or_else(|| "unknown location".to_owned());
            anyhow!(CodedError::usage(format!(
                "failed to parse job file {} at {}: {}",
                path.display(),
                location,
                error
            )))
        })?;

        let job_dir = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        config.source_image = resolve_relative(&job_dir, &config.source_image);
        config.output_path = config
            .output_path
            .as_deref()
            .map(|output| resolve_relative(&job_dir, output));
        config.watermark_font = config
            .watermark_font
            .as_deref()
            .map(|font| resolve_relative(&job_dir, font));
        Ok(config)
    }

    /// Where the finished file goes: the explicit path, or
    /// `<stem>_scroll.<ext>` next to the source image.
    pub fn output_path(&self) -> PathBuf {
        match &self.output_path {
            Some(path) => path.clone(),
            None => default_output_path(&self.source_image, self.output_format),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.validate_parameters()?;

        if !self.source_image.exists() {
            return Err(anyhow!(CodedError::source_unavailable(format!(
                "source image does not exist: {}",
                self.source_image.display()
            ))));
        }
        if !self.source_image.is_file() {
            return Err(anyhow!(CodedError::source_unavailable(format!(
                "source image is not a file: {}",
                self.source_image.display()
            ))));
        }
        Ok(())
    }

    /// Numeric and cross-field checks that do not touch the filesystem.
    pub fn validate_parameters(&self) -> Result<()> {
        if self.output_width == 0 {
            return Err(invalid("output_width must be > 0"));
        }
        if self.scroll_speed == 0 {
            return Err(invalid("scroll_speed must be > 0"));
        }
        if self.framerate == 0 {
            return Err(invalid("framerate must be > 0"));
        }
        if !self.pause_duration.is_finite() || self.pause_duration < 0.0 {
            return Err(invalid(format!(
                "pause_duration must be >= 0 seconds, got {}",
                self.pause_duration
            )));
        }
        if !self.quality_factor.is_finite()
            || self.quality_factor <= 0.0
            || self.quality_factor > 1.0
        {
            return Err(invalid(format!(
                "quality_factor must be in (0, 1], got {}",
                self.quality_factor
            )));
        }
        if self.aspect_ratio == AspectMode::Custom {
            match self.output_height {
                Some(height) if height > 0 => {}
                _ => {
                    return Err(anyhow!(CodedError::usage(
                        "aspect ratio 'custom' requires a positive output_height"
                    )
                    .with_details(json!({ "field": "output_height" }))))
                }
            }
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> anyhow::Error {
    anyhow!(CodedError::usage(message))
}

fn resolve_relative(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub fn default_output_path(source_image: &Path, format: OutputFormat) -> PathBuf {
    let stem = source_image
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_owned());
    let file_name = format!("{stem}_scroll.{}", format.extension());
    match source_image.parent() {
        Some(parent) => parent.join(file_name),
        None => PathBuf::from(file_name),
    }
}
