use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use scrollify::config::{AspectMode, Config, OutputFormat, ScrollMode};
use scrollify::encoding::{FfmpegMode, VideoCapability};
use scrollify::error_codes::{envelope_for, CodedError};
use scrollify::geometry::resolve_window_height;
use scrollify::pipeline;

#[derive(Debug, Parser)]
#[command(name = "scrollify")]
#[command(about = "Turn a tall image into a scrolling GIF or MP4")]
#[command(version = env!("SCROLLIFY_LONG_VERSION"))]
struct Cli {
    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Print results and errors as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Render the scrolling animation
    Render {
        #[command(flatten)]
        job: JobArgs,
        /// Which ffmpeg to use for MP4 output
        #[arg(long, value_enum, default_value_t = FfmpegMode::Auto)]
        ffmpeg: FfmpegMode,
    },
    /// Validate parameters and print what would be rendered
    Check {
        #[command(flatten)]
        job: JobArgs,
    },
}

#[derive(Debug, Args)]
struct JobArgs {
    /// Source image
    #[arg(required_unless_present = "config")]
    image: Option<PathBuf>,

    /// YAML job file; flags given on the command line override its values
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Output file (default: <image>_scroll.<format>)
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Output format: GIF or MP4
    #[arg(long)]
    format: Option<String>,

    /// Output width in pixels
    #[arg(short = 'w', long)]
    width: Option<u32>,

    /// Aspect ratio: 16:9, 4:3, 1:1, source or custom
    #[arg(short = 'r', long)]
    ratio: Option<String>,

    /// Window height, used with --ratio custom
    #[arg(long)]
    height: Option<u32>,

    /// Scroll speed in pixels per frame
    #[arg(short = 's', long)]
    speed: Option<u32>,

    /// Frames per second
    #[arg(long)]
    fps: Option<u32>,

    /// Scroll mode
    #[arg(short = 'm', long, value_enum)]
    mode: Option<ScrollMode>,

    /// Hold at the top and bottom, in seconds
    #[arg(short = 'p', long)]
    pause: Option<f64>,

    /// Quality factor in (0, 1]
    #[arg(short = 'q', long)]
    quality: Option<f64>,

    /// Add a watermark in the bottom-right corner
    #[arg(long)]
    watermark: bool,

    /// Watermark text
    #[arg(long)]
    watermark_text: Option<String>,

    /// TTF/OTF font for the watermark (default: a system font, else builtin)
    #[arg(long, value_name = "FILE")]
    watermark_font: Option<PathBuf>,
}

impl JobArgs {
    fn into_config(self) -> Result<Config> {
        let mut config = match (&self.config, &self.image) {
            (Some(job_file), _) => Config::from_yaml_file(job_file)?,
            (None, Some(image)) => Config::new(image.clone()),
            (None, None) => {
                return Err(anyhow!(CodedError::usage(
                    "an IMAGE argument or --config job file is required"
                )))
            }
        };

        if let (Some(_), Some(image)) = (&self.config, self.image) {
            config.source_image = image;
        }
        if let Some(format) = self.format {
            config.output_format = OutputFormat::parse(&format)?;
        }
        if let Some(output) = self.output {
            config.output_path = Some(output);
        }
        if let Some(width) = self.width {
            config.output_width = width;
        }
        if let Some(ratio) = self.ratio {
            config.aspect_ratio = AspectMode::from(ratio);
        }
        if let Some(height) = self.height {
            config.output_height = Some(height);
        }
        if let Some(speed) = self.speed {
            config.scroll_speed = speed;
        }
        if let Some(fps) = self.fps {
            config.framerate = fps;
        }
        if let Some(mode) = self.mode {
            config.scroll_mode = mode;
        }
        if let Some(pause) = self.pause {
            config.pause_duration = pause;
        }
        if let Some(quality) = self.quality {
            config.quality_factor = quality;
        }
        if self.watermark {
            config.add_watermark = true;
        }
        if let Some(text) = self.watermark_text {
            config.watermark_text = text;
        }
        if let Some(font) = self.watermark_font {
            config.watermark_font = Some(font);
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::from_default_env().add_directive(
        format!("scrollify={level}")
            .parse()
            .unwrap_or_else(|_| Level::WARN.into()),
    );
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Render { job, ffmpeg } => run_render(job, ffmpeg, cli.json),
        Commands::Check { job } => run_check(job, cli.json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            if cli.json {
                let envelope = envelope_for(&error);
                match serde_json::to_string_pretty(&envelope) {
                    Ok(text) => eprintln!("{text}"),
                    Err(_) => eprintln!("error: {error:#}"),
                }
            } else {
                eprintln!("error: {error:#}");
            }
            ExitCode::FAILURE
        }
    }
}

#[derive(Debug, Serialize)]
struct CheckReport {
    ok: bool,
    source_image: PathBuf,
    output_path: PathBuf,
    output_format: OutputFormat,
    aspect_ratio: AspectMode,
    output_width: u32,
    output_height: Option<u32>,
    window_height: Option<u32>,
    scroll_speed: u32,
    framerate: u32,
    scroll_mode: ScrollMode,
    pause_duration: f64,
    quality_factor: f64,
    watermark: Option<String>,
}

fn run_check(job: JobArgs, json_output: bool) -> Result<()> {
    let config = job.into_config()?;
    // `source` needs the image size, which check does not decode.
    let window_height =
        resolve_window_height(config.output_width, &config.aspect_ratio, config.output_height, None)
            .ok();

    let report = CheckReport {
        ok: true,
        source_image: config.source_image.clone(),
        output_path: config.output_path(),
        output_format: config.output_format,
        aspect_ratio: config.aspect_ratio.clone(),
        output_width: config.output_width,
        output_height: config.output_height,
        window_height,
        scroll_speed: config.scroll_speed,
        framerate: config.framerate,
        scroll_mode: config.scroll_mode,
        pause_duration: config.pause_duration,
        quality_factor: config.quality_factor,
        watermark: config
            .add_watermark
            .then(|| config.watermark_text.clone()),
    };

    if json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("OK: {}", report.source_image.display());
    println!("Output: {} ({})", report.output_path.display(), report.output_format);
    match report.window_height {
        Some(height) => println!(
            "Window: {}x{} (ratio {})",
            report.output_width,
            height,
            report.aspect_ratio.keyword()
        ),
        None => println!(
            "Window: {} wide (ratio {})",
            report.output_width,
            report.aspect_ratio.keyword()
        ),
    }
    println!(
        "Scroll: {} px/frame at {} fps, mode {}, pause {}s",
        report.scroll_speed,
        report.framerate,
        report.scroll_mode.keyword(),
        report.pause_duration
    );
    println!("Quality: {}", report.quality_factor);
    match &report.watermark {
        Some(text) => println!("Watermark: {text}"),
        None => println!("Watermark: none"),
    }
    Ok(())
}

fn run_render(job: JobArgs, ffmpeg: FfmpegMode, json_output: bool) -> Result<()> {
    let config = job.into_config()?;
    let capability = match config.output_format {
        OutputFormat::Mp4 => VideoCapability::probe(ffmpeg),
        OutputFormat::Gif => VideoCapability::unavailable("not needed for GIF output"),
    };

    let summary = pipeline::run(&config, &capability)?;

    if json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "ok": true, "result": summary }))?
        );
        return Ok(());
    }

    if summary.fell_back {
        println!("ffmpeg unavailable; wrote GIF instead of MP4");
    }
    println!(
        "Wrote {} ({:.2} MB, {} frames, {}x{})",
        summary.output_path.display(),
        summary.bytes as f64 / (1024.0 * 1024.0),
        summary.frame_count,
        summary.width,
        summary.height
    );
    Ok(())
}
