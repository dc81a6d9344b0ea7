use clap::Parser;
use picdate::batch::{self, BatchOutcome, BatchRequest, CancelFlag};
use picdate::config::{self, AnnotationConfig, ConfigError, TextSizeSetting};
use picdate::imaging::{Rgb, RustBackend};
use picdate::{font, output};
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const EXIT_CONFIG_ERROR: u8 = 1;
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser)]
#[command(name = "picdate")]
#[command(about = "Stamp each photo's capture date onto the image, film-camera style")]
#[command(long_about = "\
Stamp each photo's capture date onto the image, film-camera style

The date comes from the EXIF DateTimeOriginal tag, or the file's modification
time when the image has none. Stamped copies are written to the destination;
sources are never modified.

  picdate -s photos/                 # photos/*.jpg → picdate_result/*.jpg
  picdate -s photos/ -r -d stamped/  # mirror the whole tree into stamped/
  picdate -s a.jpg -d a_dated.jpg    # one file

Settings are layered: built-in defaults, then --config FILE, then flags.
Run 'picdate --gen-config' for a documented config file.")]
#[command(version)]
struct Cli {
    /// Source image or directory
    #[arg(short, long, required_unless_present = "gen_config")]
    src: Option<PathBuf>,

    /// Destination file or directory
    #[arg(short, long, default_value = "./picdate_result/")]
    dst: PathBuf,

    /// Overwrite existing outputs
    #[arg(short, long)]
    force: bool,

    /// Descend into subdirectories of the source
    #[arg(short, long)]
    recursive: bool,

    /// Worker threads [default: number of cores]
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Seconds to wait for each image before giving up on it
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// TOML settings file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Local TrueType font to use instead of the downloaded one
    #[arg(long, value_name = "FILE")]
    font: Option<PathBuf>,

    /// Print a documented stock config file and exit
    #[arg(long)]
    gen_config: bool,

    /// strftime pattern for the stamp, e.g. "`%y %-m %-d"
    #[arg(long)]
    format: Option<String>,

    /// Stamp color as "(r,g,b)"
    #[arg(long = "text_color", value_name = "RGB")]
    text_color: Option<String>,

    /// Outline color as "(r,g,b)"
    #[arg(long = "stroke_color", value_name = "RGB")]
    stroke_color: Option<String>,

    /// Outline width in pixels (0 disables the outline)
    #[arg(long = "stroke_width", value_name = "PX")]
    stroke_width: Option<u32>,

    /// Stamp height in millimetres on a 6x4 print, or "proportional"
    #[arg(long = "text_size", value_name = "MM")]
    text_size: Option<String>,

    /// Two-letter anchor: horizontal l/m/r, vertical a/t/m/s/d/b
    #[arg(long = "text_anchor", value_name = "XY")]
    text_anchor: Option<String>,

    /// Horizontal position as a fraction of the width
    #[arg(long = "pos_x", alias = "pos_w", value_name = "FRACTION")]
    pos_x: Option<f64>,

    /// Vertical position as a fraction of the height
    #[arg(long = "pos_y", alias = "pos_h", value_name = "FRACTION")]
    pos_y: Option<f64>,

    /// Paper ratio the print lab crops to ("2/3"), or "none"
    #[arg(long = "fine_tune_aspect_ratio", value_name = "M/N")]
    fine_tune_aspect_ratio: Option<String>,

    /// JPEG quality (1-100)
    #[arg(long)]
    quality: Option<u32>,

    /// Comma-separated extensions to pick up in directory mode
    #[arg(long = "img_exts", value_name = "LIST")]
    img_exts: Option<String>,
}

impl Cli {
    /// Flags that were given, as a TOML overlay for [`config::load_config`].
    fn overrides(&self) -> Result<toml::Value, ConfigError> {
        let mut text = toml::Table::new();
        if let Some(format) = &self.format {
            text.insert("format".into(), format.as_str().into());
        }
        if let Some(size) = &self.text_size {
            let size = match config::parse_text_size(size)? {
                TextSizeSetting::Millimeters(mm) => toml::Value::from(mm),
                TextSizeSetting::Keyword(_) => toml::Value::from("proportional"),
            };
            text.insert("size".into(), size);
        }
        if let Some(color) = &self.text_color {
            text.insert("color".into(), rgb_value(config::parse_rgb(color)?));
        }
        if let Some(color) = &self.stroke_color {
            text.insert("stroke_color".into(), rgb_value(config::parse_rgb(color)?));
        }
        if let Some(width) = self.stroke_width {
            text.insert("stroke_width".into(), i64::from(width).into());
        }

        let mut layout = toml::Table::new();
        if let Some(anchor) = &self.text_anchor {
            layout.insert("anchor".into(), anchor.as_str().into());
        }
        if let Some(x) = self.pos_x {
            layout.insert("pos_x".into(), x.into());
        }
        if let Some(y) = self.pos_y {
            layout.insert("pos_y".into(), y.into());
        }
        if let Some(ratio) = &self.fine_tune_aspect_ratio {
            layout.insert("fine_tune_aspect_ratio".into(), ratio.as_str().into());
        }

        let mut out = toml::Table::new();
        if let Some(quality) = self.quality {
            out.insert("quality".into(), i64::from(quality).into());
        }
        if let Some(exts) = &self.img_exts {
            let exts: Vec<toml::Value> = config::parse_extensions(exts)
                .into_iter()
                .map(toml::Value::from)
                .collect();
            out.insert("extensions".into(), exts.into());
        }

        let mut processing = toml::Table::new();
        if let Some(jobs) = self.jobs {
            processing.insert("jobs".into(), saturating_i64(jobs as u64).into());
        }
        if let Some(secs) = self.timeout {
            processing.insert("task_timeout_secs".into(), saturating_i64(secs).into());
        }

        let mut root = toml::Table::new();
        for (key, table) in [
            ("text", text),
            ("layout", layout),
            ("output", out),
            ("processing", processing),
        ] {
            if !table.is_empty() {
                root.insert(key.into(), table.into());
            }
        }
        Ok(toml::Value::Table(root))
    }
}

fn rgb_value(rgb: Rgb) -> toml::Value {
    toml::Value::Array(rgb.iter().map(|c| toml::Value::from(i64::from(*c))).collect())
}

fn saturating_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if cli.gen_config {
        print!("{}", config::stock_config_toml());
        return ExitCode::SUCCESS;
    }
    init_tracing();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", output::format_error_chain(e.as_ref()));
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<ExitCode, Box<dyn Error>> {
    let settings = config::load_config(cli.config.as_deref(), cli.overrides()?)?;
    let font_path = font::ensure_font(cli.font.as_deref(), |path| {
        println!("Downloading stamp font to {}", path.display());
    })?;
    let annotation = AnnotationConfig::from_settings(&settings, font_path)?;

    let request = BatchRequest {
        source: cli.src.ok_or("--src is required")?,
        destination: cli.dst,
        recursive: cli.recursive,
        overwrite: cli.force,
        jobs: config::effective_jobs(&settings.processing),
        task_timeout: settings.processing.task_timeout(),
    };

    let cancel = CancelFlag::new();
    spawn_interrupt_listener(cancel.clone());

    let (tx, rx) = std::sync::mpsc::channel();
    let printer = std::thread::spawn(move || {
        for event in rx {
            for line in output::format_event(&event) {
                println!("{}", line);
            }
        }
    });
    let outcome = batch::run(
        &request,
        Arc::new(annotation),
        Arc::new(RustBackend::new()),
        &cancel,
        Some(tx),
    );
    printer.join().map_err(|_| "output thread panicked")?;
    let outcome = outcome?;

    println!();
    println!("{}", output::format_summary(&outcome));
    Ok(match outcome {
        BatchOutcome::Completed(_) => ExitCode::SUCCESS,
        BatchOutcome::Cancelled(_) => ExitCode::from(EXIT_CANCELLED),
    })
}

/// Ctrl-C raises the cancel flag instead of killing the process, so the
/// coordinator can report what finished before exiting.
fn spawn_interrupt_listener(cancel: CancelFlag) {
    let spawned = std::thread::Builder::new()
        .name("picdate-signal".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    tracing::warn!(error = %e, "interrupt handling unavailable");
                    return;
                }
            };
            runtime.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        tracing::info!("interrupt received, cancelling");
                        cancel.cancel();
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to listen for Ctrl-C"),
                }
            });
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "failed to start interrupt listener");
    }
}
