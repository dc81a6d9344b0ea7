//! Stamp configuration module.
//!
//! Handles loading, validating, and merging settings. Configuration is
//! layered: stock defaults are overridden by an optional `--config` TOML file,
//! which is in turn overridden by command-line flags. All three layers are
//! merged as raw TOML values and deserialized once, so a flag and a file key
//! always mean the same thing.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [text]
//! format = "`%y %-m %-d"      # strftime pattern (chrono syntax)
//! size = 4.24                 # millimetres on a 6x4 inch print, or "proportional"
//! color = [255, 149, 21]
//! stroke_color = [242, 97, 0]
//! stroke_width = 1
//!
//! [layout]
//! anchor = "rb"               # [lmr][atmsbd]
//! pos_x = 0.94                # fraction of the (cropped) width
//! pos_y = 0.94                # fraction of the (cropped) height
//! fine_tune_aspect_ratio = "2/3"  # print crop to compensate, or "none"
//!
//! [output]
//! quality = 95
//! extensions = ["jpg", "jpeg", "png", "tiff"]
//!
//! [processing]
//! jobs = 4                    # omit for auto = CPU cores
//! task_timeout_secs = 10
//! ```
//!
//! Unknown keys are rejected to catch typos early.
//!
//! The runtime value handed to workers is [`AnnotationConfig`]: parsed,
//! validated and immutable.

use crate::date::validate_date_format;
use crate::imaging::{Quality, Rgb, TextAnchor, supported_input_extensions};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Stamp settings loaded from TOML and command-line flags.
///
/// All fields have defaults. Config files need only specify the values they
/// want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StampConfig {
    /// What the stamp says and how it looks.
    pub text: TextConfig,
    /// Where the stamp goes.
    pub layout: LayoutConfig,
    /// Encoding and file selection.
    pub output: OutputConfig,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TextConfig {
    pub format: String,
    pub size: TextSizeSetting,
    pub color: Rgb,
    pub stroke_color: Rgb,
    pub stroke_width: u32,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            format: "`%y %-m %-d".to_string(),
            size: TextSizeSetting::Millimeters(DEFAULT_TEXT_SIZE_MM),
            color: [255, 149, 21],
            stroke_color: [242, 97, 0],
            stroke_width: 1,
        }
    }
}

/// Default stamp height on a 6x4 inch print.
pub const DEFAULT_TEXT_SIZE_MM: f64 = 4.24;

/// `text.size` as written in TOML: a number of millimetres or a keyword.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextSizeSetting {
    Millimeters(f64),
    Keyword(TextSizeKeyword),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextSizeKeyword {
    Proportional,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LayoutConfig {
    pub anchor: String,
    pub pos_x: f64,
    pub pos_y: f64,
    pub fine_tune_aspect_ratio: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            anchor: TextAnchor::default().to_string(),
            pos_x: 0.94,
            pos_y: 0.94,
            fine_tune_aspect_ratio: "2/3".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub quality: u32,
    pub extensions: Vec<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            quality: Quality::default().value(),
            extensions: ["jpg", "jpeg", "png", "tiff"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Number of worker threads.
    /// When absent, defaults to the number of CPU cores.
    pub jobs: Option<usize>,
    /// Per-task wait before a result is reported as timed out.
    pub task_timeout_secs: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            jobs: None,
            task_timeout_secs: 10,
        }
    }
}

impl ProcessingConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

/// Resolve the effective worker count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → exactly `n`
pub fn effective_jobs(config: &ProcessingConfig) -> usize {
    config.jobs.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    })
}

impl StampConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_date_format(&self.text.format)
            .map_err(|e| ConfigError::Validation(format!("text.format: {e}")))?;
        text_size(self.text.size)?;
        self.layout
            .anchor
            .parse::<TextAnchor>()
            .map_err(|e| ConfigError::Validation(format!("layout.anchor: {e}")))?;
        for (key, value) in [("pos_x", self.layout.pos_x), ("pos_y", self.layout.pos_y)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Validation(format!(
                    "layout.{key} must be between 0 and 1, got {value}"
                )));
            }
        }
        parse_aspect_ratio(&self.layout.fine_tune_aspect_ratio)?;
        if !(1..=100).contains(&self.output.quality) {
            return Err(ConfigError::Validation(
                "output.quality must be 1-100".into(),
            ));
        }
        if self.output.extensions.iter().all(|e| normalize_extension(e).is_empty()) {
            return Err(ConfigError::Validation(
                "output.extensions must not be empty".into(),
            ));
        }
        let supported = supported_input_extensions();
        for ext in self.output.extensions.iter().map(|e| normalize_extension(e)) {
            if !ext.is_empty() && !supported.contains(&ext.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "output.extensions: '{ext}' cannot be stamped (supported: {})",
                    supported.join(", ")
                )));
            }
        }
        if self.processing.jobs == Some(0) {
            return Err(ConfigError::Validation(
                "processing.jobs must be at least 1".into(),
            ));
        }
        if self.processing.task_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "processing.task_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Runtime configuration
// =============================================================================

/// How the font size follows the image size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TextSize {
    /// `max(w, h) / 36` pixels.
    Proportional,
    /// Physical height on a 6x4 inch print whose long edge is the image's long edge.
    Millimeters(f64),
}

/// Print-lab crop to compensate for, as the short:long ratio `m/n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AspectRatio {
    pub m: u32,
    pub n: u32,
}

impl AspectRatio {
    /// Short edge over long edge, always in `(0, 1]`.
    pub fn value(&self) -> f64 {
        f64::from(self.m) / f64::from(self.n)
    }
}

impl std::fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.m, self.n)
    }
}

/// Everything a worker needs, parsed and validated. Shared read-only.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationConfig {
    pub date_format: String,
    pub text_color: Rgb,
    pub stroke_color: Rgb,
    pub stroke_width: u32,
    pub text_anchor: TextAnchor,
    pub pos_x: f64,
    pub pos_y: f64,
    pub text_size: TextSize,
    pub fine_tune_aspect_ratio: Option<AspectRatio>,
    pub quality: Quality,
    /// Lowercase, without leading dots.
    pub allowed_extensions: BTreeSet<String>,
    pub font_path: PathBuf,
}

impl AnnotationConfig {
    pub fn from_settings(settings: &StampConfig, font_path: PathBuf) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            date_format: settings.text.format.clone(),
            text_color: settings.text.color,
            stroke_color: settings.text.stroke_color,
            stroke_width: settings.text.stroke_width,
            text_anchor: settings
                .layout
                .anchor
                .parse()
                .map_err(|e| ConfigError::Validation(format!("layout.anchor: {e}")))?,
            pos_x: settings.layout.pos_x,
            pos_y: settings.layout.pos_y,
            text_size: text_size(settings.text.size)?,
            fine_tune_aspect_ratio: parse_aspect_ratio(&settings.layout.fine_tune_aspect_ratio)?,
            quality: Quality::new(settings.output.quality),
            allowed_extensions: settings
                .output
                .extensions
                .iter()
                .map(|e| normalize_extension(e))
                .filter(|e| !e.is_empty())
                .collect(),
            font_path,
        })
    }

    /// Whether the file's extension is one of the allowed ones (case-insensitive).
    pub fn allows(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.allowed_extensions.contains(&e.to_ascii_lowercase()))
    }
}

fn text_size(setting: TextSizeSetting) -> Result<TextSize, ConfigError> {
    match setting {
        TextSizeSetting::Keyword(TextSizeKeyword::Proportional) => Ok(TextSize::Proportional),
        TextSizeSetting::Millimeters(mm) if mm.is_finite() && mm > 0.0 => {
            Ok(TextSize::Millimeters(mm))
        }
        TextSizeSetting::Millimeters(mm) => Err(ConfigError::Validation(format!(
            "text.size must be a positive number of millimetres or \"proportional\", got {mm}"
        ))),
    }
}

// =============================================================================
// Value parsers (shared by TOML validation and command-line flags)
// =============================================================================

/// Parse `"M/N"` or `"none"`. Requires `0 < M <= N`.
pub fn parse_aspect_ratio(value: &str) -> Result<Option<AspectRatio>, ConfigError> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    let invalid = || {
        ConfigError::Validation(format!(
            "fine_tune_aspect_ratio must be \"none\" or \"M/N\" with 0 < M <= N, got \"{value}\""
        ))
    };
    let (m, n) = value.split_once('/').ok_or_else(invalid)?;
    let m: u32 = m.trim().parse().map_err(|_| invalid())?;
    let n: u32 = n.trim().parse().map_err(|_| invalid())?;
    if m == 0 || n == 0 || m > n {
        return Err(invalid());
    }
    Ok(Some(AspectRatio { m, n }))
}

/// Parse an RGB triple written as `"(r,g,b)"` or `"r,g,b"`.
pub fn parse_rgb(value: &str) -> Result<Rgb, ConfigError> {
    let invalid = || ConfigError::Validation(format!("expected a color like \"(255,149,21)\", got \"{value}\""));
    let inner = value
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')');
    let parts: Vec<u8> = inner
        .split(',')
        .map(|p| p.trim().parse::<u8>())
        .collect::<Result<_, _>>()
        .map_err(|_| invalid())?;
    match parts.as_slice() {
        [r, g, b] => Ok([*r, *g, *b]),
        _ => Err(invalid()),
    }
}

/// Split a comma-separated extension list, e.g. `"jpg, .PNG"`.
pub fn parse_extensions(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(normalize_extension)
        .filter(|e| !e.is_empty())
        .collect()
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Parse `--text_size`: millimetres or `proportional`.
pub fn parse_text_size(value: &str) -> Result<TextSizeSetting, ConfigError> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("proportional") {
        return Ok(TextSizeSetting::Keyword(TextSizeKeyword::Proportional));
    }
    value
        .parse::<f64>()
        .map(TextSizeSetting::Millimeters)
        .map_err(|_| {
            ConfigError::Validation(format!(
                "text size must be millimetres or \"proportional\", got \"{value}\""
            ))
        })
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(StampConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a TOML config file as a raw value. The file must exist.
pub fn load_raw_config(path: &Path) -> Result<toml::Value, ConfigError> {
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(value)
}

/// Merge overlays onto a base value in order, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlays: impl IntoIterator<Item = toml::Value>,
) -> Result<StampConfig, ConfigError> {
    let merged = overlays.into_iter().fold(base, merge_toml);
    let config: StampConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Stock defaults, then the optional config file, then `overrides`.
pub fn load_config(
    file: Option<&Path>,
    overrides: toml::Value,
) -> Result<StampConfig, ConfigError> {
    let mut layers = Vec::new();
    if let Some(path) = file {
        layers.push(load_raw_config(path)?);
    }
    layers.push(overrides);
    resolve_config(stock_defaults_value(), layers)
}

/// Returns a fully-commented stock config with all keys and explanations.
///
/// Used by `--gen-config`.
pub fn stock_config_toml() -> &'static str {
    r##"# picdate configuration
# =====================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Load with: picdate --config picdate.toml --src photos/
# Command-line flags override values from this file.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Stamp text
# ---------------------------------------------------------------------------
[text]
# strftime pattern (chrono syntax). "%-m" drops the leading zero.
format = "`%y %-m %-d"

# Text height in millimetres on a 6x4 inch print, scaled to the image's
# long edge. Use "proportional" for long edge / 36 pixels instead.
size = 4.24

# RGB fill and outline colors.
color = [255, 149, 21]
stroke_color = [242, 97, 0]

# Outline width in pixels (0 disables the outline).
stroke_width = 1

# ---------------------------------------------------------------------------
# Placement
# ---------------------------------------------------------------------------
[layout]
# Which point of the text box sits on the computed position.
# Horizontal: l(eft) m(iddle) r(ight)
# Vertical:   a(scender) t(op) m(iddle) s (baseline) b(ottom) d(escender)
anchor = "rb"

# Position as fractions of the width and height left after cropping.
pos_x = 0.94
pos_y = 0.94

# Print labs crop photos to the paper's aspect ratio (short/long edge).
# The stamp is placed inside the area that survives that crop.
# "none" places it relative to the full image.
fine_tune_aspect_ratio = "2/3"

# ---------------------------------------------------------------------------
# Output
# ---------------------------------------------------------------------------
[output]
# JPEG quality (1-100). Chroma subsampling is always disabled.
quality = 95

# Files with these extensions are stamped (case-insensitive).
# Any of: jpg, jpeg, png, tif, tiff, webp.
extensions = ["jpg", "jpeg", "png", "tiff"]

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Number of worker threads. Omit for auto (= number of CPU cores).
# jobs = 4

# Seconds to wait for each image before reporting it as timed out.
task_timeout_secs = 10
"##
}
