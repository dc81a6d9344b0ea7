//! The stamp font.
//!
//! The date is drawn with a seven-segment style TrueType font that is not
//! shipped with the binary. It is fetched once from the project repository and
//! kept in the user cache directory:
//!
//! ```text
//! ~/.cache/picdate/CursedTimerUlil-Aznm.ttf     (Linux)
//! ~/Library/Caches/picdate/...                  (macOS)
//! %LOCALAPPDATA%\picdate\...                    (Windows)
//! ```
//!
//! `PICDATE_CACHE_DIR` overrides the cache location, and `--font` skips the
//! cache entirely. Resolution happens once, before any worker starts; workers
//! only ever see the resolved path.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const FONT_URL: &str =
    "https://github.com/aben20807/picdate/blob/master/font/CursedTimerUlil-Aznm.ttf?raw=true";
pub const FONT_FILE_NAME: &str = "CursedTimerUlil-Aznm.ttf";
pub const ENV_CACHE_DIR: &str = "PICDATE_CACHE_DIR";
const APP_NAME: &str = "picdate";
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum FontError {
    #[error("font file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("no cache directory available; pass --font or set {ENV_CACHE_DIR}")]
    NoCacheDir,
    #[error("failed to download font from {url}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("downloaded font from {0} is empty")]
    Empty(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The directory the font is cached in.
///
/// 1. `PICDATE_CACHE_DIR` (if set and non-empty)
/// 2. Platform cache directory with the app name appended
pub fn cache_dir() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var(ENV_CACHE_DIR) {
        if !env_path.is_empty() {
            return Some(PathBuf::from(env_path));
        }
    }
    dirs::cache_dir().map(|mut path| {
        path.push(APP_NAME);
        path
    })
}

/// Resolve the font to stamp with, downloading it on first use.
///
/// `on_download` is called with the destination path right before a download
/// starts, so the caller can tell the user why the first run is slow.
pub fn ensure_font(
    explicit: Option<&Path>,
    on_download: impl FnOnce(&Path),
) -> Result<PathBuf, FontError> {
    ensure_font_in(explicit, cache_dir(), FONT_URL, on_download)
}

/// [`ensure_font`] with the cache directory and URL spelled out.
pub fn ensure_font_in(
    explicit: Option<&Path>,
    cache: Option<PathBuf>,
    url: &str,
    on_download: impl FnOnce(&Path),
) -> Result<PathBuf, FontError> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(FontError::NotFound(path.to_path_buf()));
        }
        return Ok(path.to_path_buf());
    }

    let cached = cache.ok_or(FontError::NoCacheDir)?.join(FONT_FILE_NAME);
    if cached.is_file() {
        tracing::debug!(path = %cached.display(), "using cached font");
        return Ok(cached);
    }

    on_download(&cached);
    download(url, &cached)?;
    Ok(cached)
}

/// Fetch `url` into `dest`, through a sibling `.part` file so an interrupted
/// download never leaves a truncated font behind.
fn download(url: &str, dest: &Path) -> Result<(), FontError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let wrap = |source| FontError::Download {
        url: url.to_string(),
        source,
    };

    tracing::info!(url, dest = %dest.display(), "downloading font");
    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!("picdate/", env!("CARGO_PKG_VERSION")))
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .map_err(wrap)?;
    let bytes = client
        .get(url)
        .send()
        .and_then(|resp| resp.error_for_status())
        .and_then(|resp| resp.bytes())
        .map_err(wrap)?;
    if bytes.is_empty() {
        return Err(FontError::Empty(url.to_string()));
    }

    let partial = dest.with_extension("ttf.part");
    fs::write(&partial, &bytes)?;
    fs::rename(&partial, dest)?;
    tracing::debug!(bytes = bytes.len(), "font cached");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn no_download(path: &Path) {
        panic!("unexpected download to {}", path.display())
    }

    #[test]
    fn explicit_font_is_used_as_is() {
        let tmp = TempDir::new().unwrap();
        let font = tmp.path().join("mine.ttf");
        fs::write(&font, b"font bytes").unwrap();

        let resolved = ensure_font_in(Some(&font), None, "http://unused", no_download).unwrap();
        assert_eq!(resolved, font);
    }

    #[test]
    fn explicit_font_must_exist() {
        let result = ensure_font_in(
            Some(Path::new("/nonexistent/mine.ttf")),
            None,
            "http://unused",
            no_download,
        );
        assert!(matches!(result, Err(FontError::NotFound(_))));
    }

    #[test]
    fn explicit_font_cannot_be_a_directory() {
        let tmp = TempDir::new().unwrap();
        let result = ensure_font_in(Some(tmp.path()), None, "http://unused", no_download);
        assert!(matches!(result, Err(FontError::NotFound(_))));
    }

    #[test]
    fn cached_font_skips_download() {
        let tmp = TempDir::new().unwrap();
        let cached = tmp.path().join(FONT_FILE_NAME);
        fs::write(&cached, b"font bytes").unwrap();

        let resolved = ensure_font_in(
            None,
            Some(tmp.path().to_path_buf()),
            "http://unused",
            no_download,
        )
        .unwrap();
        assert_eq!(resolved, cached);
    }

    #[test]
    fn missing_cache_dir_is_error() {
        let result = ensure_font_in(None, None, "http://unused", no_download);
        assert!(matches!(result, Err(FontError::NoCacheDir)));
    }

    #[test]
    fn failed_download_leaves_no_font() {
        let tmp = TempDir::new().unwrap();
        let cache = tmp.path().join("cache");
        let mut announced = None;

        // Port 9 (discard) on localhost refuses connections.
        let result = ensure_font_in(None, Some(cache.clone()), "http://127.0.0.1:9/font.ttf", |p| {
            announced = Some(p.to_path_buf())
        });

        assert!(matches!(result, Err(FontError::Download { .. })));
        assert_eq!(announced, Some(cache.join(FONT_FILE_NAME)));
        assert!(!cache.join(FONT_FILE_NAME).exists());
    }
}
