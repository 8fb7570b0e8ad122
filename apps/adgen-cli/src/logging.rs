//! Logging initialization and log file management.
//!
//! Tracing always goes to stderr. Pipeline runs also write a JSON log to
//! `.adgen/logs/<slug>/<YYYYMMDD_HHMMSS>.log`, where the slug is derived
//! from the product URL so runs for the same product land together.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Maximum age of log files before cleanup, in days.
const LOG_RETENTION_DAYS: u64 = 3;

/// Longest slug kept for a log directory name.
const MAX_SLUG_LEN: usize = 48;

/// Initialize the tracing subscriber.
///
/// With a `slug`, a JSON file layer is added next to stderr. The returned
/// [`WorkerGuard`] must live until exit so buffered lines are flushed.
///
/// # Errors
///
/// Returns an error if the log directory or file cannot be created.
pub fn init_tracing(workdir: &Path, slug: Option<&str>) -> Result<Option<WorkerGuard>> {
    match build_tracing(workdir, slug)? {
        Some((subscriber, guard)) => {
            subscriber.init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(EnvFilter::from_default_env())
                .init();
            Ok(None)
        }
    }
}

fn build_tracing(
    workdir: &Path,
    slug: Option<&str>,
) -> Result<Option<(impl tracing::Subscriber + Send + Sync, WorkerGuard)>> {
    let Some(slug) = slug else {
        return Ok(None);
    };

    let (writer, guard) = open_log_writer(workdir, slug)?;

    let subscriber = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(EnvFilter::from_default_env()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(EnvFilter::from_default_env()),
        );

    Ok(Some((subscriber, guard)))
}

fn open_log_writer(workdir: &Path, slug: &str) -> Result<(NonBlocking, WorkerGuard)> {
    let dir = logs_dir(workdir).join(slug);
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create log directory: {}", dir.display()))?;

    let path = dir.join(format!("{}.log", format_utc_timestamp(SystemTime::now())));
    let file = fs::File::create(&path)
        .with_context(|| format!("failed to create log file: {}", path.display()))?;

    Ok(tracing_appender::non_blocking(file))
}

fn logs_dir(workdir: &Path) -> PathBuf {
    workdir.join(".adgen").join("logs")
}

/// Directory-safe slug for a product URL.
///
/// Drops the scheme, query, and fragment, then keeps lowercase
/// alphanumeric runs joined by `-`. Falls back to `run`.
pub fn log_slug(product_url: &str) -> String {
    let url = product_url.trim();
    let url = url.split_once("://").map_or(url, |(_, rest)| rest);
    let url = url.split(['?', '#']).next().unwrap_or_default();
    let url = url.strip_prefix("www.").unwrap_or(url);

    let mut slug = String::with_capacity(url.len());
    for c in url.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.truncate(MAX_SLUG_LEN);
    let slug = slug.trim_end_matches('-');

    if slug.is_empty() {
        "run".to_owned()
    } else {
        slug.to_owned()
    }
}

/// Remove `.log` files older than the retention window from `.adgen/logs/`,
/// then any directories left empty.
///
/// Best-effort: failures are reported on stderr since tracing is not set
/// up yet when this runs.
pub fn cleanup_old_logs(workdir: &Path) {
    let dir = logs_dir(workdir);
    if !dir.is_dir() {
        return;
    }

    let cutoff = SystemTime::now() - Duration::from_secs(LOG_RETENTION_DAYS * 24 * 60 * 60);
    remove_old_log_files(&dir, cutoff);
    remove_empty_dirs(&dir);
}

/// Format a [`SystemTime`] as `YYYYMMDD_HHMMSS` in UTC.
fn format_utc_timestamp(time: SystemTime) -> String {
    let secs = time.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    let (year, month, day) = days_to_date(secs / 86_400);
    let of_day = secs % 86_400;

    format!(
        "{year:04}{month:02}{day:02}_{:02}{:02}{:02}",
        of_day / 3600,
        (of_day % 3600) / 60,
        of_day % 60
    )
}

/// Days since the Unix epoch to a Gregorian (year, month, day).
///
/// Howard Hinnant's `civil_from_days`, with eras starting on 0000-03-01.
fn days_to_date(days_since_epoch: u64) -> (u64, u64, u64) {
    let z = days_since_epoch as i64 + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe as i64 + era * 400 + i64::from(month <= 2);

    (year as u64, month, day)
}

fn remove_old_log_files(dir: &Path, cutoff: SystemTime) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            eprintln!("warning: failed to read log directory {}: {e}", dir.display());
            return;
        }
    };

    for path in entries.filter_map(|entry| entry.ok()).map(|entry| entry.path()) {
        if path.is_dir() {
            remove_old_log_files(&path, cutoff);
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }

        match fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(modified) if modified < cutoff => {
                if let Err(e) = fs::remove_file(&path) {
                    eprintln!("warning: failed to remove old log {}: {e}", path.display());
                }
            }
            Ok(_) => {}
            Err(e) => {
                eprintln!("warning: failed to stat {}: {e}", path.display());
            }
        }
    }
}

/// Remove empty subdirectories under `dir`, keeping `dir` itself.
fn remove_empty_dirs(dir: &Path) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    for path in entries.filter_map(|entry| entry.ok()).map(|entry| entry.path()) {
        if path.is_dir() {
            remove_empty_dirs(&path);
            // fails on non-empty directories
            let _ = fs::remove_dir(&path);
        }
    }
}
