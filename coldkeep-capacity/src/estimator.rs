//! Backup size estimation for a site.
//!
//! Three methods trade accuracy against cost:
//!
//! - [`EstimateMethod::Heuristic`]: lists files and applies a per-extension
//!   compression table. Reads metadata only.
//! - [`EstimateMethod::Sample`]: compresses the first bytes of the archive
//!   stream in-process and extrapolates the ratio.
//! - [`EstimateMethod::Accurate`]: runs the real compressed capture and
//!   counts its output.
//!
//! Every command runs through a [`CommandRunner`], so the site may be local
//! or remote. Capture output is discarded.

use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;

use coldkeep_core::limits::{ARCHIVE_HEADER_BYTES_PER_FILE, SAMPLE_BYTES_DEFAULT, STREAM_CHUNK_BYTES};
use coldkeep_tier::{classify_exit, shell_quote, CaptureExit, CommandRunner, TierError};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tracing::{debug, info, warn};

use crate::error::{CapacityError, CapacityResult};

/// Extensions of already-compressed formats; they barely shrink in gzip.
const COMPRESSED_EXTENSIONS: &[&str] = &[
    "7z", "avi", "bz2", "docx", "gif", "gz", "jpeg", "jpg", "mkv", "mov", "mp3", "mp4", "ogg",
    "pdf", "png", "rar", "tgz", "webm", "webp", "xlsx", "xz", "zip", "zst",
];

/// Extensions of text and code; they compress well.
const TEXT_EXTENSIONS: &[&str] = &[
    "c", "conf", "css", "csv", "go", "h", "htm", "html", "ini", "java", "js", "json", "log", "md",
    "php", "py", "rb", "rs", "sh", "sql", "svg", "toml", "ts", "txt", "xml", "yaml", "yml",
];

const RATIO_COMPRESSED: f64 = 0.95;
const RATIO_TEXT: f64 = 0.30;
const RATIO_OTHER: f64 = 0.50;

/// How a site's backup size is estimated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimateMethod {
    /// File listing with a per-extension ratio table.
    #[default]
    Heuristic,
    /// In-process compression of an archive prefix.
    Sample,
    /// Full compressed capture, counted.
    Accurate,
}

impl fmt::Display for EstimateMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Heuristic => "heuristic",
            Self::Sample => "sample",
            Self::Accurate => "accurate",
        })
    }
}

impl FromStr for EstimateMethod {
    type Err = CapacityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "heuristic" => Ok(Self::Heuristic),
            "sample" => Ok(Self::Sample),
            "accurate" => Ok(Self::Accurate),
            other => Err(CapacityError::InvalidArgument {
                name: "estimate method",
                reason: format!("'{other}' is not one of heuristic, sample, accurate"),
            }),
        }
    }
}

/// Estimated backup size of one site.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteMeasurement {
    /// Site name.
    pub site: String,
    /// Method used.
    pub method: EstimateMethod,
    /// Bytes before compression.
    pub uncompressed_size: u64,
    /// Estimated archive size.
    pub compressed_size: u64,
    /// `compressed_size / uncompressed_size`.
    pub compression_ratio: f64,
}

impl SiteMeasurement {
    /// Builds a measurement, deriving the ratio.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(
        site: impl Into<String>,
        method: EstimateMethod,
        uncompressed_size: u64,
        compressed_size: u64,
    ) -> Self {
        let compression_ratio = if uncompressed_size == 0 {
            1.0
        } else {
            compressed_size as f64 / uncompressed_size as f64
        };
        Self {
            site: site.into(),
            method,
            uncompressed_size,
            compressed_size,
            compression_ratio,
        }
    }

    /// Averages several measurements into a representative per-site figure.
    ///
    /// Returns `None` for an empty slice.
    #[must_use]
    pub fn average(measurements: &[Self]) -> Option<Self> {
        let first = measurements.first()?;
        let count = measurements.len() as u64;
        let uncompressed: u64 = measurements.iter().map(|m| m.uncompressed_size).sum();
        let compressed: u64 = measurements.iter().map(|m| m.compressed_size).sum();
        Some(Self::new(
            "average",
            first.method,
            uncompressed / count,
            compressed / count,
        ))
    }
}

/// Estimator settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstimatorConfig {
    /// Method to use.
    pub method: EstimateMethod,
    /// Archive bytes compressed by the sample method.
    pub sample_bytes: u64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            method: EstimateMethod::Heuristic,
            sample_bytes: SAMPLE_BYTES_DEFAULT,
        }
    }
}

impl EstimatorConfig {
    /// Sets the method.
    #[must_use]
    pub const fn with_method(mut self, method: EstimateMethod) -> Self {
        self.method = method;
        self
    }

    /// Sets the sample size.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is zero.
    #[must_use]
    pub const fn with_sample_bytes(mut self, bytes: u64) -> Self {
        assert!(bytes > 0, "sample size must be positive");
        self.sample_bytes = bytes;
        self
    }
}

/// One site to estimate.
#[derive(Clone)]
pub struct EstimateTarget {
    /// Site name.
    pub site: String,
    /// Where the site's files live.
    pub runner: Arc<dyn CommandRunner>,
    /// Directory to measure.
    pub path: String,
}

/// Measures sites with the configured method.
#[derive(Debug, Clone, Default)]
pub struct CapacityEstimator {
    config: EstimatorConfig,
}

impl CapacityEstimator {
    /// Creates an estimator.
    #[must_use]
    pub const fn new(config: EstimatorConfig) -> Self {
        Self { config }
    }

    /// Estimates the backup size of `path` on the runner's host.
    ///
    /// # Errors
    ///
    /// Returns an error if a command fails or its output cannot be parsed.
    pub async fn estimate(
        &self,
        runner: &dyn CommandRunner,
        site: &str,
        path: &str,
    ) -> CapacityResult<SiteMeasurement> {
        let measurement = match self.config.method {
            EstimateMethod::Heuristic => heuristic(runner, site, path).await?,
            EstimateMethod::Sample => sample(runner, site, path, self.config.sample_bytes).await?,
            EstimateMethod::Accurate => accurate(runner, site, path).await?,
        };

        info!(
            site,
            method = %measurement.method,
            uncompressed = measurement.uncompressed_size,
            compressed = measurement.compressed_size,
            ratio = measurement.compression_ratio,
            "Estimated site"
        );
        Ok(measurement)
    }

    /// Estimates every target in order, collecting each result.
    ///
    /// A failed site never stops the others.
    pub async fn estimate_sites(
        &self,
        targets: &[EstimateTarget],
    ) -> Vec<(String, CapacityResult<SiteMeasurement>)> {
        let mut results = Vec::with_capacity(targets.len());
        for target in targets {
            let result = self
                .estimate(target.runner.as_ref(), &target.site, &target.path)
                .await;
            if let Err(e) = &result {
                warn!(site = %target.site, error = %e, "Estimate failed, continuing with next");
            }
            results.push((target.site.clone(), result));
        }
        results
    }
}

// -----------------------------------------------------------------------------
// Heuristic
// -----------------------------------------------------------------------------

/// Compression ratio the heuristic assumes for a file name.
#[must_use]
pub fn heuristic_ratio(file_name: &str) -> f64 {
    let Some((stem, ext)) = file_name.rsplit_once('.') else {
        return RATIO_OTHER;
    };
    if stem.is_empty() {
        return RATIO_OTHER;
    }
    let ext = ext.to_ascii_lowercase();
    if COMPRESSED_EXTENSIONS.contains(&ext.as_str()) {
        RATIO_COMPRESSED
    } else if TEXT_EXTENSIONS.contains(&ext.as_str()) {
        RATIO_TEXT
    } else {
        RATIO_OTHER
    }
}

/// Applies the heuristic to `find -printf '%s %f\n'` output.
///
/// # Errors
///
/// Returns [`CapacityError::Parse`] if a line does not start with a size.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn heuristic_from_listing(site: &str, listing: &str) -> CapacityResult<SiteMeasurement> {
    let mut uncompressed = 0u64;
    let mut compressed = 0.0f64;
    let mut files = 0u64;

    for line in listing.lines().filter(|l| !l.is_empty()) {
        let (size, name) = line.split_once(' ').unwrap_or((line, ""));
        let size: u64 = size.parse().map_err(|e| CapacityError::Parse {
            command: "find",
            reason: format!("bad size in '{line}': {e}"),
        })?;
        uncompressed += size;
        compressed += size as f64 * heuristic_ratio(name);
        files += 1;
    }

    let compressed = compressed.round() as u64 + files * ARCHIVE_HEADER_BYTES_PER_FILE;
    debug!(site, files, "Applied heuristic to file listing");
    Ok(SiteMeasurement::new(
        site,
        EstimateMethod::Heuristic,
        uncompressed,
        compressed,
    ))
}

async fn heuristic(
    runner: &dyn CommandRunner,
    site: &str,
    path: &str,
) -> CapacityResult<SiteMeasurement> {
    let script = format!("find {} -type f -printf '%s %f\\n'", shell_quote(path));
    let listing = runner.run(&script).await.into_result(runner.target())?;
    heuristic_from_listing(site, &listing)
}

// -----------------------------------------------------------------------------
// Sample
// -----------------------------------------------------------------------------

/// `std::io::Write` sink that only counts bytes.
#[derive(Debug, Default)]
struct CountingWriter {
    bytes: u64,
}

impl Write for CountingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.bytes += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

type Encoder = GzEncoder<CountingWriter>;

/// Runs compression work on the blocking pool.
async fn off_runtime<T, F>(work: F) -> std::io::Result<T>
where
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(std::io::Error::other)?
}

/// Gzip-compresses up to `limit` bytes of `reader` and returns
/// `(bytes read, compressed bytes)`.
///
/// Each chunk is compressed on the blocking pool.
///
/// # Errors
///
/// Returns an error if reading or compressing fails.
pub async fn compress_prefix<R>(reader: R, limit: u64) -> std::io::Result<(u64, u64)>
where
    R: AsyncRead + Unpin,
{
    let mut reader = reader.take(limit);
    let mut encoder: Encoder = GzEncoder::new(CountingWriter::default(), Compression::default());
    let mut buf = vec![0u8; STREAM_CHUNK_BYTES];
    let mut read = 0u64;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        (encoder, buf) = off_runtime(move || {
            encoder.write_all(&buf[..n])?;
            Ok((encoder, buf))
        })
        .await?;
        read += n as u64;
    }

    let counted = off_runtime(move || encoder.finish()).await?;
    Ok((read, counted.bytes))
}

async fn sample(
    runner: &dyn CommandRunner,
    site: &str,
    path: &str,
    sample_bytes: u64,
) -> CapacityResult<SiteMeasurement> {
    let total = disk_usage(runner, path).await?;

    let mut child = runner.spawn(&format!("tar -cf - -C {} .", shell_quote(path)))?;
    let stdout = take_stdout(&mut child, runner.target())?;
    let stderr = collect_stderr(&mut child);

    let (read, compressed) = compress_prefix(stdout, sample_bytes)
        .await
        .map_err(|e| TierError::io("sample archive", e))?;

    if read >= sample_bytes {
        // Enough sampled; the rest of the archive is not needed.
        if let Err(e) = child.kill().await {
            debug!(error = %e, "Sample capture already exited");
        }
    } else {
        finish_capture(child, stderr, runner.target()).await?;
    }

    let ratio = if read == 0 {
        1.0
    } else {
        ratio_of(compressed, read)
    };
    debug!(site, read, compressed, ratio, "Compressed archive sample");

    Ok(SiteMeasurement::new(
        site,
        EstimateMethod::Sample,
        total,
        scale(total, ratio),
    ))
}

#[allow(clippy::cast_precision_loss)]
fn ratio_of(compressed: u64, read: u64) -> f64 {
    compressed as f64 / read as f64
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn scale(bytes: u64, ratio: f64) -> u64 {
    (bytes as f64 * ratio).round() as u64
}

// -----------------------------------------------------------------------------
// Accurate
// -----------------------------------------------------------------------------

async fn accurate(
    runner: &dyn CommandRunner,
    site: &str,
    path: &str,
) -> CapacityResult<SiteMeasurement> {
    let total = disk_usage(runner, path).await?;

    let mut child = runner.spawn(&format!("tar -czf - -C {} .", shell_quote(path)))?;
    let mut stdout = take_stdout(&mut child, runner.target())?;
    let stderr = collect_stderr(&mut child);

    let compressed = tokio::io::copy(&mut stdout, &mut tokio::io::sink())
        .await
        .map_err(|e| TierError::io("count archive", e))?;
    finish_capture(child, stderr, runner.target()).await?;

    Ok(SiteMeasurement::new(
        site,
        EstimateMethod::Accurate,
        total,
        compressed,
    ))
}

// -----------------------------------------------------------------------------
// Helpers
// -----------------------------------------------------------------------------

/// Parses the byte count from `du -sb` output.
///
/// # Errors
///
/// Returns [`CapacityError::Parse`] if the first field is not a number.
pub fn parse_du(output: &str) -> CapacityResult<u64> {
    let field = output.split_whitespace().next().unwrap_or_default();
    field.parse().map_err(|e| CapacityError::Parse {
        command: "du",
        reason: format!("'{}': {e}", output.trim()),
    })
}

async fn disk_usage(runner: &dyn CommandRunner, path: &str) -> CapacityResult<u64> {
    let output = runner
        .run(&format!("du -sb {}", shell_quote(path)))
        .await
        .into_result(runner.target())?;
    parse_du(&output)
}

fn take_stdout(child: &mut Child, target: &str) -> CapacityResult<tokio::process::ChildStdout> {
    child.stdout.take().ok_or_else(|| {
        CapacityError::Tier(TierError::Capture {
            target: target.to_string(),
            message: "capture stdout was not piped".to_string(),
        })
    })
}

fn collect_stderr(child: &mut Child) -> tokio::task::JoinHandle<String> {
    let stderr = child.stderr.take();
    tokio::spawn(async move {
        let mut collected = String::new();
        if let Some(mut stderr) = stderr {
            if let Err(e) = stderr.read_to_string(&mut collected).await {
                debug!(error = %e, "Failed to read capture stderr");
            }
        }
        collected
    })
}

async fn finish_capture(
    mut child: Child,
    stderr: tokio::task::JoinHandle<String>,
    target: &str,
) -> CapacityResult<()> {
    let status = child
        .wait()
        .await
        .map_err(|e| TierError::io("wait for capture", e))?;
    let stderr = stderr.await.unwrap_or_default();

    match classify_exit(status.code(), &stderr) {
        CaptureExit::Clean => Ok(()),
        CaptureExit::Benign(warning) => {
            warn!(target_host = target, warning = %warning, "Capture finished with warning");
            Ok(())
        }
        CaptureExit::Failed(message) => Err(TierError::Capture {
            target: target.to_string(),
            message,
        }
        .into()),
    }
}
