//! Command handlers.
//!
//! Each handler writes plain text lines to `out` and returns the number of
//! items that failed. Batch commands process every item; setup errors are
//! returned as `Err`.

use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _};
use chrono::{Utc, Weekday};
use clap::{ArgGroup, Args};
use coldkeep_capacity::{
    growth_projection, CapacityEstimate, CapacityEstimator, CapacityMonitor, CapacityProbe,
    CapacityThreshold, CostEstimate, DfProbe, EstimateMethod, EstimateTarget, EstimatorConfig,
    FleetProjection, HotUsageProbe, MonitorConfig, MonitorReport, SiteMeasurement,
};
use coldkeep_core::limits::{
    MONITOR_ITERATIONS_MAX_DEFAULT, MONITOR_PAUSE_SECS_DEFAULT, SAMPLE_BYTES_DEFAULT,
};
use coldkeep_core::{ObjectKey, StorageObject, KEY_TIMESTAMP_FORMAT};
use coldkeep_retention::{
    by_date_range, by_numeric_range, by_prefix, sorted_newest_first, DateRange, NumericRange,
    RetentionPolicy, SmartTieredPolicy,
};
use coldkeep_tier::{
    self_test, shell_quote, vault_self_test, BackupJob, CaptureSpec, StorageClients,
    StreamingTransfer, SELF_TEST_BYTES_DEFAULT,
};
use tracing::info;

use crate::config::Settings;

/// Everything a handler needs from one invocation.
pub struct Context {
    /// Resolved configuration.
    pub settings: Settings,
    /// Storage backends.
    pub clients: StorageClients,
}

impl Context {
    fn transfer(&self) -> StreamingTransfer {
        StreamingTransfer::new(self.settings.runner(), self.settings.transfer_config())
    }
}

/// Asks `question` on `out` and reads the answer from `input`.
///
/// `assume_yes` answers without reading.
///
/// # Errors
///
/// Returns an error if the prompt cannot be written or stdin is closed.
pub fn confirm(
    out: &mut dyn Write,
    input: &mut dyn BufRead,
    question: &str,
    assume_yes: bool,
) -> anyhow::Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    write!(out, "{question} [y/N] ")?;
    out.flush()?;

    let mut answer = String::new();
    if input.read_line(&mut answer)? == 0 {
        bail!("no answer on stdin; pass --yes to run unattended");
    }
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

/// A site given as `name:path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteSpec {
    /// Site name, used in keys.
    pub name: String,
    /// Directory on the capture host.
    pub path: String,
}

/// Parses `name:path`.
///
/// # Errors
///
/// Returns a message if either part is empty.
pub fn parse_site(s: &str) -> Result<SiteSpec, String> {
    let (name, path) = s
        .split_once(':')
        .ok_or_else(|| format!("invalid site '{s}', expected 'name:path'"))?;
    if name.is_empty() || path.is_empty() {
        return Err(format!("invalid site '{s}', name and path must not be empty"));
    }
    Ok(SiteSpec {
        name: name.to_string(),
        path: path.to_string(),
    })
}

fn print_objects(out: &mut dyn Write, objects: &[StorageObject]) -> std::io::Result<()> {
    for object in objects {
        writeln!(
            out,
            "{}  {:>12}  {}",
            object.last_modified.to_rfc3339(),
            object.size,
            object.key
        )?;
    }
    Ok(())
}

/// Deletes `victims` after a preview and confirmation.
fn delete_selected(
    out: &mut dyn Write,
    input: &mut dyn BufRead,
    victims: &[StorageObject],
    dry_run: bool,
    yes: bool,
) -> anyhow::Result<Option<Vec<ObjectKey>>> {
    if victims.is_empty() {
        writeln!(out, "nothing selected")?;
        return Ok(None);
    }

    let bytes: u64 = victims.iter().map(|o| o.size).sum();
    print_objects(out, victims)?;
    if dry_run {
        writeln!(out, "dry run: {} objects ({bytes} bytes) would be deleted", victims.len())?;
        return Ok(None);
    }
    if !confirm(
        out,
        input,
        &format!("Delete {} objects ({bytes} bytes)?", victims.len()),
        yes,
    )? {
        writeln!(out, "aborted")?;
        return Ok(None);
    }
    Ok(Some(victims.iter().map(|o| o.key.clone()).collect()))
}

async fn run_deletes(
    ctx: &Context,
    out: &mut dyn Write,
    keys: &[ObjectKey],
) -> anyhow::Result<usize> {
    let results = ctx.clients.hot().delete_many(keys).await;
    let mut failures = 0;
    for (key, result) in &results {
        if let Err(e) = result {
            failures += 1;
            writeln!(out, "FAIL  {key}: {e}")?;
        }
    }
    writeln!(out, "deleted {} of {} objects", results.len() - failures, results.len())?;
    Ok(failures)
}

// -----------------------------------------------------------------------------
// backup
// -----------------------------------------------------------------------------

/// Arguments of `coldkeep backup`.
#[derive(Debug, Args)]
pub struct BackupArgs {
    /// Site to back up, as `name:path`. Repeat for several sites.
    #[arg(long = "site", value_parser = parse_site, required = true)]
    pub sites: Vec<SiteSpec>,

    /// Label embedded in the key.
    #[arg(long, default_value = "files")]
    pub label: String,

    /// Capture script instead of tar; `{path}` is replaced by the quoted path.
    #[arg(long)]
    pub command: Option<String>,

    /// Key extension. Defaults to `tar.gz`, or `tar` with `--no-compress`.
    #[arg(long)]
    pub ext: Option<String>,

    /// Archive without gzip.
    #[arg(long)]
    pub no_compress: bool,

    /// Skip the cold tier even if a vault is configured.
    #[arg(long)]
    pub no_cold: bool,

    /// Print the planned keys without capturing.
    #[arg(long)]
    pub dry_run: bool,
}

/// Captures each site into the hot tier, and the cold tier when configured.
///
/// # Errors
///
/// Returns an error if a key cannot be built.
pub async fn backup(
    ctx: &Context,
    args: &BackupArgs,
    out: &mut dyn Write,
) -> anyhow::Result<usize> {
    let taken_at = Utc::now();
    let ext = args.ext.clone().unwrap_or_else(|| {
        if args.no_compress {
            "tar".to_string()
        } else {
            "tar.gz".to_string()
        }
    });

    let mut jobs = Vec::with_capacity(args.sites.len());
    for site in &args.sites {
        let key = ObjectKey::for_backup(
            ctx.settings.key_prefix(),
            &site.name,
            &args.label,
            taken_at,
            &ext,
        )
        .with_context(|| format!("building key for site {}", site.name))?;

        let capture = match &args.command {
            Some(script) => CaptureSpec::new(
                script.replace("{path}", &shell_quote(&site.path)),
            ),
            None => CaptureSpec::tar_directory(&site.path, !args.no_compress),
        };
        let cold = if args.no_cold {
            None
        } else {
            ctx.clients.cold_sink(key.as_str())
        };

        jobs.push(BackupJob {
            name: site.name.clone(),
            capture,
            hot: ctx.clients.hot_sink(key),
            cold,
        });
    }

    if args.dry_run {
        for job in &jobs {
            writeln!(
                out,
                "would back up {} to {}{} with: {}",
                job.name,
                job.hot.key,
                if job.cold.is_some() { " (+cold)" } else { "" },
                job.capture.script
            )?;
        }
        return Ok(0);
    }

    let results = ctx.transfer().backup_batch(&jobs).await;
    let mut failures = 0;
    for ((name, result), job) in results.iter().zip(&jobs) {
        match result {
            Ok(outcome) => {
                let cold = match (&job.cold, &outcome.cold_archive_id) {
                    (None, _) => "cold=skipped".to_string(),
                    (Some(_), Some(id)) => format!("cold={id}"),
                    (Some(_), None) => {
                        failures += 1;
                        format!(
                            "cold=FAILED ({})",
                            outcome.error.as_deref().unwrap_or("unknown error")
                        )
                    }
                };
                writeln!(
                    out,
                    "ok    {name}  {}  {} bytes  {cold}",
                    job.hot.key, outcome.bytes_written
                )?;
                for warning in &outcome.warnings {
                    writeln!(out, "warn  {name}: {warning}")?;
                }
            }
            Err(e) => {
                failures += 1;
                writeln!(out, "FAIL  {name}: {e}")?;
            }
        }
    }

    info!(sites = jobs.len(), failures, "Backup batch finished");
    Ok(failures)
}

// -----------------------------------------------------------------------------
// list
// -----------------------------------------------------------------------------

/// Arguments of `coldkeep list`.
#[derive(Debug, Args)]
pub struct ListArgs {
    /// Restrict to one site.
    #[arg(long)]
    pub site: Option<String>,
}

/// Lists hot-tier objects newest first with their 1-based positions.
///
/// # Errors
///
/// Returns an error if listing fails.
pub async fn list(ctx: &Context, args: &ListArgs, out: &mut dyn Write) -> anyhow::Result<usize> {
    let prefix = ctx.settings.list_prefix(args.site.as_deref());
    let objects = sorted_newest_first(&ctx.clients.hot().list(&prefix).await?);

    for (position, object) in objects.iter().enumerate() {
        writeln!(
            out,
            "{:>4}  {}  {:>12}  {}",
            position + 1,
            object.last_modified.to_rfc3339(),
            object.size,
            object.key
        )?;
    }
    let bytes: u64 = objects.iter().map(|o| o.size).sum();
    writeln!(out, "{} objects, {bytes} bytes", objects.len())?;
    Ok(0)
}

// -----------------------------------------------------------------------------
// delete
// -----------------------------------------------------------------------------

/// Arguments of `coldkeep delete`.
#[derive(Debug, Args)]
#[command(group(ArgGroup::new("selection").required(true).args(["range", "from", "prefix"])))]
pub struct DeleteArgs {
    /// Restrict to one site.
    #[arg(long)]
    pub site: Option<String>,

    /// 1-based positions in the newest-first listing, `start-end` or `n`.
    #[arg(long)]
    pub range: Option<String>,

    /// Start of a modification-time window (RFC 3339 or `YYYY-MM-DD`).
    #[arg(long, requires = "to")]
    pub from: Option<String>,

    /// End of the window, inclusive.
    #[arg(long, requires = "from")]
    pub to: Option<String>,

    /// Key prefix to match.
    #[arg(long)]
    pub prefix: Option<String>,

    /// Print the selection without deleting.
    #[arg(long)]
    pub dry_run: bool,

    /// Do not ask for confirmation.
    #[arg(long, short = 'y')]
    pub yes: bool,
}

/// Deletes an ad-hoc selection of hot-tier objects.
///
/// # Errors
///
/// Returns an error if the selection is malformed or listing fails.
pub async fn delete(
    ctx: &Context,
    args: &DeleteArgs,
    out: &mut dyn Write,
    input: &mut dyn BufRead,
) -> anyhow::Result<usize> {
    let objects = ctx
        .clients
        .hot()
        .list(&ctx.settings.list_prefix(args.site.as_deref()))
        .await?;

    let victims = match (&args.range, &args.from, &args.to, &args.prefix) {
        (Some(range), _, _, _) => by_numeric_range(&objects, NumericRange::parse(range)?)?,
        (None, Some(from), Some(to), _) => by_date_range(&objects, &DateRange::parse(from, to)?),
        (None, None, _, Some(prefix)) => by_prefix(&objects, prefix),
        _ => bail!("one of --range, --from/--to or --prefix is required"),
    };

    match delete_selected(out, input, &victims, args.dry_run, args.yes)? {
        Some(keys) => run_deletes(ctx, out, &keys).await,
        None => Ok(0),
    }
}

// -----------------------------------------------------------------------------
// prune
// -----------------------------------------------------------------------------

/// Arguments of `coldkeep prune`.
#[derive(Debug, Args)]
#[command(group(ArgGroup::new("policy").required(true).multiple(true).args(["keep", "daily", "weekly", "monthly"])))]
pub struct PruneArgs {
    /// Restrict to one site.
    #[arg(long)]
    pub site: Option<String>,

    /// Keep the N most recent backups of each series.
    #[arg(long, conflicts_with_all = ["daily", "weekly", "monthly"])]
    pub keep: Option<usize>,

    /// Daily backups to keep.
    #[arg(long)]
    pub daily: Option<usize>,

    /// Weekly backups to keep.
    #[arg(long)]
    pub weekly: Option<usize>,

    /// Monthly backups to keep.
    #[arg(long)]
    pub monthly: Option<usize>,

    /// Weekday that makes a backup weekly.
    #[arg(long, default_value = "sun")]
    pub weekly_anchor: Weekday,

    /// Day of month that makes a backup monthly.
    #[arg(long, default_value_t = 1)]
    pub monthly_day: u32,

    /// Print the selection without deleting.
    #[arg(long)]
    pub dry_run: bool,

    /// Do not ask for confirmation.
    #[arg(long, short = 'y')]
    pub yes: bool,
}

impl PruneArgs {
    /// Builds the retention policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the anchor day is invalid.
    pub fn policy(&self) -> anyhow::Result<RetentionPolicy> {
        if let Some(keep) = self.keep {
            return Ok(RetentionPolicy::SimpleOverwrite { keep });
        }
        let policy = SmartTieredPolicy::new(
            self.daily.unwrap_or(0),
            self.weekly.unwrap_or(0),
            self.monthly.unwrap_or(0),
        )
        .with_weekly_anchor(self.weekly_anchor)
        .with_monthly_anchor_day(self.monthly_day);
        policy.validate()?;
        Ok(RetentionPolicy::SmartTiered(policy))
    }
}

/// Returns the series a backup key belongs to: the key up to its timestamp.
///
/// Keys without a timestamp form one series per directory.
#[must_use]
pub fn series_of(key: &ObjectKey) -> String {
    let s = key.as_str();
    if let Some(at) = key.timestamp() {
        let suffix = format!("-{}", at.format(KEY_TIMESTAMP_FORMAT));
        if let Some(pos) = s.rfind(&suffix) {
            return s[..pos].to_string();
        }
    }
    s.rsplit_once('/').map_or("", |(dir, _)| dir).to_string()
}

/// Applies a retention policy to every series and deletes what it discards.
///
/// # Errors
///
/// Returns an error if the policy is invalid or listing fails.
pub async fn prune(
    ctx: &Context,
    args: &PruneArgs,
    out: &mut dyn Write,
    input: &mut dyn BufRead,
) -> anyhow::Result<usize> {
    let policy = args.policy()?;
    let objects = ctx
        .clients
        .hot()
        .list(&ctx.settings.list_prefix(args.site.as_deref()))
        .await?;

    let mut series: BTreeMap<String, Vec<StorageObject>> = BTreeMap::new();
    for object in objects {
        series.entry(series_of(&object.key)).or_default().push(object);
    }

    let mut victims = Vec::new();
    for (name, members) in &series {
        let discarded = policy.select(members);
        info!(series = %name, total = members.len(), discarded = discarded.len(), "Evaluated retention");
        victims.extend(discarded);
    }

    match delete_selected(out, input, &victims, args.dry_run, args.yes)? {
        Some(keys) => run_deletes(ctx, out, &keys).await,
        None => Ok(0),
    }
}

// -----------------------------------------------------------------------------
// monitor
// -----------------------------------------------------------------------------

/// Arguments of `coldkeep monitor`.
#[derive(Debug, Args)]
pub struct MonitorArgs {
    /// Utilization limit in percent.
    #[arg(long, default_value_t = 85.0)]
    pub threshold: f64,

    /// Filesystem sampled with `df` on the capture host.
    #[arg(long, default_value = "/", conflicts_with = "quota_bytes")]
    pub path: String,

    /// Measure the hot tier against this quota instead of running `df`.
    #[arg(long)]
    pub quota_bytes: Option<u64>,

    /// Restrict relief to one site.
    #[arg(long)]
    pub site: Option<String>,

    /// Share of objects moved per pass, in percent.
    #[arg(long, default_value_t = 10.0)]
    pub migrate_percent: f64,

    /// Upper bound on passes.
    #[arg(long, default_value_t = MONITOR_ITERATIONS_MAX_DEFAULT)]
    pub max_iterations: u32,

    /// Pause between passes, in seconds.
    #[arg(long, default_value_t = MONITOR_PAUSE_SECS_DEFAULT)]
    pub pause_secs: u64,

    /// Delete the selection outright when every migration of a pass fails.
    #[arg(long)]
    pub force_delete: bool,

    /// Report one pass without changing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Do not ask for confirmation.
    #[arg(long, short = 'y')]
    pub yes: bool,
}

impl MonitorArgs {
    /// Builds the monitor configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a percentage is out of range.
    pub fn config(&self, settings: &Settings) -> anyhow::Result<MonitorConfig> {
        if !(self.migrate_percent > 0.0 && self.migrate_percent <= 100.0) {
            bail!("--migrate-percent must be within (0, 100]");
        }
        let prefix = settings.list_prefix(self.site.as_deref());
        // A quota probe measures the listing prefix instead of a filesystem.
        let measured = match self.quota_bytes {
            Some(_) => prefix.clone(),
            None => self.path.clone(),
        };
        Ok(MonitorConfig::default()
            .with_threshold(CapacityThreshold::new(self.threshold, measured)?)
            .with_prefix(prefix)
            .with_migrate_percent(self.migrate_percent)
            .with_max_iterations(self.max_iterations)
            .with_pause(Duration::from_secs(self.pause_secs))
            .with_force_delete(self.force_delete)
            .with_dry_run(self.dry_run))
    }
}

fn print_report(out: &mut dyn Write, report: &MonitorReport) -> std::io::Result<usize> {
    let mut failures = 0;
    for pass in &report.passes {
        failures += pass.failed.len();
        writeln!(
            out,
            "pass {}: {:.1}% selected {} ({} bytes) migrated {} deleted {} failed {}{}{}",
            pass.iteration,
            pass.sample.used_percent,
            pass.selected.len(),
            pass.selected_bytes,
            pass.migrated.len(),
            pass.deleted.len(),
            pass.failed.len(),
            if pass.force_deleted { " (force deleted)" } else { "" },
            if pass.dry_run { " (dry run)" } else { "" },
        )?;
        if pass.dry_run {
            for key in &pass.selected {
                writeln!(out, "  would move {key}")?;
            }
        }
        for (key, reason) in &pass.failed {
            writeln!(out, "  FAIL {key}: {reason}")?;
        }
    }
    writeln!(
        out,
        "final: {:.1}% (threshold {:.1}%)",
        report.final_sample.used_percent, report.threshold
    )?;
    Ok(failures)
}

/// Runs the capacity monitor.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, sampling fails or the
/// pass bound is exhausted.
pub async fn monitor(
    ctx: &Context,
    args: &MonitorArgs,
    out: &mut dyn Write,
    input: &mut dyn BufRead,
) -> anyhow::Result<usize> {
    let config = args.config(&ctx.settings)?;
    ctx.clients.require_cold()?;

    if !args.dry_run
        && !confirm(
            out,
            input,
            &format!(
                "Move and delete hot objects under '{}' while above {:.1}%?",
                config.prefix, config.threshold.percent
            ),
            args.yes,
        )?
    {
        writeln!(out, "aborted")?;
        return Ok(0);
    }

    let probe: Box<dyn CapacityProbe> = match args.quota_bytes {
        Some(0) => bail!("--quota-bytes must be positive"),
        Some(quota) => Box::new(HotUsageProbe::new(ctx.clients.hot_shared(), quota)),
        None => Box::new(DfProbe::new(ctx.settings.runner())),
    };

    let transfer = ctx.transfer();
    let report = CapacityMonitor::new(probe.as_ref(), &ctx.clients, &transfer, config)
        .run()
        .await?;
    let failures = print_report(out, &report)?;
    Ok(failures)
}

// -----------------------------------------------------------------------------
// estimate
// -----------------------------------------------------------------------------

/// Arguments of `coldkeep estimate`.
#[derive(Debug, Args)]
pub struct EstimateArgs {
    /// Site to measure, as `name:path`. Repeat for several sites.
    #[arg(long = "site", value_parser = parse_site, required = true)]
    pub sites: Vec<SiteSpec>,

    /// Estimation method: heuristic, sample or accurate.
    #[arg(long, default_value = "heuristic")]
    pub method: EstimateMethod,

    /// Archive bytes compressed by the sample method.
    #[arg(long, default_value_t = SAMPLE_BYTES_DEFAULT)]
    pub sample_bytes: u64,

    /// Number of sites in the fleet. Defaults to the sites measured.
    #[arg(long)]
    pub fleet_size: Option<usize>,

    /// Daily backups kept in the hot tier.
    #[arg(long, default_value_t = 7)]
    pub daily: usize,

    /// Weekly backups kept in the cold tier.
    #[arg(long, default_value_t = 4)]
    pub weekly: usize,

    /// Monthly backups kept in the cold tier.
    #[arg(long, default_value_t = 12)]
    pub monthly: usize,

    /// Safety margin in percent.
    #[arg(long, default_value_t = 20.0)]
    pub buffer: f64,

    /// Months of growth to project.
    #[arg(long)]
    pub months: Option<u32>,

    /// Monthly growth rate in percent.
    #[arg(long, default_value_t = 0.0)]
    pub growth: f64,

    /// Cold storage price per GB-month.
    #[arg(long)]
    pub price: Option<f64>,

    /// Cold retrieval price per GB.
    #[arg(long)]
    pub retrieval_price: Option<f64>,

    /// Print the estimate as JSON.
    #[arg(long)]
    pub json: bool,
}

fn print_measurement(out: &mut dyn Write, m: &SiteMeasurement) -> std::io::Result<()> {
    writeln!(
        out,
        "site {}: {} bytes -> {} bytes (ratio {:.2}, {})",
        m.site, m.uncompressed_size, m.compressed_size, m.compression_ratio, m.method
    )
}

/// Measures sites and projects fleet storage, growth and cost.
///
/// # Errors
///
/// Returns an error if no site could be measured or the buffer is negative.
pub async fn estimate(
    settings: &Settings,
    args: &EstimateArgs,
    out: &mut dyn Write,
) -> anyhow::Result<usize> {
    if args.buffer.is_nan() || args.buffer < 0.0 {
        bail!("--buffer must be a non-negative number");
    }

    let runner = settings.runner();
    let targets: Vec<EstimateTarget> = args
        .sites
        .iter()
        .map(|site| EstimateTarget {
            site: site.name.clone(),
            runner: Arc::clone(&runner),
            path: site.path.clone(),
        })
        .collect();

    let estimator = CapacityEstimator::new(
        EstimatorConfig::default()
            .with_method(args.method)
            .with_sample_bytes(args.sample_bytes.max(1)),
    );

    let mut measurements = Vec::new();
    let mut failures = 0;
    for (site, result) in estimator.estimate_sites(&targets).await {
        match result {
            Ok(m) => measurements.push(m),
            Err(e) => {
                failures += 1;
                writeln!(out, "FAIL  {site}: {e}")?;
            }
        }
    }

    let Some(average) = SiteMeasurement::average(&measurements) else {
        bail!("no site could be measured");
    };

    let retention = SmartTieredPolicy::new(args.daily, args.weekly, args.monthly);
    let fleet_size = args.fleet_size.unwrap_or(args.sites.len());
    let fleet = FleetProjection::from_measurement(&average, fleet_size, &retention, args.buffer);

    let mut report = CapacityEstimate::new(measurements, fleet.clone());
    if let Some(months) = args.months {
        report = report.with_growth(growth_projection(&fleet, months, args.growth));
    }
    if let Some(price) = args.price {
        report = report.with_cost(CostEstimate::new(fleet.cold_bytes, price, args.retrieval_price));
    }

    if args.json {
        writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
        return Ok(failures);
    }

    for m in &report.sites {
        print_measurement(out, m)?;
    }
    writeln!(
        out,
        "fleet of {}: hot {} bytes, cold {} bytes, total {} bytes (buffer {:.0}%)",
        fleet.site_count,
        fleet.hot_bytes,
        fleet.cold_bytes,
        fleet.total_bytes(),
        fleet.buffer_percent
    )?;
    for g in report.growth.iter().flatten() {
        writeln!(out, "month {:>3}: hot {} bytes, cold {} bytes", g.month, g.hot_bytes, g.cold_bytes)?;
    }
    if let Some(cost) = &report.cost {
        write!(
            out,
            "cold cost: {:.2} GB x {} = {:.2}/month",
            cost.cold_gb, cost.price_per_gb_month, cost.monthly_storage_cost
        )?;
        match cost.full_retrieval_cost {
            Some(retrieval) => writeln!(out, ", full retrieval {retrieval:.2}")?,
            None => writeln!(out)?,
        }
    }
    Ok(failures)
}

// -----------------------------------------------------------------------------
// self-test
// -----------------------------------------------------------------------------

/// Arguments of `coldkeep self-test`.
#[derive(Debug, Args)]
pub struct SelfTestArgs {
    /// Payload size in bytes.
    #[arg(long, default_value_t = SELF_TEST_BYTES_DEFAULT)]
    pub bytes: usize,

    /// Also upload and delete a test archive in the cold tier.
    #[arg(long)]
    pub cold: bool,
}

/// Verifies the hot tier (and optionally the vault) with a
/// write-read-delete cycle.
///
/// # Errors
///
/// Returns an error on any mismatch or backend failure.
pub async fn self_test_cmd(
    ctx: &Context,
    args: &SelfTestArgs,
    out: &mut dyn Write,
) -> anyhow::Result<usize> {
    let report = self_test(ctx.clients.hot(), &ctx.settings.prefix, args.bytes)
        .await
        .context("hot tier self-test failed")?;
    writeln!(
        out,
        "hot ok: {} bytes, sha256 {}, write {:?}, read {:?}",
        report.bytes, report.sha256, report.write_elapsed, report.read_elapsed
    )?;

    if args.cold {
        let vault = ctx.clients.require_cold()?;
        vault_self_test(vault, &ctx.settings.transfer_config().scratch)
            .await
            .context("vault self-test failed")?;
        writeln!(out, "vault ok: {}", vault.name())?;
    }
    Ok(0)
}
