//! Fleet, growth and cost projections from site measurements.

use coldkeep_core::limits::BYTES_PER_GB;
use coldkeep_retention::SmartTieredPolicy;
use serde::Serialize;

use crate::estimator::SiteMeasurement;

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn scaled(bytes: u64, factor: f64) -> u64 {
    (bytes as f64 * factor).round() as u64
}

#[allow(clippy::cast_precision_loss)]
fn gigabytes(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GB
}

/// Storage needed by a fleet of similar sites under a tiered policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FleetProjection {
    /// Number of sites.
    pub site_count: usize,
    /// Compressed backup size of one site.
    pub per_site_bytes: u64,
    /// Safety margin applied, in percent.
    pub buffer_percent: f64,
    /// Hot-tier bytes: daily backups.
    pub hot_bytes: u64,
    /// Cold-tier bytes: weekly and monthly backups.
    pub cold_bytes: u64,
}

impl FleetProjection {
    /// Projects one site's measurement across `site_count` sites.
    ///
    /// The hot tier holds `keep_daily` backups per site and the cold tier
    /// `keep_weekly + keep_monthly`; both are scaled by
    /// `1 + buffer_percent / 100`.
    ///
    /// # Panics
    ///
    /// Panics if `buffer_percent` is negative or NaN.
    #[must_use]
    pub fn from_measurement(
        measurement: &SiteMeasurement,
        site_count: usize,
        retention: &SmartTieredPolicy,
        buffer_percent: f64,
    ) -> Self {
        assert!(buffer_percent >= 0.0, "buffer must be a non-negative number");

        let per_site = measurement.compressed_size;
        let factor = 1.0 + buffer_percent / 100.0;
        let hot_copies = copies(site_count, retention.keep_daily);
        let cold_copies = copies(
            site_count,
            retention.keep_weekly.saturating_add(retention.keep_monthly),
        );

        Self {
            site_count,
            per_site_bytes: per_site,
            buffer_percent,
            hot_bytes: scaled(per_site.saturating_mul(hot_copies), factor),
            cold_bytes: scaled(per_site.saturating_mul(cold_copies), factor),
        }
    }

    /// Hot plus cold bytes.
    #[must_use]
    pub const fn total_bytes(&self) -> u64 {
        self.hot_bytes.saturating_add(self.cold_bytes)
    }
}

/// Backups kept across the fleet, saturating at `u64::MAX`.
fn copies(site_count: usize, per_site: usize) -> u64 {
    u64::try_from(site_count.saturating_mul(per_site)).unwrap_or(u64::MAX)
}

/// Fleet size after some months of growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GrowthProjection {
    /// Months from now (1-based).
    pub month: u32,
    /// Projected hot-tier bytes.
    pub hot_bytes: u64,
    /// Projected cold-tier bytes.
    pub cold_bytes: u64,
}

/// Compounds `fleet` by `monthly_rate_percent` for each of `months` months.
///
/// The hot/cold split of the fleet is preserved.
#[must_use]
pub fn growth_projection(
    fleet: &FleetProjection,
    months: u32,
    monthly_rate_percent: f64,
) -> Vec<GrowthProjection> {
    let rate = 1.0 + monthly_rate_percent / 100.0;
    (1..=months)
        .map(|month| {
            let factor = rate.powf(f64::from(month));
            GrowthProjection {
                month,
                hot_bytes: scaled(fleet.hot_bytes, factor),
                cold_bytes: scaled(fleet.cold_bytes, factor),
            }
        })
        .collect()
}

/// Monthly cost of the cold tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostEstimate {
    /// Cold-tier size in GB.
    pub cold_gb: f64,
    /// Storage price per GB-month.
    pub price_per_gb_month: f64,
    /// `cold_gb * price_per_gb_month`.
    pub monthly_storage_cost: f64,
    /// Retrieval price per GB, if known.
    pub retrieval_price_per_gb: Option<f64>,
    /// Cost of retrieving the whole cold tier once.
    pub full_retrieval_cost: Option<f64>,
}

impl CostEstimate {
    /// Prices `cold_bytes` of archival storage.
    #[must_use]
    pub fn new(cold_bytes: u64, price_per_gb_month: f64, retrieval_price_per_gb: Option<f64>) -> Self {
        let cold_gb = gigabytes(cold_bytes);
        Self {
            cold_gb,
            price_per_gb_month,
            monthly_storage_cost: cold_gb * price_per_gb_month,
            retrieval_price_per_gb,
            full_retrieval_cost: retrieval_price_per_gb.map(|price| cold_gb * price),
        }
    }
}

/// Complete capacity estimate for a fleet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapacityEstimate {
    /// Per-site measurements.
    pub sites: Vec<SiteMeasurement>,
    /// Fleet totals.
    pub fleet: FleetProjection,
    /// Month-by-month growth, if requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub growth: Option<Vec<GrowthProjection>>,
    /// Cold-tier cost, if a price was given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostEstimate>,
}

impl CapacityEstimate {
    /// Creates an estimate without growth or cost figures.
    #[must_use]
    pub const fn new(sites: Vec<SiteMeasurement>, fleet: FleetProjection) -> Self {
        Self {
            sites,
            fleet,
            growth: None,
            cost: None,
        }
    }

    /// Adds a growth projection.
    #[must_use]
    pub fn with_growth(mut self, growth: Vec<GrowthProjection>) -> Self {
        self.growth = Some(growth);
        self
    }

    /// Adds a cost estimate.
    #[must_use]
    pub fn with_cost(mut self, cost: CostEstimate) -> Self {
        self.cost = Some(cost);
        self
    }
}
