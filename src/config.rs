use std::time::Duration;

use crate::error::PipelineError;

pub const DEFAULT_SOURCE: &str =
    "https://raw.githubusercontent.com/owid/covid-19-data/master/public/data/vaccinations/vaccinations.csv";
pub const DEFAULT_HORIZON_DAYS: usize = 30;
pub const DEFAULT_MIN_POINTS: usize = 10;
pub const DEFAULT_FIT_TIMEOUT_MS: u64 = 10_000;
/// Ten years, which keeps every horizon date inside the calendar range.
pub const MAX_HORIZON_DAYS: usize = 3_650;

/// Knobs shared by every pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub horizon_days: usize,
    pub min_points: usize,
    pub outlier_quantile: f64,
    pub interval_width: f64,
    pub fit_timeout: Duration,
    /// Worker threads for batch forecasting, 0 means one per CPU.
    pub jobs: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            horizon_days: DEFAULT_HORIZON_DAYS,
            min_points: DEFAULT_MIN_POINTS,
            outlier_quantile: 0.99,
            interval_width: 0.80,
            fit_timeout: Duration::from_millis(DEFAULT_FIT_TIMEOUT_MS),
            jobs: 0,
        }
    }
}

impl PipelineConfig {
    pub fn with_horizon_days(mut self, horizon_days: usize) -> Self {
        self.horizon_days = horizon_days;
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_fit_timeout(mut self, fit_timeout: Duration) -> Self {
        self.fit_timeout = fit_timeout;
        self
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.horizon_days == 0 {
            return Err(PipelineError::InvalidConfig(
                "horizon_days must be > 0".to_string(),
            ));
        }
        if self.horizon_days > MAX_HORIZON_DAYS {
            return Err(PipelineError::InvalidConfig(format!(
                "horizon_days must be at most {MAX_HORIZON_DAYS}, got {}",
                self.horizon_days
            )));
        }
        if self.min_points < 2 {
            return Err(PipelineError::InvalidConfig(
                "min_points must be at least 2".to_string(),
            ));
        }
        if !(self.outlier_quantile > 0.0 && self.outlier_quantile < 1.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "outlier_quantile must lie in (0, 1), got {}",
                self.outlier_quantile
            )));
        }
        if !(self.interval_width > 0.0 && self.interval_width < 1.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "interval_width must lie in (0, 1), got {}",
                self.interval_width
            )));
        }
        if self.fit_timeout.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "fit_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
