//! Daily dose forecasts using augurs (MSTL + ETS).
//!
//! - Series spanning at least two weeks use MSTL with a weekly period and an
//!   AutoETS trend model. The yearly period joins once two full years are
//!   available, so short histories never extrapolate an annual cycle.
//! - Shorter series fall back to non-seasonal AutoETS.
//!
//! Dates dropped by the outlier trimmer become NaN and are filled by a linear
//! interpolator before fitting.

use std::time::Instant;

use augurs::{
    ets::AutoETS,
    forecaster::{transforms::LinearInterpolator, Forecaster},
    mstl::MSTLModel,
    Forecast,
};
use chrono::{Duration, NaiveDate};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::models::{CleanedSeries, ForecastPoint, ForecastResult};
use crate::LOG_TARGET;

const WEEKLY_PERIOD: usize = 7;
const YEARLY_PERIOD: usize = 365;

/// Full cycles a period needs inside the history before it is decomposed.
const MIN_CYCLES: usize = 2;

/// Relative band used when a model returns no intervals.
const FALLBACK_BAND: f64 = 0.2;

#[derive(Debug, Clone, Copy)]
struct Deadline {
    started: Instant,
    budget: std::time::Duration,
}

impl Deadline {
    fn new(budget: std::time::Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    fn check(&self, entity: &str) -> Result<(), PipelineError> {
        if self.started.elapsed() > self.budget {
            return Err(PipelineError::FitTimeout {
                entity: entity.to_string(),
                budget: self.budget,
            });
        }
        Ok(())
    }
}

/// In-sample fit plus the projection past the last date.
struct Projection {
    fitted: Forecast,
    future: Forecast,
}

/// Seasonal periods worth decomposing for a history of `span_days` days.
pub fn seasonal_periods(span_days: usize) -> Vec<usize> {
    [WEEKLY_PERIOD, YEARLY_PERIOD]
        .into_iter()
        .filter(|period| span_days >= MIN_CYCLES * period)
        .collect()
}

/// Fits `series` and projects `config.horizon_days` days past its last date.
///
/// Rows cover every historical date followed by the horizon. All three columns
/// are clamped at zero and `lower <= point <= upper` on every row.
pub fn forecast(
    series: &CleanedSeries,
    config: &PipelineConfig,
) -> Result<ForecastResult, PipelineError> {
    if series.len() < config.min_points {
        return Err(PipelineError::InsufficientData {
            entity: series.entity_id.clone(),
            required: config.min_points,
            actual: series.len(),
        });
    }
    let (Some(first), Some(last)) = (series.points.first(), series.points.last()) else {
        return Err(PipelineError::InsufficientData {
            entity: series.entity_id.clone(),
            required: config.min_points,
            actual: 0,
        });
    };
    let (origin, last) = (first.date, last.date);

    let deadline = Deadline::new(config.fit_timeout);
    let values = daily_values(series, origin);
    let periods = seasonal_periods(values.len());
    let entity = series.entity_id.as_str();

    let projection = if periods.is_empty() {
        forecast_with_ets(entity, &values, config, &deadline)?
    } else {
        forecast_with_mstl(entity, &values, periods.clone(), config, &deadline)?
    };

    if projection.future.point.len() != config.horizon_days
        || projection.future.point.iter().any(|v| !v.is_finite())
    {
        return Err(numerical(entity, "projection", "non-finite or truncated forecast"));
    }

    let mut points = series
        .points
        .iter()
        .map(|p| bounded(&projection.fitted, (p.date - origin).num_days() as usize, p.date))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| numerical(entity, "in-sample", "fitted values do not cover the history"))?;
    let history_len = points.len();

    let horizon = (0..config.horizon_days)
        .map(|i| bounded(&projection.future, i, last + Duration::days(i as i64 + 1)))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| numerical(entity, "projection", "intervals do not cover the horizon"))?;
    points.extend(horizon);

    log::debug!(
        target: LOG_TARGET,
        "fitted {entity} on {history_len} points (periods {periods:?}) in {:?}",
        deadline.started.elapsed()
    );

    Ok(ForecastResult {
        entity_id: series.entity_id.clone(),
        history_len,
        interval_width: config.interval_width,
        seasonal_periods: periods,
        points,
    })
}

/// One value per calendar day from `origin`, NaN where no observation survived.
fn daily_values(series: &CleanedSeries, origin: NaiveDate) -> Vec<f64> {
    let span = series
        .points
        .last()
        .map_or(0, |p| (p.date - origin).num_days() as usize + 1);

    let mut values = vec![f64::NAN; span];
    for point in &series.points {
        values[(point.date - origin).num_days() as usize] = point.value;
    }
    values
}

fn bounded(forecast: &Forecast, index: usize, date: NaiveDate) -> Option<ForecastPoint> {
    let estimate = *forecast.point.get(index)?;
    let point_estimate = estimate.max(0.0);

    let (lower, upper) = match &forecast.intervals {
        Some(intervals) => (*intervals.lower.get(index)?, *intervals.upper.get(index)?),
        None => (estimate * (1.0 - FALLBACK_BAND), estimate * (1.0 + FALLBACK_BAND)),
    };

    Some(ForecastPoint {
        date,
        point_estimate,
        lower_bound: lower.max(0.0).min(point_estimate),
        upper_bound: upper.max(point_estimate),
    })
}

/// Forecast using MSTL (seasonal decomposition) with an AutoETS trend model.
fn forecast_with_mstl(
    entity: &str,
    values: &[f64],
    periods: Vec<usize>,
    config: &PipelineConfig,
    deadline: &Deadline,
) -> Result<Projection, PipelineError> {
    let ets = AutoETS::non_seasonal().into_trend_model();
    let mstl = MSTLModel::new(periods, ets);

    let transformers: Vec<Box<dyn augurs::forecaster::Transformer>> =
        vec![Box::new(LinearInterpolator::default())];
    let mut forecaster = Forecaster::new(mstl).with_transformers(transformers);

    forecaster
        .fit(values)
        .map_err(|e| numerical(entity, "MSTL fit", e))?;
    deadline.check(entity)?;

    let fitted = forecaster
        .predict_in_sample(config.interval_width)
        .map_err(|e| numerical(entity, "MSTL in-sample", e))?;
    let future = forecaster
        .predict(config.horizon_days, config.interval_width)
        .map_err(|e| numerical(entity, "MSTL predict", e))?;
    deadline.check(entity)?;

    Ok(Projection { fitted, future })
}

/// Forecast using simple AutoETS (no seasonal decomposition).
fn forecast_with_ets(
    entity: &str,
    values: &[f64],
    config: &PipelineConfig,
    deadline: &Deadline,
) -> Result<Projection, PipelineError> {
    let ets = AutoETS::non_seasonal();

    let transformers: Vec<Box<dyn augurs::forecaster::Transformer>> =
        vec![Box::new(LinearInterpolator::default())];
    let mut forecaster = Forecaster::new(ets).with_transformers(transformers);

    forecaster
        .fit(values)
        .map_err(|e| numerical(entity, "ETS fit", e))?;
    deadline.check(entity)?;

    let fitted = forecaster
        .predict_in_sample(config.interval_width)
        .map_err(|e| numerical(entity, "ETS in-sample", e))?;
    let future = forecaster
        .predict(config.horizon_days, config.interval_width)
        .map_err(|e| numerical(entity, "ETS predict", e))?;
    deadline.check(entity)?;

    Ok(Projection { fitted, future })
}

fn numerical(entity: &str, stage: &str, reason: impl std::fmt::Display) -> PipelineError {
    PipelineError::NumericalFailure {
        entity: entity.to_string(),
        reason: format!("{stage}: {reason}"),
    }
}
