use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::loader::Dataset;
use crate::models::{CleanedSeries, ObservedPoint, ObservedSeries};
use crate::LOG_TARGET;

/// Non-null daily counts of one entity in ascending date order.
///
/// An unknown entity yields an empty series rather than an error.
pub fn observed_series(dataset: &Dataset, entity_id: &str) -> ObservedSeries {
    let mut points: Vec<ObservedPoint> = dataset
        .records()
        .iter()
        .filter(|record| record.entity_id == entity_id)
        .filter_map(|record| {
            record.daily_count.map(|count| ObservedPoint {
                date: record.date,
                value: count as f64,
            })
        })
        .collect();

    points.sort_by_key(|point| point.date);

    ObservedSeries {
        entity_id: entity_id.to_string(),
        points,
    }
}

/// Drops zero and negative counts, which are invalid for model fitting.
pub fn positive_only(series: &ObservedSeries) -> ObservedSeries {
    ObservedSeries {
        entity_id: series.entity_id.clone(),
        points: series
            .points
            .iter()
            .filter(|point| point.value > 0.0)
            .copied()
            .collect(),
    }
}

/// Quantile with linear interpolation between order statistics.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

/// Removes reporting spikes above the `q` quantile.
///
/// Every row strictly above the threshold goes. Rows equal to it stay, so a
/// plateau is never trimmed.
pub fn trim_outliers(series: &ObservedSeries, q: f64) -> CleanedSeries {
    let values = series.values();
    let Some(threshold) = quantile(&values, q) else {
        return CleanedSeries {
            entity_id: series.entity_id.clone(),
            threshold: 0.0,
            removed: 0,
            points: Vec::new(),
        };
    };

    let points: Vec<_> = series
        .points
        .iter()
        .filter(|point| point.value <= threshold)
        .copied()
        .collect();

    CleanedSeries {
        entity_id: series.entity_id.clone(),
        threshold,
        removed: series.len() - points.len(),
        points,
    }
}

/// Filter, positivity check and trimming for one entity.
pub fn clean_entity(
    dataset: &Dataset,
    entity_id: &str,
    config: &PipelineConfig,
) -> Result<CleanedSeries, PipelineError> {
    let observed = positive_only(&observed_series(dataset, entity_id));
    ensure_points(entity_id, observed.len(), config.min_points)?;

    let cleaned = trim_outliers(&observed, config.outlier_quantile);
    log::debug!(
        target: LOG_TARGET,
        "{entity_id}: trimmed {} of {} rows above {:.1}",
        cleaned.removed,
        observed.len(),
        cleaned.threshold
    );
    ensure_points(entity_id, cleaned.len(), config.min_points)?;
    Ok(cleaned)
}

fn ensure_points(entity_id: &str, actual: usize, required: usize) -> Result<(), PipelineError> {
    if actual < required {
        return Err(PipelineError::InsufficientData {
            entity: entity_id.to_string(),
            required,
            actual,
        });
    }
    Ok(())
}
