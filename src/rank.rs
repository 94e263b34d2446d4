use std::cmp::Ordering;
use std::collections::HashSet;

use rayon::prelude::*;
use serde::Serialize;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::forecast;
use crate::loader::Dataset;
use crate::models::{CleanedSeries, EntitySummary, ForecastResult, RankingTable};
use crate::series;
use crate::trend;
use crate::LOG_TARGET;

/// Everything the pipeline derives for one entity.
#[derive(Debug, Clone, Serialize)]
pub struct EntityForecast {
    pub cleaned: CleanedSeries,
    pub forecast: ForecastResult,
    pub summary: EntitySummary,
}

#[derive(Debug)]
pub struct SkippedEntity {
    pub entity_id: String,
    pub error: PipelineError,
}

#[derive(Debug, Default)]
pub struct Ranking {
    pub table: RankingTable,
    pub skipped: Vec<SkippedEntity>,
}

impl Ranking {
    /// `EmptyResult` when no entity survived, for the caller to surface as a warning.
    pub fn empty_warning(&self) -> Option<PipelineError> {
        self.table.is_empty().then_some(PipelineError::EmptyResult)
    }
}

/// Filter, trim, fit and summarise a single entity.
pub fn forecast_entity(
    dataset: &Dataset,
    entity_id: &str,
    config: &PipelineConfig,
) -> Result<EntityForecast, PipelineError> {
    config.validate()?;
    let cleaned = series::clean_entity(dataset, entity_id, config)?;
    let forecast = forecast::forecast(&cleaned, config)?;

    let summary = EntitySummary {
        entity_id: entity_id.to_string(),
        total_predicted_over_horizon: forecast.total_over_horizon(),
        trend_label: trend::classify(&forecast, &cleaned),
    };

    Ok(EntityForecast {
        cleaned,
        forecast,
        summary,
    })
}

/// Forecasts every selected entity in parallel and ranks the survivors.
///
/// Entities that fail with a recoverable error are listed in `skipped`; the batch
/// itself only fails on a bad configuration.
pub fn rank_entities(
    dataset: &Dataset,
    entity_ids: &[String],
    config: &PipelineConfig,
) -> Result<Ranking, PipelineError> {
    rank_with(dataset, entity_ids, config, forecast_entity)
}

fn rank_with<F>(
    dataset: &Dataset,
    entity_ids: &[String],
    config: &PipelineConfig,
    forecast_one: F,
) -> Result<Ranking, PipelineError>
where
    F: Fn(&Dataset, &str, &PipelineConfig) -> Result<EntityForecast, PipelineError> + Sync,
{
    config.validate()?;

    let mut seen = HashSet::new();
    let selection: Vec<&str> = entity_ids
        .iter()
        .map(String::as_str)
        .filter(|id| seen.insert(*id))
        .collect();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.jobs)
        .build()
        .map_err(|e| PipelineError::InvalidConfig(format!("failed to build worker pool: {e}")))?;

    let outcomes: Vec<(&str, Result<EntityForecast, PipelineError>)> = pool.install(|| {
        selection
            .par_iter()
            .map(|&id| (id, forecast_one(dataset, id, config)))
            .collect()
    });

    let mut summaries = Vec::with_capacity(outcomes.len());
    let mut skipped = Vec::new();
    for (entity_id, outcome) in outcomes {
        match outcome {
            Ok(entity) => summaries.push(entity.summary),
            Err(error) => {
                log::warn!(target: LOG_TARGET, "skipping {entity_id}: {error}");
                skipped.push(SkippedEntity {
                    entity_id: entity_id.to_string(),
                    error,
                });
            }
        }
    }

    let table = sort_summaries(summaries);
    log::info!(
        target: LOG_TARGET,
        "ranked {} of {} selected entities",
        table.len(),
        selection.len()
    );
    Ok(Ranking { table, skipped })
}

/// Largest predicted total first; equal totals fall back to entity id order.
pub fn sort_summaries(mut summaries: Vec<EntitySummary>) -> RankingTable {
    summaries.sort_by(|a, b| {
        b.total_predicted_over_horizon
            .partial_cmp(&a.total_predicted_over_horizon)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
    RankingTable { rows: summaries }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RawRecord, TrendLabel};
    use crate::series::tests::daily_records;
    use std::time::Duration;

    fn dataset(parts: Vec<Vec<RawRecord>>) -> Dataset {
        Dataset::from_records("mem", parts.into_iter().flatten().collect())
    }

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn summary(entity: &str, total: f64) -> EntitySummary {
        EntitySummary {
            entity_id: entity.to_string(),
            total_predicted_over_horizon: total,
            trend_label: TrendLabel::Decreasing,
        }
    }

    #[test]
    fn sorts_descending_with_lexical_ties() {
        let table = sort_summaries(vec![
            summary("Peru", 10.0),
            summary("Chile", 50.0),
            summary("Brazil", 10.0),
        ]);
        let order: Vec<_> = table.rows.iter().map(|row| row.entity_id.as_str()).collect();
        assert_eq!(order, vec!["Chile", "Brazil", "Peru"]);
    }

    #[test]
    fn short_entity_is_skipped_without_affecting_others() {
        let data = dataset(vec![
            daily_records("Chile", 400, |_| 1_000),
            daily_records("Tuvalu", 5, |_| 10),
        ]);
        let ranking = rank_entities(&data, &ids(&["Tuvalu", "Chile"]), &PipelineConfig::default()).unwrap();

        assert_eq!(ranking.table.len(), 1);
        let row = &ranking.table.rows[0];
        assert_eq!(row.entity_id, "Chile");
        assert!((row.total_predicted_over_horizon - 30_000.0).abs() < 3_000.0);

        assert_eq!(ranking.skipped.len(), 1);
        assert_eq!(ranking.skipped[0].entity_id, "Tuvalu");
        assert!(matches!(
            ranking.skipped[0].error,
            PipelineError::InsufficientData { actual: 5, .. }
        ));
        assert!(ranking.empty_warning().is_none());
    }

    #[test]
    fn unknown_entity_counts_as_insufficient() {
        let data = dataset(vec![daily_records("Chile", 30, |_| 100)]);
        let ranking = rank_entities(&data, &ids(&["Atlantis"]), &PipelineConfig::default()).unwrap();
        assert!(matches!(
            ranking.skipped[0].error,
            PipelineError::InsufficientData { actual: 0, .. }
        ));
        assert!(matches!(ranking.empty_warning(), Some(PipelineError::EmptyResult)));
    }

    #[test]
    fn equal_series_rank_lexically_regardless_of_selection_order() {
        let data = dataset(vec![
            daily_records("Peru", 90, |i| 300 + (i % 7) as i64 * 10),
            daily_records("Chile", 90, |i| 300 + (i % 7) as i64 * 10),
        ]);
        let ranking = rank_entities(&data, &ids(&["Peru", "Chile"]), &PipelineConfig::default()).unwrap();
        let order: Vec<_> = ranking.table.rows.iter().map(|r| r.entity_id.as_str()).collect();
        assert_eq!(order, vec!["Chile", "Peru"]);
    }

    #[test]
    fn worker_count_does_not_change_the_table() {
        let data = dataset(vec![
            daily_records("Chile", 120, |i| 1_000 + 5 * i as i64),
            daily_records("Peru", 120, |i| 3_000 - 3 * i as i64),
            daily_records("Brazil", 120, |i| 700 + (i % 7) as i64 * 50),
        ]);
        let selection = ids(&["Chile", "Peru", "Brazil", "Chile"]);

        let serial = rank_entities(&data, &selection, &PipelineConfig::default().with_jobs(1)).unwrap();
        let parallel = rank_entities(&data, &selection, &PipelineConfig::default().with_jobs(4)).unwrap();

        assert_eq!(serial.table, parallel.table);
        assert_eq!(serial.table.len(), 3);
        assert_eq!(serial.table.rows[0].entity_id, "Peru");
    }

    #[test]
    fn timed_out_entity_is_skipped_while_others_rank() {
        let data = dataset(vec![
            daily_records("Chile", 200, |_| 1_000),
            daily_records("Peru", 200, |_| 2_000),
            daily_records("Brazil", 200, |_| 500),
        ]);
        let selection = ids(&["Chile", "Peru", "Brazil"]);

        let ranking = rank_with(
            &data,
            &selection,
            &PipelineConfig::default(),
            |data: &Dataset, id: &str, config: &PipelineConfig| {
                if id == "Peru" {
                    let spent = config.clone().with_fit_timeout(Duration::from_nanos(1));
                    forecast_entity(data, id, &spent)
                } else {
                    forecast_entity(data, id, config)
                }
            },
        )
        .unwrap();

        let order: Vec<_> = ranking.table.rows.iter().map(|r| r.entity_id.as_str()).collect();
        assert_eq!(order, vec!["Chile", "Brazil"]);
        assert_eq!(ranking.skipped.len(), 1);
        assert_eq!(ranking.skipped[0].entity_id, "Peru");
        assert!(matches!(
            ranking.skipped[0].error,
            PipelineError::FitTimeout { .. }
        ));
        assert!(ranking.empty_warning().is_none());
    }

    #[test]
    fn entity_forecast_serialises_the_cleaned_series() {
        let data = dataset(vec![daily_records("Chile", 30, |i| if i == 3 { 40_000 } else { 900 })]);
        let entity = forecast_entity(&data, "Chile", &PipelineConfig::default()).unwrap();

        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["cleaned"]["removed"], 1);
        assert_eq!(json["cleaned"]["points"].as_array().unwrap().len(), 29);
        assert_eq!(json["summary"]["entity_id"], "Chile");
    }

    #[test]
    fn growing_entity_is_labelled_increasing() {
        let data = dataset(vec![daily_records("Chile", 200, |i| 100 + 10 * i as i64)]);
        let entity = forecast_entity(&data, "Chile", &PipelineConfig::default()).unwrap();
        assert_eq!(entity.summary.trend_label, TrendLabel::Increasing);
    }

    #[test]
    fn invalid_config_fails_the_batch() {
        let data = dataset(vec![daily_records("Chile", 30, |_| 100)]);
        let config = PipelineConfig::default().with_horizon_days(0);
        let err = rank_entities(&data, &ids(&["Chile"]), &config).unwrap_err();
        assert!(err.is_fatal());
    }
}
