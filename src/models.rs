use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One row of the source table.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RawRecord {
    #[serde(rename = "location")]
    pub entity_id: String,
    pub date: NaiveDate,
    #[serde(rename = "daily_vaccinations", deserialize_with = "count::deserialize")]
    pub daily_count: Option<i64>,
    #[serde(rename = "total_vaccinations", deserialize_with = "count::deserialize")]
    pub cumulative_total: Option<i64>,
    #[serde(rename = "people_vaccinated", deserialize_with = "count::deserialize")]
    pub people_partial: Option<i64>,
    #[serde(
        rename = "people_fully_vaccinated",
        deserialize_with = "count::deserialize"
    )]
    pub people_full: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ObservedPoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// Daily counts for one entity, sorted ascending by date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservedSeries {
    pub entity_id: String,
    pub points: Vec<ObservedPoint>,
}

impl ObservedSeries {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|point| point.value).collect()
    }
}

/// An observed series after outlier trimming, ready for model fitting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanedSeries {
    pub entity_id: String,
    pub threshold: f64,
    pub removed: usize,
    pub points: Vec<ObservedPoint>,
}

impl CleanedSeries {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn mean(&self) -> f64 {
        if self.points.is_empty() {
            return 0.0;
        }
        self.points.iter().map(|point| point.value).sum::<f64>() / self.points.len() as f64
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.points.iter().any(|point| point.date == date)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub point_estimate: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

/// Fitted values over the history followed by `horizon_days` projected rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastResult {
    pub entity_id: String,
    pub history_len: usize,
    pub interval_width: f64,
    /// Periods decomposed by MSTL; empty when the series was too short.
    pub seasonal_periods: Vec<usize>,
    pub points: Vec<ForecastPoint>,
}

impl ForecastResult {
    pub fn horizon(&self) -> &[ForecastPoint] {
        &self.points[self.history_len..]
    }

    pub fn total_over_horizon(&self) -> f64 {
        self.horizon().iter().map(|point| point.point_estimate).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendLabel {
    Increasing,
    Decreasing,
}

impl std::fmt::Display for TrendLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrendLabel::Increasing => write!(f, "increasing"),
            TrendLabel::Decreasing => write!(f, "decreasing"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySummary {
    pub entity_id: String,
    pub total_predicted_over_horizon: f64,
    pub trend_label: TrendLabel,
}

/// Summaries sorted by predicted total, largest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RankingTable {
    pub rows: Vec<EntitySummary>,
}

impl RankingTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HeadlineMetrics {
    pub entity_id: String,
    pub max_cumulative_total: Option<i64>,
    pub max_people_partial: Option<i64>,
    pub max_people_full: Option<i64>,
}

mod count {
    use serde::{de, Deserialize, Deserializer};

    /// Accepts `1234`, `1234.0` or an empty cell.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: Option<f64> = Option::deserialize(deserializer)?;
        match value {
            None => Ok(None),
            Some(v) if v.is_finite() && v.fract() == 0.0 => Ok(Some(v as i64)),
            Some(v) => Err(de::Error::custom(format!("expected a whole count, got {v}"))),
        }
    }
}
