use crate::models::{CleanedSeries, ForecastResult, TrendLabel};

/// Compares the projected mean against the historical mean. Ties are `Decreasing`.
pub fn classify(forecast: &ForecastResult, history: &CleanedSeries) -> TrendLabel {
    let horizon = forecast.horizon();
    if horizon.is_empty() {
        return TrendLabel::Decreasing;
    }
    let projected = forecast.total_over_horizon() / horizon.len() as f64;
    label_for(projected - history.mean())
}

pub fn label_for(delta: f64) -> TrendLabel {
    if delta > 0.0 {
        TrendLabel::Increasing
    } else {
        TrendLabel::Decreasing
    }
}
