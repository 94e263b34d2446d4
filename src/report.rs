use std::fmt::Write;

use crate::models::HeadlineMetrics;
use crate::rank::Ranking;

pub fn format_count(value: Option<i64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| v.to_string())
}

pub fn build_report(
    source: &str,
    horizon_days: usize,
    metrics: &[HeadlineMetrics],
    ranking: &Ranking,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Vaccination Forecast Report");
    let _ = writeln!(
        output,
        "Source: {} ({}-day horizon)",
        source, horizon_days
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Headline Metrics");

    if metrics.is_empty() {
        let _ = writeln!(output, "No entities selected.");
    } else {
        let _ = writeln!(output, "| Entity | Total doses | At least one dose | Fully vaccinated |");
        let _ = writeln!(output, "|---|---:|---:|---:|");
        for entry in metrics {
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} |",
                entry.entity_id,
                format_count(entry.max_cumulative_total),
                format_count(entry.max_people_partial),
                format_count(entry.max_people_full)
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Predicted Doses");

    if ranking.table.is_empty() {
        let _ = writeln!(output, "No entity produced a usable forecast.");
    } else {
        let _ = writeln!(output, "| Rank | Entity | Predicted total | Trend |");
        let _ = writeln!(output, "|---:|---|---:|---|");
        for (position, row) in ranking.table.rows.iter().enumerate() {
            let _ = writeln!(
                output,
                "| {} | {} | {:.0} | {} |",
                position + 1,
                row.entity_id,
                row.total_predicted_over_horizon,
                row.trend_label
            );
        }
    }

    if !ranking.skipped.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Warnings");
        for skipped in &ranking.skipped {
            let _ = writeln!(output, "- {}: {}", skipped.entity_id, skipped.error);
        }
    }

    output
}
