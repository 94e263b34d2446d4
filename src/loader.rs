use std::collections::{BTreeSet, HashMap};
use std::io::Read;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::OnceCell;

use crate::error::PipelineError;
use crate::models::{HeadlineMetrics, RawRecord};
use crate::LOG_TARGET;

const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Where the vaccination table lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DatasetSource {
    Url(String),
    Path(PathBuf),
}

impl DatasetSource {
    pub fn parse(value: &str) -> Self {
        if value.starts_with("http://") || value.starts_with("https://") {
            DatasetSource::Url(value.to_string())
        } else {
            DatasetSource::Path(PathBuf::from(value))
        }
    }

    /// Cache key for this source.
    pub fn identity(&self) -> String {
        match self {
            DatasetSource::Url(url) => url.clone(),
            DatasetSource::Path(path) => path.display().to_string(),
        }
    }
}

/// The full record set of one source, read-only once loaded.
#[derive(Debug, Clone)]
pub struct Dataset {
    source: String,
    column_count: usize,
    records: Vec<RawRecord>,
}

impl Dataset {
    #[cfg(test)]
    pub fn from_records(source: &str, records: Vec<RawRecord>) -> Self {
        Self {
            source: source.to_string(),
            column_count: 6,
            records,
        }
    }

    pub fn from_reader<R: Read>(source: &str, reader: R) -> Result<Self, PipelineError> {
        let mut reader = csv::Reader::from_reader(reader);
        let column_count = reader
            .headers()
            .map_err(|e| PipelineError::unavailable(source, e))?
            .len();

        let mut records = Vec::new();
        for result in reader.deserialize::<RawRecord>() {
            let record = result.map_err(|e| PipelineError::unavailable(source, e))?;
            records.push(record);
        }

        Ok(Self {
            source: source.to_string(),
            column_count,
            records,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn column_count(&self) -> usize {
        self.column_count
    }

    pub fn records(&self) -> &[RawRecord] {
        &self.records
    }

    pub fn head(&self, n: usize) -> &[RawRecord] {
        &self.records[..n.min(self.records.len())]
    }

    /// Distinct entity ids in lexical order.
    pub fn entities(&self) -> Vec<String> {
        self.records
            .iter()
            .map(|record| record.entity_id.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn headline_metrics(&self, entity_id: &str) -> HeadlineMetrics {
        let rows = self
            .records
            .iter()
            .filter(|record| record.entity_id == entity_id);

        let mut metrics = HeadlineMetrics {
            entity_id: entity_id.to_string(),
            ..HeadlineMetrics::default()
        };
        for record in rows {
            metrics.max_cumulative_total = metrics.max_cumulative_total.max(record.cumulative_total);
            metrics.max_people_partial = metrics.max_people_partial.max(record.people_partial);
            metrics.max_people_full = metrics.max_people_full.max(record.people_full);
        }
        metrics
    }
}

/// Fetches and parses a source. Any failure is `DataUnavailable`.
pub async fn load(source: &DatasetSource) -> Result<Dataset, PipelineError> {
    let identity = source.identity();
    let bytes = match source {
        DatasetSource::Url(url) => fetch(url).await?,
        DatasetSource::Path(path) => tokio::fs::read(path)
            .await
            .map_err(|e| PipelineError::unavailable(&identity, e))?,
    };

    let dataset = Dataset::from_reader(&identity, bytes.as_slice())?;
    log::info!(
        target: LOG_TARGET,
        "loaded {} rows x {} columns from {identity}",
        dataset.len(),
        dataset.column_count()
    );
    Ok(dataset)
}

async fn fetch(url: &str) -> Result<Vec<u8>, PipelineError> {
    let client = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(|e| PipelineError::unavailable(url, e))?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| PipelineError::unavailable(url, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(PipelineError::unavailable(url, format!("HTTP status {status}")));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| PipelineError::unavailable(url, e))?;
    Ok(body.to_vec())
}

/// Load-once store of datasets keyed by source identity.
///
/// Callers asking for the same source concurrently share a single load. A failed
/// load leaves the slot empty so that the next caller retries.
#[derive(Debug, Default)]
pub struct DatasetCache {
    slots: Mutex<HashMap<String, Arc<OnceCell<Arc<Dataset>>>>>,
}

impl DatasetCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_load(&self, source: &DatasetSource) -> Result<Arc<Dataset>, PipelineError> {
        let slot = self.slot(&source.identity());
        if let Some(dataset) = slot.get() {
            log::debug!(target: LOG_TARGET, "cache hit for {}", source.identity());
            return Ok(dataset.clone());
        }

        let dataset = slot
            .get_or_try_init(|| async { load(source).await.map(Arc::new) })
            .await?;
        Ok(dataset.clone())
    }

    pub fn cached_sources(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.values().filter(|slot| slot.initialized()).count()
    }

    fn slot(&self, identity: &str) -> Arc<OnceCell<Arc<Dataset>>> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Write;

    const SAMPLE: &str = "\
location,iso_code,date,total_vaccinations,people_vaccinated,people_fully_vaccinated,daily_vaccinations_raw,daily_vaccinations
Chile,CHL,2021-02-03,100,80,20,,
Chile,CHL,2021-02-04,250.0,180,70,150,150
Brazil,BRA,2021-02-04,,,,,900
";

    fn write_sample(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write sample");
        file
    }

    #[test]
    fn parses_rows_and_nullable_counts() {
        let dataset = Dataset::from_reader("sample", SAMPLE.as_bytes()).unwrap();
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.column_count(), 8);

        let first = &dataset.records()[0];
        assert_eq!(first.entity_id, "Chile");
        assert_eq!(first.date, NaiveDate::from_ymd_opt(2021, 2, 3).unwrap());
        assert_eq!(first.daily_count, None);
        assert_eq!(dataset.records()[1].cumulative_total, Some(250));
        assert_eq!(dataset.records()[2].daily_count, Some(900));
    }

    #[test]
    fn entities_are_sorted_and_unique() {
        let dataset = Dataset::from_reader("sample", SAMPLE.as_bytes()).unwrap();
        assert_eq!(dataset.entities(), vec!["Brazil".to_string(), "Chile".to_string()]);
        assert_eq!(dataset.head(2).len(), 2);
        assert_eq!(dataset.head(50).len(), 3);
    }

    #[test]
    fn headline_metrics_take_maxima_per_entity() {
        let dataset = Dataset::from_reader("sample", SAMPLE.as_bytes()).unwrap();
        let chile = dataset.headline_metrics("Chile");
        assert_eq!(chile.max_cumulative_total, Some(250));
        assert_eq!(chile.max_people_partial, Some(180));
        assert_eq!(chile.max_people_full, Some(70));

        let brazil = dataset.headline_metrics("Brazil");
        assert_eq!(brazil.max_cumulative_total, None);
    }

    #[test]
    fn missing_column_is_data_unavailable() {
        let drifted = "location,date,total_vaccinations\nChile,2021-02-03,1\n";
        let err = Dataset::from_reader("drifted", drifted.as_bytes()).unwrap_err();
        assert!(matches!(err, PipelineError::DataUnavailable { .. }));
    }

    #[test]
    fn fractional_count_is_rejected() {
        let bad = SAMPLE.replace("250.0", "250.5");
        let err = Dataset::from_reader("bad", bad.as_bytes()).unwrap_err();
        assert!(matches!(err, PipelineError::DataUnavailable { .. }));
    }

    #[test]
    fn source_kind_follows_scheme() {
        assert!(matches!(
            DatasetSource::parse("https://example.org/v.csv"),
            DatasetSource::Url(_)
        ));
        assert!(matches!(
            DatasetSource::parse("data/v.csv"),
            DatasetSource::Path(_)
        ));
    }

    #[tokio::test]
    async fn cache_loads_each_source_once() {
        let file = write_sample(SAMPLE);
        let source = DatasetSource::Path(file.path().to_path_buf());
        let cache = DatasetCache::new();

        let first = cache.get_or_load(&source).await.unwrap();
        let second = cache.get_or_load(&source).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.cached_sources(), 1);
    }

    #[tokio::test]
    async fn failed_load_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("later.csv");
        let source = DatasetSource::Path(path.clone());
        let cache = DatasetCache::new();

        let err = cache.get_or_load(&source).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(cache.cached_sources(), 0);

        std::fs::write(&path, SAMPLE).unwrap();
        let dataset = cache.get_or_load(&source).await.unwrap();
        assert_eq!(dataset.len(), 3);
    }
}
