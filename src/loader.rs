use crate::config::{CachePolicy, DataConfig};
use crate::dataset::{Column, ColumnType, Dataset, Value};
use crate::error::{DashboardError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

lazy_static! {
    static ref DATE_SHAPE: Regex =
        Regex::new(r"^\d{4}-\d{2}-\d{2}([T ]\d{2}:\d{2}(:\d{2}(\.\d+)?)?)?(Z|[+-]\d{2}:?\d{2})?$").unwrap();
    static ref EPOCH_SHAPE: Regex = Regex::new(r"^\d{9,10}$").unwrap();
}

/// Column names that are read as timestamps even when their cells look numeric
#[derive(Debug, Clone, Default)]
pub struct TypeHints {
    pub temporal: Vec<String>,
}

impl TypeHints {
    pub fn temporal(columns: &[String]) -> Self {
        Self {
            temporal: columns.to_vec(),
        }
    }

    fn is_temporal(&self, name: &str) -> bool {
        self.temporal.iter().any(|c| c == name)
    }
}

/// Somewhere the raw CSV text can come from
pub trait DataSource: Send + Sync {
    /// Human readable origin, used in logs and error messages
    fn describe(&self) -> String;

    /// Whether it is worth trying this source at all
    fn is_available(&self) -> bool {
        true
    }

    fn read(&self) -> Result<String>;
}

/// The bundled dataset on local disk
pub struct LocalCsv {
    path: PathBuf,
}

impl LocalCsv {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DataSource for LocalCsv {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn is_available(&self) -> bool {
        self.path.is_file()
    }

    fn read(&self) -> Result<String> {
        std::fs::read_to_string(&self.path)
            .map_err(|e| DashboardError::data_load(format!("{}: {}", self.path.display(), e)))
    }
}

/// HTTPS fallback serving the same CSV schema
pub struct RemoteCsv {
    url: String,
    timeout: Duration,
}

impl RemoteCsv {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }
}

impl DataSource for RemoteCsv {
    fn describe(&self) -> String {
        self.url.clone()
    }

    fn read(&self) -> Result<String> {
        let fail = |e: reqwest::Error| {
            if e.is_timeout() {
                DashboardError::data_load(format!("{}: timed out after {:?}", self.url, self.timeout))
            } else {
                DashboardError::data_load(format!("{}: {}", self.url, e))
            }
        };
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(&fail)?;
        client
            .get(&self.url)
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.text())
            .map_err(&fail)
    }
}

/// A memoized dataset together with when it was read
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub dataset: Arc<Dataset>,
    pub loaded_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, policy: &CachePolicy, now: Instant) -> bool {
        match policy.ttl() {
            None => true,
            Some(ttl) => now.saturating_duration_since(self.loaded_at) < ttl,
        }
    }
}

/// Supplies the bundled dataset, memoized according to a [`CachePolicy`]
///
/// Sources are tried in order and the first *available* one is read; a read
/// failure on that source is final and is not papered over by the next one.
/// Failed loads are never cached.
pub struct DatasetLoader {
    name: String,
    sources: Vec<Box<dyn DataSource>>,
    policy: CachePolicy,
    hints: TypeHints,
    cache: Mutex<Option<CacheEntry>>,
}

impl DatasetLoader {
    pub fn new(
        name: impl Into<String>,
        sources: Vec<Box<dyn DataSource>>,
        policy: CachePolicy,
        hints: TypeHints,
    ) -> Self {
        Self {
            name: name.into(),
            sources,
            policy,
            hints,
            cache: Mutex::new(None),
        }
    }

    /// Local file first, then the remote URL when one is configured
    pub fn from_config(config: &DataConfig) -> Self {
        let mut sources: Vec<Box<dyn DataSource>> = vec![Box::new(LocalCsv::new(&config.local_path))];
        if let Some(url) = &config.remote_url {
            sources.push(Box::new(RemoteCsv::new(url.clone(), config.fetch_timeout())));
        }
        let name = Path::new(&config.local_path)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("dataset")
            .to_string();
        Self::new(name, sources, config.cache, TypeHints::temporal(&config.temporal_columns))
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    pub fn load(&self) -> Result<Arc<Dataset>> {
        self.load_at(Instant::now())
    }

    /// Same as [`load`](Self::load) with an explicit clock reading
    pub fn load_at(&self, now: Instant) -> Result<Arc<Dataset>> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| DashboardError::data_load("dataset cache is poisoned"))?;

        if let Some(entry) = cache.as_ref() {
            if entry.is_fresh(&self.policy, now) {
                log::debug!("dataset '{}' served from cache", self.name);
                return Ok(Arc::clone(&entry.dataset));
            }
            log::info!("cached dataset '{}' expired, reloading", self.name);
        }

        let dataset = Arc::new(self.read_sources()?);
        *cache = Some(CacheEntry {
            dataset: Arc::clone(&dataset),
            loaded_at: now,
        });
        Ok(dataset)
    }

    /// Drops the memoized dataset so the next load reads the source again
    pub fn invalidate(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            *cache = None;
        }
    }

    fn read_sources(&self) -> Result<Dataset> {
        let mut skipped = Vec::new();
        for source in &self.sources {
            if !source.is_available() {
                skipped.push(source.describe());
                continue;
            }
            let text = source.read()?;
            let dataset = parse_csv(&self.name, &text, &self.hints)?;
            log::info!(
                "loaded dataset '{}' from {} ({} rows, {} columns)",
                self.name,
                source.describe(),
                dataset.len(),
                dataset.column_count()
            );
            return Ok(dataset);
        }
        Err(DashboardError::data_load(if skipped.is_empty() {
            "no data source configured".to_string()
        } else {
            format!("no data source available (tried {})", skipped.join(", "))
        }))
    }
}

/// Parses CSV text into a typed dataset
///
/// The first non-blank line is the header. Column types are inferred once,
/// here, and stored in the dataset.
///
/// # Arguments
/// * `name` - Name given to the dataset
/// * `text` - Whole CSV document
/// * `hints` - Columns forced to temporal when their cells allow it
///
/// # Returns
/// * The typed dataset, or `DataLoad` when the text is empty or ragged
pub fn parse_csv(name: &str, text: &str, hints: &TypeHints) -> Result<Dataset> {
    let mut lines = text
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty());

    let header = lines
        .next()
        .ok_or_else(|| DashboardError::data_load(format!("{}: CSV file is empty", name)))?;
    let names: Vec<String> = parse_csv_row(header)
        .into_iter()
        .map(|field| field.trim().to_string())
        .collect();

    let mut raw: Vec<Vec<String>> = Vec::new();
    for (line_no, line) in lines.enumerate() {
        let fields = parse_csv_row(line);
        if fields.len() != names.len() {
            return Err(DashboardError::data_load(format!(
                "{}: line {} has {} fields, header has {}",
                name,
                line_no + 2,
                fields.len(),
                names.len()
            )));
        }
        raw.push(fields);
    }

    let kinds: Vec<ColumnType> = names
        .iter()
        .enumerate()
        .map(|(c, column)| infer_type(raw.iter().map(|row| row[c].trim()), hints.is_temporal(column)))
        .collect();

    let rows = raw
        .iter()
        .map(|row| {
            row.iter()
                .zip(&kinds)
                .map(|(cell, kind)| convert(cell.trim(), *kind))
                .collect()
        })
        .collect();

    let columns = names
        .into_iter()
        .zip(kinds)
        .map(|(name, kind)| Column::new(name, kind))
        .collect();

    Dataset::new(name, columns, rows)
}

/// Parses an uploaded CSV; identical typing rules to the bundled dataset
pub fn parse_upload(name: &str, bytes: &[u8]) -> Result<Dataset> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| DashboardError::data_load(format!("{}: not UTF-8 text ({})", name, e)))?;
    parse_csv(name, text, &TypeHints::default())
}

fn infer_type<'a>(cells: impl Iterator<Item = &'a str>, temporal_hint: bool) -> ColumnType {
    let present: Vec<&str> = cells.filter(|cell| !cell.is_empty()).collect();
    if present.is_empty() {
        return ColumnType::Categorical;
    }

    if temporal_hint && present.iter().all(|cell| parse_timestamp(cell, true).is_some()) {
        return ColumnType::Temporal;
    }
    if present.iter().all(|cell| parse_number(cell).is_some()) {
        return ColumnType::Numeric;
    }
    if present.iter().all(|cell| parse_timestamp(cell, false).is_some()) {
        return ColumnType::Temporal;
    }
    ColumnType::Categorical
}

fn convert(cell: &str, kind: ColumnType) -> Value {
    if cell.is_empty() {
        return Value::Null;
    }
    match kind {
        ColumnType::Numeric => parse_number(cell).map(Value::Number).unwrap_or(Value::Null),
        ColumnType::Temporal => parse_timestamp(cell, true)
            .map(Value::Timestamp)
            .unwrap_or(Value::Null),
        ColumnType::Categorical => Value::Text(cell.to_string()),
    }
}

fn parse_number(cell: &str) -> Option<f64> {
    let n = cell.parse::<f64>().ok()?;
    // "NaN"/"inf" literals are text in a CSV, not numbers
    n.is_finite().then_some(n)
}

fn parse_timestamp(cell: &str, allow_epoch: bool) -> Option<DateTime<Utc>> {
    if allow_epoch && EPOCH_SHAPE.is_match(cell) {
        let secs = cell.parse::<i64>().ok()?;
        return Utc.timestamp_opt(secs, 0).single();
    }
    if !DATE_SHAPE.is_match(cell) {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(cell) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(cell, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(cell, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

// Split one CSV line into fields, honouring quotes and doubled quotes
fn parse_csv_row(line: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut current_field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                if in_quotes && chars.peek() == Some(&'"') {
                    current_field.push('"');
                    chars.next();
                } else {
                    in_quotes = !in_quotes;
                }
            }
            ',' if !in_quotes => {
                result.push(std::mem::take(&mut current_field));
            }
            _ => current_field.push(c),
        }
    }

    result.push(current_field);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        text: String,
        reads: Arc<AtomicUsize>,
    }

    impl DataSource for CountingSource {
        fn describe(&self) -> String {
            "memory".to_string()
        }

        fn read(&self) -> Result<String> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.text.clone())
        }
    }

    struct Absent;

    impl DataSource for Absent {
        fn describe(&self) -> String {
            "absent.csv".to_string()
        }

        fn is_available(&self) -> bool {
            false
        }

        fn read(&self) -> Result<String> {
            unreachable!("unavailable sources are never read")
        }
    }

    const MARKETS: &str = "symbol,price_usd,last_updated,note\n\
                           BTC,100.5,1512549554,\"hello, world\"\n\
                           ETH,,1512549555,plain\n";

    fn counting(policy: CachePolicy) -> (DatasetLoader, Arc<AtomicUsize>) {
        let reads = Arc::new(AtomicUsize::new(0));
        let source = CountingSource {
            text: MARKETS.to_string(),
            reads: Arc::clone(&reads),
        };
        let loader = DatasetLoader::new(
            "markets",
            vec![Box::new(source)],
            policy,
            TypeHints::temporal(&["last_updated".to_string()]),
        );
        (loader, reads)
    }

    #[test]
    fn splits_quoted_fields() {
        assert_eq!(parse_csv_row(r#"a,"b, c","say ""hi""""#), vec!["a", "b, c", r#"say "hi""#]);
        assert_eq!(parse_csv_row("a,,"), vec!["a", "", ""]);
    }

    #[test]
    fn infers_column_types_once() {
        let data = parse_csv("m", MARKETS, &TypeHints::temporal(&["last_updated".to_string()])).unwrap();
        assert_eq!(data.column("symbol").unwrap().kind, ColumnType::Categorical);
        assert_eq!(data.column("price_usd").unwrap().kind, ColumnType::Numeric);
        assert_eq!(data.column("last_updated").unwrap().kind, ColumnType::Temporal);
        assert_eq!(data.value(1, "price_usd"), Some(&Value::Null));
        assert_eq!(data.value(0, "note"), Some(&Value::Text("hello, world".to_string())));
    }

    #[test]
    fn epoch_columns_stay_numeric_without_a_hint() {
        let data = parse_csv("m", MARKETS, &TypeHints::default()).unwrap();
        assert_eq!(data.column("last_updated").unwrap().kind, ColumnType::Numeric);
    }

    #[test]
    fn iso_dates_are_temporal() {
        let data = parse_csv("d", "day,close\n2017-12-06,1.0\n2017-12-07 10:30:00,2.0\n", &TypeHints::default()).unwrap();
        assert_eq!(data.column("day").unwrap().kind, ColumnType::Temporal);
    }

    #[test]
    fn ragged_and_empty_files_fail_to_load() {
        assert!(matches!(
            parse_csv("m", "a,b\n1,2,3\n", &TypeHints::default()),
            Err(DashboardError::DataLoad(_))
        ));
        assert!(matches!(
            parse_csv("m", "\n\n", &TypeHints::default()),
            Err(DashboardError::DataLoad(_))
        ));
    }

    #[test]
    fn cache_hit_within_ttl_returns_same_dataset() {
        let (loader, reads) = counting(CachePolicy::Ttl { ttl_secs: 3600 });
        let start = Instant::now();
        let first = loader.load_at(start).unwrap();
        let second = loader.load_at(start + Duration::from_secs(60)).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn expired_entry_is_reloaded() {
        let (loader, reads) = counting(CachePolicy::Ttl { ttl_secs: 3600 });
        let start = Instant::now();
        let first = loader.load_at(start).unwrap();
        let later = loader.load_at(start + Duration::from_secs(3601)).unwrap();
        assert!(!Arc::ptr_eq(&first, &later));
        assert_eq!(reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn forever_policy_never_reloads() {
        let (loader, reads) = counting(CachePolicy::Forever);
        let start = Instant::now();
        loader.load_at(start).unwrap();
        loader.load_at(start + Duration::from_secs(10 * 24 * 3600)).unwrap();
        assert_eq!(reads.load(Ordering::SeqCst), 1);

        loader.invalidate();
        loader.load_at(start).unwrap();
        assert_eq!(reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn falls_back_past_unavailable_sources() {
        let reads = Arc::new(AtomicUsize::new(0));
        let loader = DatasetLoader::new(
            "markets",
            vec![
                Box::new(Absent),
                Box::new(CountingSource {
                    text: MARKETS.to_string(),
                    reads: Arc::clone(&reads),
                }),
            ],
            CachePolicy::Forever,
            TypeHints::default(),
        );
        assert_eq!(loader.load().unwrap().len(), 2);
        assert_eq!(reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn nothing_available_is_a_load_error() {
        let loader = DatasetLoader::new("markets", vec![Box::new(Absent)], CachePolicy::Forever, TypeHints::default());
        let err = loader.load().unwrap_err();
        assert_eq!(err, DashboardError::data_load("no data source available (tried absent.csv)"));
    }

    #[test]
    fn upload_must_be_utf8() {
        assert!(parse_upload("up", &[0xff, 0xfe]).is_err());
        let data = parse_upload("up", b"x,y\n1,2\n").unwrap();
        assert_eq!(data.name(), "up");
        assert_eq!(data.numeric_columns(), vec!["x", "y"]);
    }
}
