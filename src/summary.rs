use crate::dataset::{Column, ColumnType, Dataset, EntityFilter, Value};
use crate::error::{DashboardError, Result};
use serde::Serialize;

/// Headline metrics shown for the selected entity, in display order
pub const METRICS: [(&str, &str); 3] = [
    ("Price (USD)", "price_usd"),
    ("Market Cap (USD)", "market_cap_usd"),
    ("24h Volume (USD)", "24h_volume_usd"),
];

/// Dollar amount with two decimals and no thousands separator, e.g. `$1234.50`
pub fn format_usd(amount: f64) -> String {
    format!("${:.2}", amount)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricCard {
    pub label: &'static str,
    pub column: &'static str,
    pub value: Option<f64>,
    pub display: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityMetrics {
    pub entity: String,
    pub cards: Vec<MetricCard>,
}

/// Metric cards for the first row matching `filter`
///
/// # Errors
/// * `MissingColumn` when the filter column or a metric column is absent
/// * `EmptyDataset` when nothing matches, before any card is built
pub fn entity_metrics(data: &Dataset, filter: &EntityFilter) -> Result<EntityMetrics> {
    let matching = data.filter(filter)?;
    if matching.is_empty() {
        return Err(DashboardError::EmptyDataset {
            column: filter.column.clone(),
            value: filter.value.clone(),
        });
    }

    let cards = METRICS
        .iter()
        .map(|&(label, column)| {
            let position = matching.require_numeric(column, label)?;
            let value = matching.rows()[0][position].as_f64();
            Ok(MetricCard {
                label,
                column,
                value,
                display: value.map(format_usd).unwrap_or_else(|| "N/A".to_string()),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(EntityMetrics {
        entity: filter.value.clone(),
        cards,
    })
}

/// Size and schema of the active dataset
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetInfo {
    pub name: String,
    pub total_records: usize,
    pub total_columns: usize,
    pub columns: Vec<Column>,
    pub entity_column: String,

    /// Values offered in the entity picker; empty when the dataset has no entity column
    pub entity_options: Vec<String>,
}

pub fn dataset_info(data: &Dataset, entity_column: &str) -> DatasetInfo {
    let entity_options = data
        .position(entity_column)
        .map(|position| data.distinct(position).iter().map(Value::to_string).collect())
        .unwrap_or_default();

    DatasetInfo {
        name: data.name().to_string(),
        total_records: data.len(),
        total_columns: data.column_count(),
        columns: data.columns().to_vec(),
        entity_column: entity_column.to_string(),
        entity_options,
    }
}

/// Describe-style statistics of one numeric column
///
/// Statistics are `None` for an empty column; `std` also needs two values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSummary {
    pub column: String,
    pub count: usize,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub min: Option<f64>,
    #[serde(rename = "25%")]
    pub q25: Option<f64>,
    #[serde(rename = "50%")]
    pub median: Option<f64>,
    #[serde(rename = "75%")]
    pub q75: Option<f64>,
    pub max: Option<f64>,
}

/// Linear interpolation between the closest ranks of a sorted slice
fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let rank = last as f64 * q;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

fn summarize(column: &str, values: Vec<f64>) -> ColumnSummary {
    let mut sorted = values;
    sorted.sort_by(f64::total_cmp);

    let count = sorted.len();
    let mean = (count > 0).then(|| sorted.iter().sum::<f64>() / count as f64);
    let std = mean.filter(|_| count > 1).map(|mean| {
        let squares: f64 = sorted.iter().map(|v| (v - mean).powi(2)).sum();
        (squares / (count - 1) as f64).sqrt()
    });

    ColumnSummary {
        column: column.to_string(),
        count,
        mean,
        std,
        min: sorted.first().copied(),
        q25: quantile(&sorted, 0.25),
        median: quantile(&sorted, 0.5),
        q75: quantile(&sorted, 0.75),
        max: sorted.last().copied(),
    }
}

/// Statistics for each requested column that exists and is numeric
///
/// Other columns are skipped rather than reported, matching how the
/// statistics panel only lists what it can summarize.
pub fn describe<S: AsRef<str>>(data: &Dataset, columns: &[S]) -> Vec<ColumnSummary> {
    columns
        .iter()
        .map(AsRef::as_ref)
        .filter_map(|name| {
            let position = data.position(name)?;
            if data.columns()[position].kind != ColumnType::Numeric {
                log::debug!("skipping statistics for non-numeric column '{}'", name);
                return None;
            }
            let values = data.numeric_values(position).into_iter().flatten().collect();
            Some(summarize(name, values))
        })
        .collect()
}
