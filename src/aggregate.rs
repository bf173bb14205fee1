use crate::dataset::{Column, ColumnType, Dataset, Value};
use crate::error::Result;
use crate::selection::{Reducer, SortOrder, Transform};
use serde::Serialize;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Square Pearson correlation matrix indexed by column name on both axes
///
/// `values[i][j]` is the correlation of `columns[i]` with `columns[j]`;
/// `None` where it is undefined (fewer than two paired observations or a
/// constant column).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationMatrix {
    pub columns: Vec<String>,
    pub values: Vec<Vec<Option<f64>>>,
}

impl CorrelationMatrix {
    pub fn size(&self) -> usize {
        self.columns.len()
    }

    pub fn get(&self, row: &str, column: &str) -> Option<f64> {
        let i = self.columns.iter().position(|c| c == row)?;
        let j = self.columns.iter().position(|c| c == column)?;
        self.values[i][j]
    }
}

/// Output of a transform
///
/// Pass-through transforms borrow the input; everything else produces a
/// fresh table.
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregated<'a> {
    Table(Cow<'a, Dataset>),
    Matrix(CorrelationMatrix),
}

/// Runs one transform against `data`
///
/// # Arguments
/// * `transform` - What to compute
/// * `data` - Active dataset, never modified
/// * `context` - Question or chart label, quoted in schema errors
///
/// # Returns
/// * A borrowed or derived table, or a correlation matrix
pub fn apply<'a>(transform: &Transform, data: &'a Dataset, context: &str) -> Result<Aggregated<'a>> {
    log::debug!("applying {:?} to '{}' ({} rows)", transform, data.name(), data.len());
    let result = match transform {
        Transform::Passthrough => Aggregated::Table(Cow::Borrowed(data)),
        Transform::TopN { column, order, limit } => {
            Aggregated::Table(Cow::Owned(top_n(data, column, *order, *limit, context)?))
        }
        Transform::Grouped { key, value, reducer } => {
            Aggregated::Table(Cow::Owned(grouped(data, key, value, *reducer, context)?))
        }
        Transform::RatioTopN {
            numerator,
            denominator,
            output,
            order,
            limit,
        } => {
            let derived = ratio(data, numerator, denominator, output, context)?;
            Aggregated::Table(Cow::Owned(top_n(&derived, output, *order, *limit, context)?))
        }
        Transform::Correlation => Aggregated::Matrix(correlation(data)),
        Transform::Distribution { column } => Aggregated::Table(Cow::Owned(distribution(data, column, context)?)),
    };
    Ok(result)
}

/// Stable sort by a numeric column, keeping the first `limit` rows
///
/// Nulls go last whichever the direction; ties keep their input order.
pub fn top_n(data: &Dataset, column: &str, order: SortOrder, limit: usize, context: &str) -> Result<Dataset> {
    let position = data.require_numeric(column, context)?;
    let keys = data.numeric_values(position);

    let mut indices: Vec<usize> = (0..data.len()).collect();
    indices.sort_by(|&a, &b| match (keys[a], keys[b]) {
        (Some(x), Some(y)) => match order {
            SortOrder::Ascending => x.total_cmp(&y),
            SortOrder::Descending => y.total_cmp(&x),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    indices.truncate(limit);

    Ok(data.select_rows(&indices))
}

/// Hashable stand-in for a group key cell
#[derive(Debug, PartialEq, Eq, Hash)]
enum KeyRepr {
    Number(u64),
    Text(String),
    Timestamp(i64),
}

impl KeyRepr {
    fn of(value: &Value) -> Option<Self> {
        match value {
            // -0.0 and 0.0 are the same key
            Value::Number(n) => Some(KeyRepr::Number(if *n == 0.0 { 0.0f64.to_bits() } else { n.to_bits() })),
            Value::Text(s) => Some(KeyRepr::Text(s.clone())),
            Value::Timestamp(ts) => Some(KeyRepr::Timestamp(ts.timestamp_micros())),
            Value::Null => None,
        }
    }
}

struct Group {
    key: Value,
    sum: f64,
    count: usize,
}

/// One row per distinct key, in first-appearance order
///
/// Rows with a null key are dropped. Null values are skipped by the
/// reducer; a group with no values gets null for `Mean` and 0 for `Sum`.
pub fn grouped(data: &Dataset, key: &str, value: &str, reducer: Reducer, context: &str) -> Result<Dataset> {
    let key_position = data.require_column(key, context)?;
    let value_position = data.require_numeric(value, context)?;

    let mut groups: Vec<Group> = Vec::new();
    let mut lookup: HashMap<KeyRepr, usize> = HashMap::new();

    for row in data.rows() {
        let Some(repr) = KeyRepr::of(&row[key_position]) else {
            continue;
        };
        let slot = *lookup.entry(repr).or_insert_with(|| {
            groups.push(Group {
                key: row[key_position].clone(),
                sum: 0.0,
                count: 0,
            });
            groups.len() - 1
        });
        if let Some(n) = row[value_position].as_f64() {
            groups[slot].sum += n;
            groups[slot].count += 1;
        }
    }

    let rows = groups
        .into_iter()
        .map(|group| {
            let reduced = match reducer {
                Reducer::Sum => Value::Number(group.sum),
                Reducer::Mean if group.count == 0 => Value::Null,
                Reducer::Mean => Value::Number(group.sum / group.count as f64),
            };
            vec![group.key, reduced]
        })
        .collect();

    let columns = vec![
        data.columns()[key_position].clone(),
        Column::new(value, ColumnType::Numeric),
    ];
    Dataset::new(data.name(), columns, rows)
}

fn divide(numerator: Option<f64>, denominator: Option<f64>) -> Value {
    match (numerator, denominator) {
        (Some(n), Some(d)) if d == 0.0 => {
            if n > 0.0 {
                Value::Number(f64::INFINITY)
            } else if n < 0.0 {
                Value::Number(f64::NEG_INFINITY)
            } else {
                Value::Null
            }
        }
        (Some(n), Some(d)) => Value::Number(n / d),
        _ => Value::Null,
    }
}

/// Copy of `data` with `output = numerator / denominator` appended
///
/// A zero denominator gives an infinity carrying the numerator's sign;
/// 0/0 and null operands give null.
pub fn ratio(data: &Dataset, numerator: &str, denominator: &str, output: &str, context: &str) -> Result<Dataset> {
    let top = data.numeric_values(data.require_numeric(numerator, context)?);
    let bottom = data.numeric_values(data.require_numeric(denominator, context)?);

    let values = top.into_iter().zip(bottom).map(|(n, d)| divide(n, d)).collect();
    data.with_column(Column::new(output, ColumnType::Numeric), values)
}

fn pearson(xs: &[Option<f64>], ys: &[Option<f64>]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = xs
        .iter()
        .zip(ys)
        .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .collect();
    if pairs.len() < 2 {
        return None;
    }

    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;

    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }
    if sxx == 0.0 || syy == 0.0 {
        return None;
    }
    Some((sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0))
}

/// Pairwise Pearson correlation over every numeric column
///
/// Each pair uses only the rows where both cells are present.
pub fn correlation(data: &Dataset) -> CorrelationMatrix {
    let names: Vec<String> = data.numeric_columns().into_iter().map(String::from).collect();
    let series: Vec<Vec<Option<f64>>> = names
        .iter()
        .filter_map(|name| data.position(name))
        .map(|position| data.numeric_values(position))
        .collect();

    let mut values = vec![vec![None; names.len()]; names.len()];
    for i in 0..names.len() {
        // a column with a defined self-correlation is exactly 1
        values[i][i] = pearson(&series[i], &series[i]).map(|_| 1.0);
        for j in (i + 1)..names.len() {
            let r = pearson(&series[i], &series[j]);
            values[i][j] = r;
            values[j][i] = r;
        }
    }

    CorrelationMatrix { columns: names, values }
}

/// The single numeric column a histogram bins
pub fn distribution(data: &Dataset, column: &str, context: &str) -> Result<Dataset> {
    data.require_numeric(column, context)?;
    data.project(&[column], context)
}
