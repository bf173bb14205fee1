use crate::error::{DashboardError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

/// Declared type of a column, fixed once the dataset is loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Numeric,
    Categorical,
    Temporal,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Numeric => "numeric",
            ColumnType::Categorical => "categorical",
            ColumnType::Temporal => "temporal",
        }
    }
}

/// A single cell
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Null,
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Orders two cells of the same column; nulls compare as equal to each other.
    ///
    /// Callers that need nulls last handle them before calling this.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Greater,
            (_, Value::Null) => Ordering::Less,
            _ => self.to_string().cmp(&other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "{}", s),
            Value::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
            Value::Null => Ok(()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            // JSON has no infinities; the renderer receives null for them
            Value::Number(n) if n.is_finite() => serializer.serialize_f64(*n),
            Value::Number(_) | Value::Null => serializer.serialize_none(),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Timestamp(ts) => serializer.serialize_str(&ts.to_rfc3339()),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub name: String,
    pub kind: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Restricts a dataset to the rows whose `column` equals `value`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityFilter {
    pub column: String,
    pub value: String,
}

impl EntityFilter {
    pub fn new(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    fn matches(&self, cell: &Value) -> bool {
        match cell {
            Value::Text(s) => s == &self.value,
            Value::Null => false,
            other => other.to_string() == self.value,
        }
    }
}

/// An ordered table whose column types never change after construction
///
/// Transforms never modify a dataset in place: every derived table is a new
/// value, so a cached dataset shared behind an `Arc` stays untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dataset {
    name: String,
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl Dataset {
    /// Builds a dataset, checking every row has one cell per column
    pub fn new(name: impl Into<String>, columns: Vec<Column>, rows: Vec<Vec<Value>>) -> Result<Self> {
        let mut index = HashMap::with_capacity(columns.len());
        for (position, column) in columns.iter().enumerate() {
            if index.insert(column.name.clone(), position).is_some() {
                return Err(DashboardError::data_load(format!(
                    "duplicate column '{}'",
                    column.name
                )));
            }
        }
        if let Some((line, row)) = rows.iter().enumerate().find(|(_, row)| row.len() != columns.len()) {
            return Err(DashboardError::data_load(format!(
                "row {} has {} cells, expected {}",
                line + 1,
                row.len(),
                columns.len()
            )));
        }
        Ok(Self {
            name: name.into(),
            columns,
            rows,
            index,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.index.get(name).map(|&i| &self.columns[i])
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let position = self.position(column)?;
        self.rows.get(row).map(|r| &r[position])
    }

    /// Names of every numeric column, in declaration order
    pub fn numeric_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.kind == ColumnType::Numeric)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Schema lookup: the column must exist
    ///
    /// # Arguments
    /// * `name` - Column to look up
    /// * `context` - The question or chart asking for it, quoted in the error
    ///
    /// # Returns
    /// * The column position, or `MissingColumn`
    pub fn require_column(&self, name: &str, context: &str) -> Result<usize> {
        self.position(name)
            .ok_or_else(|| DashboardError::missing_column(name, context))
    }

    /// Schema lookup: the column must exist and be declared numeric
    pub fn require_numeric(&self, name: &str, context: &str) -> Result<usize> {
        let position = self.require_column(name, context)?;
        let kind = self.columns[position].kind;
        if kind != ColumnType::Numeric {
            return Err(DashboardError::TypeMismatch {
                column: name.to_string(),
                expected: ColumnType::Numeric.as_str(),
                found: kind.as_str(),
                context: context.to_string(),
            });
        }
        Ok(position)
    }

    /// Cells of one column as numbers, `None` for nulls
    pub fn numeric_values(&self, position: usize) -> Vec<Option<f64>> {
        self.rows.iter().map(|row| row[position].as_f64()).collect()
    }

    /// Distinct non-null values of a column in first-appearance order
    pub fn distinct(&self, position: usize) -> Vec<Value> {
        let mut seen: Vec<Value> = Vec::new();
        for row in &self.rows {
            let cell = &row[position];
            if !cell.is_null() && !seen.contains(cell) {
                seen.push(cell.clone());
            }
        }
        seen
    }

    /// Returns a copy containing the rows at `indices`, in that order
    pub fn select_rows(&self, indices: &[usize]) -> Dataset {
        Dataset {
            name: self.name.clone(),
            columns: self.columns.clone(),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
            index: self.index.clone(),
        }
    }

    /// Rows matching the filter; zero matches is a valid, empty result
    pub fn filter(&self, filter: &EntityFilter) -> Result<Dataset> {
        let position = self.require_column(&filter.column, "the entity filter")?;
        let indices: Vec<usize> = self
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| filter.matches(&row[position]))
            .map(|(i, _)| i)
            .collect();
        Ok(self.select_rows(&indices))
    }

    /// Returns a copy carrying `column`
    ///
    /// A new name is appended; an existing column of the same name is
    /// overwritten in the copy, keeping its position.
    ///
    /// # Errors
    /// * `ChartBuild` when `values` does not have one entry per row
    pub fn with_column(&self, column: Column, values: Vec<Value>) -> Result<Dataset> {
        if values.len() != self.rows.len() {
            return Err(DashboardError::chart_build(format!(
                "derived column '{}' has {} values for {} rows",
                column.name,
                values.len(),
                self.rows.len()
            )));
        }
        let mut derived = self.clone();
        match self.index.get(&column.name) {
            Some(&position) => {
                derived.columns[position] = column;
                for (row, value) in derived.rows.iter_mut().zip(values) {
                    row[position] = value;
                }
            }
            None => {
                derived.index.insert(column.name.clone(), derived.columns.len());
                derived.columns.push(column);
                for (row, value) in derived.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
        Ok(derived)
    }

    /// Keeps only the named columns, in the given order
    pub fn project(&self, names: &[&str], context: &str) -> Result<Dataset> {
        let positions = names
            .iter()
            .map(|name| self.require_column(name, context))
            .collect::<Result<Vec<_>>>()?;
        let columns = positions.iter().map(|&p| self.columns[p].clone()).collect();
        let rows = self
            .rows
            .iter()
            .map(|row| positions.iter().map(|&p| row[p].clone()).collect())
            .collect();
        Dataset::new(self.name.clone(), columns, rows)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Small market snapshot used across module tests
    pub fn markets() -> Dataset {
        let columns = vec![
            Column::new("symbol", ColumnType::Categorical),
            Column::new("price_usd", ColumnType::Numeric),
            Column::new("market_cap_usd", ColumnType::Numeric),
            Column::new("24h_volume_usd", ColumnType::Numeric),
            Column::new("percent_change_24h", ColumnType::Numeric),
        ];
        let row = |s: &str, p: f64, m: f64, v: f64, c: f64| {
            vec![Value::from(s), Value::from(p), Value::from(m), Value::from(v), Value::from(c)]
        };
        let rows = vec![
            row("BTC", 100.0, 1000.0, 50.0, 2.0),
            row("ETH", 10.0, 500.0, 40.0, -1.0),
            row("BTC", 120.0, 1200.0, 60.0, 3.0),
            row("LTC", 5.0, 0.0, 10.0, 0.5),
        ];
        Dataset::new("markets", columns, rows).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::markets;
    use super::*;

    #[test]
    fn rejects_ragged_rows() {
        let err = Dataset::new(
            "bad",
            vec![Column::new("a", ColumnType::Numeric)],
            vec![vec![Value::Number(1.0), Value::Number(2.0)]],
        )
        .unwrap_err();
        assert_eq!(err.kind(), "data_load");
    }

    #[test]
    fn schema_lookup_reports_missing_and_mistyped_columns() {
        let data = markets();
        assert_eq!(data.require_numeric("price_usd", "test").unwrap(), 1);
        assert!(matches!(
            data.require_column("rank", "test"),
            Err(DashboardError::MissingColumn { .. })
        ));
        assert!(matches!(
            data.require_numeric("symbol", "test"),
            Err(DashboardError::TypeMismatch { found: "categorical", .. })
        ));
    }

    #[test]
    fn filter_keeps_matching_rows_in_order() {
        let data = markets();
        let btc = data.filter(&EntityFilter::new("symbol", "BTC")).unwrap();
        assert_eq!(btc.len(), 2);
        assert_eq!(btc.value(1, "price_usd"), Some(&Value::Number(120.0)));

        let none = data.filter(&EntityFilter::new("symbol", "XRP")).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn with_column_leaves_the_source_untouched() {
        let data = markets();
        let values = (0..data.len()).map(|i| Value::Number(i as f64)).collect();
        let derived = data
            .with_column(Column::new("idx", ColumnType::Numeric), values)
            .unwrap();
        assert_eq!(derived.column_count(), data.column_count() + 1);
        assert!(data.column("idx").is_none());
        assert_eq!(derived.value(3, "idx"), Some(&Value::Number(3.0)));
    }

    #[test]
    fn with_column_overwrites_a_taken_name_in_the_copy() {
        let data = markets();
        let values = vec![Value::Number(7.0); data.len()];
        let derived = data
            .with_column(Column::new("symbol", ColumnType::Numeric), values)
            .unwrap();
        assert_eq!(derived.column_count(), data.column_count());
        assert_eq!(derived.position("symbol"), data.position("symbol"));
        assert_eq!(derived.column("symbol").unwrap().kind, ColumnType::Numeric);
        assert_eq!(derived.value(0, "symbol"), Some(&Value::Number(7.0)));
        assert_eq!(data.value(0, "symbol"), Some(&Value::from("BTC")));
    }

    #[test]
    fn distinct_preserves_first_appearance() {
        let data = markets();
        let symbols = data.distinct(0);
        assert_eq!(symbols, vec![Value::from("BTC"), Value::from("ETH"), Value::from("LTC")]);
    }

    #[test]
    fn infinite_numbers_serialize_as_null() {
        let json = serde_json::to_string(&vec![Value::Number(f64::INFINITY), Value::Number(1.5)]).unwrap();
        assert_eq!(json, "[null,1.5]");
    }
}
