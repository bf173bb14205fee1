use crate::aggregate::{self, Aggregated, CorrelationMatrix};
use crate::config::DEFAULT_ENTITY_COLUMN;
use crate::dataset::{Dataset, Value};
use crate::error::{DashboardError, Result};
use crate::selection::{ChartChoice, ChartKind, SelectionContext, Transform};
use serde::Serialize;

/// How the chart's visual channels map onto data fields
///
/// Each layout carries exactly the fields its chart family reads, so a
/// renderer never has to guess which of x/y/names/values apply.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "layout", rename_all = "snake_case")]
pub enum FieldBinding {
    /// Bar, line, scatter and box plots
    Cartesian {
        x: String,
        y: String,
        color: Option<String>,
    },

    /// Pie charts: slice labels from `names`, slice sizes from `values`
    Proportion { names: String, values: String },

    /// Histograms: the renderer bins `y`
    Distribution { y: String },

    Bubble {
        x: String,
        y: String,
        size: String,
        color: Option<String>,
    },

    Candlestick {
        x: String,
        open: String,
        high: String,
        low: String,
        close: String,
    },

    /// Heatmaps: the same column names label both axes
    Matrix { axes: Vec<String> },
}

/// The data a chart is drawn from
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartData {
    Rows(Dataset),
    Matrix(CorrelationMatrix),
}

/// Declarative chart description handed to the renderer
///
/// Immutable once produced; serializes to JSON for the browser side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSpec {
    pub kind: ChartKind,
    pub title: String,
    pub binding: FieldBinding,
    pub data: ChartData,
}

impl ChartSpec {
    /// Field on the horizontal axis, or the slice labels of a pie
    pub fn x_field(&self) -> Option<&str> {
        match &self.binding {
            FieldBinding::Cartesian { x, .. } | FieldBinding::Bubble { x, .. } | FieldBinding::Candlestick { x, .. } => {
                Some(x)
            }
            FieldBinding::Proportion { names, .. } => Some(names),
            FieldBinding::Distribution { .. } | FieldBinding::Matrix { .. } => None,
        }
    }

    /// Measured fields, in channel order
    pub fn y_fields(&self) -> Vec<&str> {
        match &self.binding {
            FieldBinding::Cartesian { y, .. } | FieldBinding::Bubble { y, .. } | FieldBinding::Distribution { y } => {
                vec![y.as_str()]
            }
            FieldBinding::Proportion { values, .. } => vec![values.as_str()],
            FieldBinding::Candlestick {
                open, high, low, close, ..
            } => vec![open.as_str(), high.as_str(), low.as_str(), close.as_str()],
            FieldBinding::Matrix { .. } => Vec::new(),
        }
    }
}

/// A selection reduced to one chart kind, one transform and raw column names
struct Request<'e> {
    operation: String,
    kind: ChartKind,
    transform: Transform<'e>,
    x: Option<String>,
    ys: Vec<String>,
    color: Option<String>,
    size: Option<String>,
}

impl<'e> Request<'e> {
    fn from_selection(selection: &SelectionContext, entity_column: &'e str) -> Self {
        if let Some(question) = selection.question {
            let plan = question.plan(entity_column);
            return Self {
                operation: question.label().to_string(),
                kind: plan.chart,
                transform: plan.transform,
                x: plan.bindings.x.map(String::from),
                ys: plan.bindings.y.into_iter().map(String::from).collect(),
                color: plan.bindings.color.map(String::from),
                size: plan.bindings.size.map(String::from),
            };
        }

        let kind = match &selection.chart {
            ChartChoice::Kind(kind) => *kind,
            ChartChoice::Unrecognized(label) => {
                log::warn!("unrecognized chart type '{}', drawing a histogram of the y column", label);
                ChartKind::Histogram
            }
        };
        let transform = match kind {
            ChartKind::Heatmap => Transform::Correlation,
            _ => Transform::Passthrough,
        };
        Self {
            operation: kind.label().to_string(),
            kind,
            transform,
            x: selection.x_column.clone(),
            ys: selection.y_columns.clone(),
            color: selection.color_column.clone(),
            size: selection.size_column.clone(),
        }
    }

    fn y(&self) -> Option<&str> {
        self.ys.first().map(String::as_str)
    }

    /// Every field must be bound; lists the unbound ones otherwise
    fn bound<'r>(&self, fields: &[(&str, Option<&'r str>)]) -> Result<Vec<&'r str>> {
        let missing: Vec<String> = fields
            .iter()
            .filter(|(_, column)| column.is_none())
            .map(|(field, _)| field.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(self.insufficient(missing));
        }
        Ok(fields.iter().filter_map(|(_, column)| *column).collect())
    }

    /// Like [`Request::bound`], but a column absent from `table` also counts as missing
    fn present<'r>(&self, fields: &[(&str, Option<&'r str>)], table: &Dataset) -> Result<Vec<&'r str>> {
        let missing: Vec<String> = fields
            .iter()
            .filter(|(_, column)| column.is_none_or(|name| table.position(name).is_none()))
            .map(|(field, _)| field.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(self.insufficient(missing));
        }
        Ok(fields.iter().filter_map(|(_, column)| *column).collect())
    }

    fn insufficient(&self, missing: Vec<String>) -> DashboardError {
        DashboardError::InsufficientColumns {
            kind: self.kind.label().to_string(),
            missing,
        }
    }

    fn title(&self, body: impl AsRef<str>) -> String {
        format!("{} Analysis: {}", self.operation, body.as_ref())
    }
}

/// Keeps only the columns a chart reads, each once
fn rows_for(table: &Dataset, names: &[&str], context: &str) -> Result<ChartData> {
    let mut unique: Vec<&str> = Vec::with_capacity(names.len());
    for name in names {
        if !unique.contains(name) {
            unique.push(*name);
        }
    }
    Ok(ChartData::Rows(table.project(&unique, context)?))
}

fn optional_column(table: &Dataset, column: Option<&String>, context: &str) -> Result<Option<String>> {
    match column {
        Some(name) => {
            table.require_column(name, context)?;
            Ok(Some(name.clone()))
        }
        None => Ok(None),
    }
}

fn heatmap(request: &Request<'_>, matrix: CorrelationMatrix) -> ChartSpec {
    ChartSpec {
        kind: ChartKind::Heatmap,
        title: request.title(format!("correlation of {} numeric columns", matrix.size())),
        binding: FieldBinding::Matrix {
            axes: matrix.columns.clone(),
        },
        data: ChartData::Matrix(matrix),
    }
}

/// Turns the current selection into a chart description
///
/// Questions read the bundled dataset's entity column; see [`resolve_for`]
/// for datasets keyed by another column.
///
/// # Arguments
/// * `selection` - The user's choices; an analysis question overrides the chart and column fields
/// * `data` - The active dataset, only read
///
/// # Returns
/// * `ChartSpec` with the aggregated rows (or correlation matrix) it draws
///
/// # Errors
/// * `MissingColumn` / `TypeMismatch` from schema lookups
/// * `InsufficientColumns` when a chart's required fields are unbound
/// * `ChartBuild` when the data cannot be drawn by the chart kind
pub fn resolve(selection: &SelectionContext, data: &Dataset) -> Result<ChartSpec> {
    resolve_for(selection, data, DEFAULT_ENTITY_COLUMN)
}

/// [`resolve`] with the questions' labels and group keys taken from `entity_column`
pub fn resolve_for(selection: &SelectionContext, data: &Dataset, entity_column: &str) -> Result<ChartSpec> {
    let request = Request::from_selection(selection, entity_column);
    let context = request.operation.as_str();
    let aggregated = aggregate::apply(&request.transform, data, context)?;

    let table = match aggregated {
        Aggregated::Matrix(matrix) if request.kind == ChartKind::Heatmap => return Ok(heatmap(&request, matrix)),
        Aggregated::Matrix(_) => {
            return Err(DashboardError::chart_build(format!(
                "{} cannot draw a correlation matrix",
                request.kind.label()
            )));
        }
        Aggregated::Table(table) => table,
    };

    let spec = match request.kind {
        ChartKind::Bar | ChartKind::Line | ChartKind::Scatter | ChartKind::Box => {
            let fields = request.bound(&[("x", request.x.as_deref()), ("y", request.y())])?;
            let (x, y) = (fields[0], fields[1]);
            table.require_column(x, context)?;
            table.require_numeric(y, context)?;
            let color = optional_column(&table, request.color.as_ref(), context)?;

            let mut columns = vec![x, y];
            columns.extend(color.as_deref());
            ChartSpec {
                kind: request.kind,
                title: request.title(format!("{} vs {}", y, x)),
                data: rows_for(&table, &columns, context)?,
                binding: FieldBinding::Cartesian {
                    x: x.to_string(),
                    y: y.to_string(),
                    color,
                },
            }
        }
        ChartKind::Pie => {
            let fields = request.bound(&[("names", request.x.as_deref()), ("values", request.y())])?;
            let (names, values) = (fields[0], fields[1]);
            table.require_column(names, context)?;
            let position = table.require_numeric(values, context)?;
            if table
                .rows()
                .iter()
                .any(|row| matches!(row[position], Value::Number(n) if n < 0.0))
            {
                return Err(DashboardError::chart_build(format!(
                    "Pie Chart cannot show negative values in '{}'",
                    values
                )));
            }
            ChartSpec {
                kind: ChartKind::Pie,
                title: request.title(format!("{} by {}", values, names)),
                data: rows_for(&table, &[names, values], context)?,
                binding: FieldBinding::Proportion {
                    names: names.to_string(),
                    values: values.to_string(),
                },
            }
        }
        ChartKind::Histogram => {
            let y = request.bound(&[("y", request.y())])?[0];
            table.require_numeric(y, context)?;
            ChartSpec {
                kind: ChartKind::Histogram,
                title: request.title(format!("distribution of {}", y)),
                data: rows_for(&table, &[y], context)?,
                binding: FieldBinding::Distribution { y: y.to_string() },
            }
        }
        ChartKind::Bubble => {
            let fields = request.present(
                &[
                    ("x", request.x.as_deref()),
                    ("y", request.y()),
                    ("size", request.size.as_deref()),
                ],
                &table,
            )?;
            let (x, y, size) = (fields[0], fields[1], fields[2]);
            table.require_numeric(y, context)?;
            table.require_numeric(size, context)?;
            let color = optional_column(&table, request.color.as_ref(), context)?;

            let mut columns = vec![x, y, size];
            columns.extend(color.as_deref());
            ChartSpec {
                kind: ChartKind::Bubble,
                title: request.title(format!("{} vs {} sized by {}", y, x, size)),
                data: rows_for(&table, &columns, context)?,
                binding: FieldBinding::Bubble {
                    x: x.to_string(),
                    y: y.to_string(),
                    size: size.to_string(),
                    color,
                },
            }
        }
        ChartKind::Candlestick => {
            let series = |i: usize| request.ys.get(i).map(String::as_str);
            let fields = request.present(
                &[
                    ("x", request.x.as_deref()),
                    ("open", series(0)),
                    ("high", series(1)),
                    ("low", series(2)),
                    ("close", series(3)),
                ],
                &table,
            )?;
            for price in &fields[1..] {
                table.require_numeric(price, context)?;
            }
            let (x, open, high, low, close) = (fields[0], fields[1], fields[2], fields[3], fields[4]);
            ChartSpec {
                kind: ChartKind::Candlestick,
                title: request.title(format!("{}/{}/{}/{} over {}", open, high, low, close, x)),
                data: rows_for(&table, &fields, context)?,
                binding: FieldBinding::Candlestick {
                    x: x.to_string(),
                    open: open.to_string(),
                    high: high.to_string(),
                    low: low.to_string(),
                    close: close.to_string(),
                },
            }
        }
        ChartKind::Heatmap => heatmap(&request, aggregate::correlation(&table)),
    };

    log::debug!("resolved '{}'", spec.title);
    Ok(spec)
}
