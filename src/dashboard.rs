use crate::chart::{self, ChartData, ChartSpec};
use crate::config::DashboardConfig;
use crate::dataset::Dataset;
use crate::error::{DashboardError, ErrorReport, Result};
use crate::loader::{self, DatasetLoader};
use crate::login::{AuthGate, LoginOutcome, SessionState};
use crate::selection::{DatasetChoice, SelectionContext};
use crate::summary::{self, ColumnSummary, DatasetInfo, EntityMetrics};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Datasets uploaded during one session, by name
pub type Uploads = HashMap<String, Arc<Dataset>>;

/// One section of the dashboard: either its content or what went wrong
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "content", rename_all = "snake_case")]
pub enum Panel<T> {
    Ready(T),
    Failed(ErrorReport),
}

impl<T> Panel<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Panel::Ready(_))
    }

    pub fn ready(&self) -> Option<&T> {
        match self {
            Panel::Ready(content) => Some(content),
            Panel::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorReport> {
        match self {
            Panel::Ready(_) => None,
            Panel::Failed(report) => Some(report),
        }
    }
}

impl<T> From<Result<T>> for Panel<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(content) => Panel::Ready(content),
            Err(err) => {
                log::warn!("panel failed: {}", err);
                Panel::Failed(err.report())
            }
        }
    }
}

/// Everything the host renders after one refresh
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardView {
    pub info: DatasetInfo,

    /// Present only when the selection carries an entity filter
    pub metrics: Option<Panel<EntityMetrics>>,

    /// The selection's own chart, then one per extra x/y pair
    pub charts: Vec<Panel<ChartSpec>>,

    pub statistics: Panel<Vec<ColumnSummary>>,
}


/// The dashboard core: login gate, dataset cache and the resolution pipeline
///
/// Hosts (the CLI and the web server) own the per-session state and call
/// [`Dashboard::refresh`] whenever the selection changes.
pub struct Dashboard {
    config: DashboardConfig,
    gate: AuthGate,
    loader: DatasetLoader,
}

impl Dashboard {
    pub fn new(config: DashboardConfig) -> Self {
        let loader = DatasetLoader::from_config(&config.data);
        Self::with_loader(config, loader)
    }

    /// Uses `loader` in place of the configured sources
    pub fn with_loader(config: DashboardConfig, loader: DatasetLoader) -> Self {
        Self {
            gate: AuthGate::from_config(&config.auth),
            config,
            loader,
        }
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    pub fn login(&self, state: SessionState, username: &str, password: &str) -> (SessionState, LoginOutcome) {
        self.gate.login(state, username, password)
    }

    /// The bundled dataset, served from the cache when fresh
    pub fn dataset(&self) -> Result<Arc<Dataset>> {
        self.loader.load()
    }

    pub fn reload(&self) -> Result<Arc<Dataset>> {
        self.loader.invalidate();
        self.loader.load()
    }

    /// Parses an uploaded file with the bundled dataset's typing rules
    pub fn upload(&self, name: &str, bytes: &[u8]) -> Result<Arc<Dataset>> {
        let dataset = loader::parse_upload(name, bytes)?;
        log::info!(
            "parsed upload '{}' ({} rows, {} columns)",
            name,
            dataset.len(),
            dataset.column_count()
        );
        Ok(Arc::new(dataset))
    }

    /// Looks up the dataset a selection points at
    pub fn active_dataset(&self, choice: &DatasetChoice, uploads: &Uploads) -> Result<Arc<Dataset>> {
        match choice {
            DatasetChoice::Bundled => self.dataset(),
            DatasetChoice::Uploaded { name } => uploads
                .get(name)
                .cloned()
                .ok_or_else(|| DashboardError::data_load(format!("no uploaded dataset named '{}'", name))),
        }
    }

    pub fn info(&self, state: &SessionState, choice: &DatasetChoice, uploads: &Uploads) -> Result<DatasetInfo> {
        state.require_unlocked()?;
        let data = self.active_dataset(choice, uploads)?;
        Ok(summary::dataset_info(&data, &self.config.data.entity_column))
    }

    /// Runs the whole chain for one selection
    ///
    /// # Arguments
    /// * `state` - Session state; must be unlocked
    /// * `selection` - The user's current choices
    /// * `uploads` - Datasets uploaded in this session
    ///
    /// # Returns
    /// * `DashboardView` whose panels succeed or fail independently
    ///
    /// # Errors
    /// * `Auth` when the session is locked, before anything is loaded
    /// * `DataLoad` when the active dataset cannot be obtained
    pub fn refresh(&self, state: &SessionState, selection: &SelectionContext, uploads: &Uploads) -> Result<DashboardView> {
        state.require_unlocked()?;
        let data = self.active_dataset(&selection.dataset, uploads)?;
        log::info!("refreshing dashboard over '{}' ({} rows)", data.name(), data.len());

        let entity_column = self.config.data.entity_column.as_str();
        let info = summary::dataset_info(&data, entity_column);
        let metrics = selection
            .entity_filter
            .as_ref()
            .map(|filter| Panel::from(summary::entity_metrics(&data, filter)));
        let charts: Vec<Panel<ChartSpec>> = selection
            .charted()
            .iter()
            .map(|charted| Panel::from(chart::resolve_for(charted, &data, entity_column)))
            .collect();

        Ok(DashboardView {
            info,
            metrics,
            statistics: Panel::Ready(statistics(selection, &data, &charts)),
            charts,
        })
    }
}

/// Describes every selected measure over the active dataset, then any
/// measure a chart derived or ranked for itself over that chart's rows
fn statistics(selection: &SelectionContext, data: &Dataset, charts: &[Panel<ChartSpec>]) -> Vec<ColumnSummary> {
    let mut described = summary::describe(data, &selection.measures());
    for spec in charts.iter().filter_map(Panel::ready) {
        let ChartData::Rows(rows) = &spec.data else {
            continue;
        };
        let extra: Vec<&str> = spec
            .y_fields()
            .into_iter()
            .filter(|field| !described.iter().any(|done| done.column == *field))
            .collect();
        described.extend(summary::describe(rows, &extra));
    }
    described
}
