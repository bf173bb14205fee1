/*!
# Crypto Market Dashboard

A login-gated analytics dashboard over a tabular cryptocurrency market
dataset, built in Rust.

## Overview

The dashboard loads a CSV of market data (from a bundled local file, or a
remote URL when the file is absent), caches it, and turns the user's
selection into a declarative chart description. Rendering is left to a
plotting collaborator: the browser page served by the web host draws the
JSON `ChartSpec` with Plotly.

## Architecture

Every refresh runs one synchronous pipeline:

```text
SessionState ──gate──▶ DatasetLoader ──▶ AggregationEngine ──▶ ChartSpecResolver ──▶ ChartSpec
   (login)             (cache + CSV)     (aggregate module)     (chart module)
```

### Core Layer
- **AuthGate** - Fixed credential table with a bounded retry counter
- **DatasetLoader** - Local-then-remote CSV loading, one-time column typing, TTL or forever cache
- **AggregationEngine** - Ranking, grouping, derived ratios, correlation matrices and distributions
- **ChartSpecResolver** - Maps chart kinds and analysis questions to field bindings and titles

### Host Layer
- **CLI** (`dashboard` binary) - Prompts for credentials, prints one refreshed view as JSON
- **Web** (`web` feature, axum) - Cookie sessions, JSON API and static assets

## Key Features

- Twenty-one pre-built analysis questions over the bundled market data
- Bar, line, scatter, pie, box, histogram, bubble, candlestick and heatmap charts
- Several x/y pairs charted side by side, each failing on its own
- Metric cards and dataset information for a selected cryptocurrency
- Describe-style statistics for the plotted measures
- User-uploaded CSV files analysed with the same typing rules
- Per-panel error reporting: one failing panel never takes down the others

## Modules

- **error**: Error taxonomy shared by every component
- **config**: TOML configuration with defaults for every key
- **dataset**: Typed table, cells and schema lookups
- **loader**: Data sources, CSV parsing, type inference and the dataset cache
- **login**: AuthGate state machine and the in-memory session store
- **selection**: Chart kinds, analysis questions and the user's selection
- **aggregate**: Pure transforms from a dataset to a derived table or correlation matrix
- **chart**: Resolution of a selection into a `ChartSpec`
- **summary**: Metric cards, dataset information and column statistics
- **dashboard**: The refresh pipeline hosts call on every change
- **app**: Routing and handlers of the web host (`web` feature)

## REST API Endpoints

- `GET /login`, `POST /login`, `POST /logout` - Session handling
- `GET /api/catalogue` - Chart kinds and analysis questions on offer
- `GET /api/info` - Size, schema and entity options of the active dataset
- `POST /api/refresh` - JSON selection in, dashboard view out
- `POST /api/upload` - Multipart CSV upload into the current session
*/

pub mod aggregate;
pub mod chart;
pub mod config;
pub mod dashboard;
pub mod dataset;
pub mod error;
pub mod loader;
pub mod login;
pub mod selection;
pub mod summary;

#[cfg(feature = "web")]
pub mod app;

pub use chart::{ChartData, ChartSpec, FieldBinding, resolve, resolve_for};
pub use config::DashboardConfig;
pub use dashboard::{Dashboard, DashboardView, Panel, Uploads};
pub use dataset::{Column, ColumnType, Dataset, EntityFilter, Value};
pub use error::{DashboardError, ErrorReport, Result};
pub use loader::DatasetLoader;
pub use login::{AuthGate, LoginOutcome, SessionState};
pub use selection::{AnalysisQuestion, AxisPair, ChartChoice, ChartKind, DatasetChoice, SelectionContext};
