use dashboard::config::CachePolicy;
use dashboard::{
    AnalysisQuestion, ChartData, ChartKind, ColumnType, Dashboard, DashboardConfig, DatasetChoice, EntityFilter,
    SelectionContext, SessionState, Uploads, Value,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const MARKETS: &str = include_str!("../data/crypto_markets.csv");

fn config_for(path: &Path) -> DashboardConfig {
    let mut config = DashboardConfig::default();
    config.data.local_path = path.to_string_lossy().to_string();
    config.data.cache = CachePolicy::Forever;
    config
}

fn bundled() -> (TempDir, Dashboard) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("crypto_markets.csv");
    fs::write(&path, MARKETS).unwrap();
    let dashboard = Dashboard::new(config_for(&path));
    (dir, dashboard)
}

fn login(dashboard: &Dashboard) -> SessionState {
    let (state, _) = dashboard.login(SessionState::new(), "admin", "admin123");
    assert!(state.authenticated);
    state
}

#[test]
fn bundled_file_is_typed_once_on_load() {
    let (_dir, dashboard) = bundled();
    let data = dashboard.dataset().unwrap();
    assert_eq!(data.len(), 10);
    assert_eq!(data.column("symbol").unwrap().kind, ColumnType::Categorical);
    assert_eq!(data.column("max_supply").unwrap().kind, ColumnType::Numeric);
    assert_eq!(data.column("last_updated").unwrap().kind, ColumnType::Temporal);

    let again = dashboard.dataset().unwrap();
    assert!(std::sync::Arc::ptr_eq(&data, &again));
}

#[test]
fn top_market_cap_question_end_to_end() {
    let (_dir, dashboard) = bundled();
    let state = login(&dashboard);
    let view = dashboard
        .refresh(&state, &SelectionContext::ask(AnalysisQuestion::TopByMarketCap), &Uploads::new())
        .unwrap();

    let spec = view.charts[0].ready().unwrap();
    assert_eq!(spec.kind, ChartKind::Bar);
    assert_eq!(spec.x_field(), Some("symbol"));
    let ChartData::Rows(rows) = &spec.data else {
        panic!("expected rows");
    };
    assert_eq!(rows.len(), 10);
    assert_eq!(rows.value(0, "symbol"), Some(&Value::from("BTC")));
    assert_eq!(rows.value(2, "symbol"), Some(&Value::from("ETH")));
    assert_eq!(view.info.total_records, 10);
    assert_eq!(view.info.entity_options.len(), 8);
}

#[test]
fn metric_cards_for_a_selected_symbol() {
    let (_dir, dashboard) = bundled();
    let state = login(&dashboard);
    let mut selection = SelectionContext::plot(ChartKind::Line, "last_updated", "price_usd");
    selection.entity_filter = Some(EntityFilter::new("symbol", "ETH"));

    let view = dashboard.refresh(&state, &selection, &Uploads::new()).unwrap();
    let metrics = view.metrics.unwrap();
    let cards = &metrics.ready().unwrap().cards;
    assert_eq!(cards[0].display, "$434.17");
    assert_eq!(cards[1].display, "$41744614810.00");
    assert_eq!(cards[2].display, "$1620780000.00");
    assert!(view.charts[0].is_ready());
}

#[test]
fn unknown_symbol_fails_only_the_metrics_panel() {
    let (_dir, dashboard) = bundled();
    let state = login(&dashboard);
    let mut selection = SelectionContext::ask(AnalysisQuestion::AveragePriceBySymbol);
    selection.entity_filter = Some(EntityFilter::new("symbol", "DOGE"));

    let view = dashboard.refresh(&state, &selection, &Uploads::new()).unwrap();
    let report = view.metrics.unwrap().error().cloned().unwrap();
    assert_eq!(report.kind, "empty_dataset");
    assert!(report.message.contains("DOGE"));
    assert!(view.charts[0].is_ready());
}

#[test]
fn correlation_covers_every_numeric_column() {
    let (_dir, dashboard) = bundled();
    let state = login(&dashboard);
    let view = dashboard
        .refresh(&state, &SelectionContext::ask(AnalysisQuestion::CorrelationMatrix), &Uploads::new())
        .unwrap();
    let spec = view.charts[0].ready().unwrap();
    let ChartData::Matrix(matrix) = &spec.data else {
        panic!("expected a matrix");
    };
    assert_eq!(matrix.size(), 12);
    assert_eq!(matrix.get("price_usd", "price_usd"), Some(1.0));
    assert_eq!(spec.title, "Correlation between numeric metrics Analysis: correlation of 12 numeric columns");
}

#[test]
fn missing_file_is_reported_and_not_cached() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("later.csv");
    let dashboard = Dashboard::new(config_for(&path));
    let state = login(&dashboard);

    let err = dashboard
        .refresh(&state, &SelectionContext::default(), &Uploads::new())
        .unwrap_err();
    assert_eq!(err.kind(), "data_load");

    fs::write(&path, MARKETS).unwrap();
    let view = dashboard
        .refresh(&state, &SelectionContext::plot(ChartKind::Scatter, "market_cap_usd", "price_usd"), &Uploads::new())
        .unwrap();
    assert!(view.charts[0].is_ready());
}

#[test]
fn uploaded_csv_gets_its_own_schema() {
    let (_dir, dashboard) = bundled();
    let state = login(&dashboard);
    let mut uploads = Uploads::new();
    uploads.insert(
        "weather.csv".to_string(),
        dashboard
            .upload("weather.csv", b"city,date,rainfall,wind\nOslo,2024-01-01,3.5,12\nBergen,2024-01-01,9.1,20\n")
            .unwrap(),
    );

    let mut selection = SelectionContext::plot(ChartKind::Bubble, "wind", "rainfall");
    selection.dataset = DatasetChoice::Uploaded {
        name: "weather.csv".to_string(),
    };
    let view = dashboard.refresh(&state, &selection, &uploads).unwrap();
    assert_eq!(view.charts[0].error().map(|r| r.kind), Some("insufficient_columns"));
    assert_eq!(view.info.total_columns, 4);
    assert!(view.info.entity_options.is_empty());

    selection.chart = ChartKind::Histogram.into();
    let view = dashboard.refresh(&state, &selection, &uploads).unwrap();
    let stats = view.statistics.ready().unwrap();
    assert_eq!(stats[0].column, "rainfall");
    assert_eq!(stats[0].count, 2);
}

#[test]
fn configuration_file_drives_the_gate() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dashboard.toml");
    fs::write(
        &path,
        r#"
        [auth]
        max_attempts = 2

        [[auth.credentials]]
        username = "analyst"
        password = "charts"
        "#,
    )
    .unwrap();

    let config = DashboardConfig::from_file(&path).unwrap();
    let dashboard = Dashboard::new(config);
    let (state, _) = dashboard.login(SessionState::new(), "admin", "admin123");
    assert!(!state.authenticated);
    let (state, _) = dashboard.login(state, "analyst", "charts");
    assert!(state.authenticated);
}
