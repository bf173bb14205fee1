#![cfg(not(tarpaulin_include))]

use axum::{
    Form, Json, Router,
    extract::{Multipart, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;

use crate::config::DashboardConfig;
use crate::dashboard::{Dashboard, DashboardView, Uploads};
use crate::error::DashboardError;
use crate::login::{LoginOutcome, SessionState, SessionStore};
use crate::selection::{AnalysisQuestion, ChartKind, DatasetChoice, SelectionContext};
use crate::summary::DatasetInfo;

const SESSION_COOKIE: &str = "session";
const PURGE_INTERVAL: Duration = Duration::from_secs(10 * 60);

pub struct AppState {
    dashboard: Arc<Dashboard>,
    sessions: SessionStore,
}

impl AppState {
    pub fn new(dashboard: Dashboard, session_duration: Duration) -> Self {
        Self {
            dashboard: Arc::new(dashboard),
            sessions: SessionStore::new(session_duration),
        }
    }

    /// Session state and uploads behind the request's cookie
    fn session(&self, jar: &CookieJar) -> Result<(SessionState, Uploads), DashboardError> {
        jar.get(SESSION_COOKIE)
            .and_then(|cookie| {
                self.sessions
                    .with_session(cookie.value(), |session| (session.state, session.uploads.clone()))
            })
            .ok_or_else(|| DashboardError::auth("login required"))
    }

    /// Reuses the live session named by the cookie, or starts a new one
    fn ensure_session(&self, jar: CookieJar) -> (CookieJar, String) {
        if let Some(cookie) = jar.get(SESSION_COOKIE) {
            if self.sessions.state(cookie.value()).is_some() {
                let session_id = cookie.value().to_string();
                return (jar, session_id);
            }
        }
        let session_id = self.sessions.create();
        let cookie = Cookie::build((SESSION_COOKIE, session_id.clone()))
            .path("/")
            .http_only(true)
            .build();
        (jar.add(cookie), session_id)
    }
}

/// JSON error body with a status derived from the error kind
pub struct ApiError(DashboardError);

impl From<DashboardError> for ApiError {
    fn from(err: DashboardError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DashboardError::Auth(_) => StatusCode::UNAUTHORIZED,
            DashboardError::DataLoad(_) => StatusCode::SERVICE_UNAVAILABLE,
            DashboardError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DashboardError::MissingColumn { .. }
            | DashboardError::EmptyDataset { .. }
            | DashboardError::TypeMismatch { .. }
            | DashboardError::InsufficientColumns { .. }
            | DashboardError::ChartBuild(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        (status, Json(self.0.report())).into_response()
    }
}

#[derive(Deserialize)]
pub struct LoginForm {
    username: String,
    password: String,
}

#[derive(Deserialize)]
pub struct InfoQuery {
    upload: Option<String>,
}

#[derive(Serialize)]
struct CatalogueEntry<T> {
    id: T,
    label: &'static str,
}

/// Options offered by the chart and question pickers
#[derive(Serialize)]
pub struct Catalogue {
    charts: Vec<CatalogueEntry<ChartKind>>,
    questions: Vec<CatalogueEntry<AnalysisQuestion>>,
}

/// Builds the router over shared state
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { Redirect::to("/dashboard") }))
        .route("/login", get(serve_login_page).post(handle_login))
        .route("/logout", post(handle_logout))
        .route("/dashboard", get(serve_dashboard_page))
        .route("/api/catalogue", get(catalogue))
        .route("/api/info", get(dataset_info))
        .route("/api/refresh", post(refresh))
        .route("/api/upload", post(upload))
        .nest_service("/static", ServeDir::new("static"))
        .with_state(state)
}

/// Starts the web host and serves until the process is stopped
///
/// # Arguments
/// * `config` - Full dashboard configuration; `server.bind` picks the address
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Bind or serve failure
pub async fn run(config: DashboardConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Setup app state
    let bind = config.server.bind.clone();
    let session_duration = Duration::from_secs(config.server.session_hours * 60 * 60);
    let state = Arc::new(AppState::new(Dashboard::new(config), session_duration));

    // Drop expired sessions in the background
    let purge_state = Arc::clone(&state);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            let purged = purge_state.sessions.purge_expired();
            if purged > 0 {
                log::debug!("purged {} expired sessions", purged);
            }
        }
    });

    // Start server
    let listener = TcpListener::bind(&bind).await?;
    log::info!("listening on http://{}", bind);
    axum::serve(listener, router(state)).await?;

    Ok(())
}

async fn serve_login_page(State(state): State<Arc<AppState>>, jar: CookieJar) -> impl IntoResponse {
    let (jar, _) = state.ensure_session(jar);
    (jar, Html(include_str!("./static/login.html")))
}

async fn serve_dashboard_page(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    match state.session(&jar) {
        Ok((session, _)) if session.authenticated => Html(include_str!("./static/dashboard.html")).into_response(),
        _ => Redirect::to("/login").into_response(),
    }
}

/// Applies one login attempt to the caller's session
///
/// Success redirects to the dashboard so the whole page is rebuilt.
async fn handle_login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(credentials): Form<LoginForm>,
) -> Response {
    // Login attempts count against the cookie's session, so start one if needed
    let (jar, session_id) = state.ensure_session(jar);
    let outcome = state.sessions.with_session(&session_id, |session| {
        let (next, outcome) = state
            .dashboard
            .login(session.state, &credentials.username, &credentials.password);
        session.state = next;
        outcome
    });

    match outcome {
        Some(LoginOutcome::Unlocked) => (jar, Redirect::to("/dashboard")).into_response(),
        Some(outcome @ LoginOutcome::Rejected { .. }) => {
            (jar, (StatusCode::UNAUTHORIZED, outcome.message())).into_response()
        }
        Some(outcome @ (LoginOutcome::TooManyAttempts | LoginOutcome::CoolingDown { .. })) => {
            (jar, (StatusCode::TOO_MANY_REQUESTS, outcome.message())).into_response()
        }
        None => (StatusCode::INTERNAL_SERVER_ERROR, "Session unavailable").into_response(),
    }
}

async fn handle_logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> (CookieJar, Redirect) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.sessions.remove(cookie.value());
    }
    (jar.remove(Cookie::build(SESSION_COOKIE).path("/")), Redirect::to("/login"))
}

/// Runs blocking dashboard work (dataset loading may hit the network) off the runtime
async fn blocking<T, F>(task: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, DashboardError> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| ApiError(DashboardError::data_load(format!("background task failed: {}", e))))?
        .map_err(ApiError)
}

async fn catalogue() -> Json<Catalogue> {
    Json(Catalogue {
        charts: ChartKind::SELECTABLE
            .into_iter()
            .map(|kind| CatalogueEntry {
                id: kind,
                label: kind.label(),
            })
            .collect(),
        questions: AnalysisQuestion::ALL
            .into_iter()
            .map(|question| CatalogueEntry {
                id: question,
                label: question.label(),
            })
            .collect(),
    })
}

async fn dataset_info(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<InfoQuery>,
) -> Result<Json<DatasetInfo>, ApiError> {
    let (session, uploads) = state.session(&jar)?;
    let choice = match query.upload {
        Some(name) => DatasetChoice::Uploaded { name },
        None => DatasetChoice::Bundled,
    };
    let dashboard = Arc::clone(&state.dashboard);
    let info = blocking(move || dashboard.info(&session, &choice, &uploads)).await?;
    Ok(Json(info))
}

async fn refresh(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(selection): Json<SelectionContext>,
) -> Result<Json<DashboardView>, ApiError> {
    let (session, uploads) = state.session(&jar)?;
    let dashboard = Arc::clone(&state.dashboard);
    let view = blocking(move || dashboard.refresh(&session, &selection, &uploads)).await?;
    Ok(Json(view))
}

/// Accepts one or more CSV files and keeps them in the caller's session
async fn upload(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut multipart: Multipart,
) -> Result<Json<Vec<DatasetInfo>>, ApiError> {
    let (session, _) = state.session(&jar)?;
    session.require_unlocked()?;
    // The cookie is known to be present once the session lookup succeeded
    let session_id = jar
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .unwrap_or_default();

    let entity_column = state.dashboard.config().data.entity_column.clone();
    // Process the multipart form data, one CSV per field
    let mut parsed = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| DashboardError::data_load(format!("malformed upload: {}", e)))?
    {
        let name = field.file_name().unwrap_or("upload.csv").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| DashboardError::data_load(format!("{}: {}", name, e)))?;
        let dataset = state.dashboard.upload(&name, &bytes)?;
        parsed.push(crate::summary::dataset_info(&dataset, &entity_column));
        // Keep it for later refreshes of this session
        state.sessions.with_session(&session_id, |session| {
            session.uploads.insert(name, dataset);
        });
    }

    Ok(Json(parsed))
}
