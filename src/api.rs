//! Web API Module
//!
//! Exposes the session log and the agent pipeline to the frontend.
//! All endpoints return JSON and require no authentication (prototype mode).

use crate::agent::{
    completion::{CompletionClient, CompletionError, OfflineCompletionClient, OpenAiCompletionClient},
    memory::{MemoryError, Session},
    pipeline::CareerPipeline,
    types::{Route, UserProfile},
};
use crate::config::AppConfig;
use actix_cors::Cors;
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use uuid::Uuid;

// ============================================================
// SESSION SLOTS
// ============================================================

/// A live session plus the bookkeeping the server needs around it
pub struct SessionSlot {
    session: AsyncMutex<Session>,
    running: AtomicBool,
    last_access: Mutex<Instant>,
}

/// Marks a pipeline run in flight; cleared on drop
pub struct RunGuard<'a> {
    slot: &'a SessionSlot,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.slot.running.store(false, Ordering::Release);
    }
}

impl SessionSlot {
    fn new(session: Session) -> Self {
        Self {
            session: AsyncMutex::new(session),
            running: AtomicBool::new(false),
            last_access: Mutex::new(Instant::now()),
        }
    }

    pub async fn lock(&self) -> AsyncMutexGuard<'_, Session> {
        self.session.lock().await
    }

    /// Claim the slot for a run; `None` when another run is in flight
    pub fn begin_run(&self) -> Option<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard { slot: self })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn last_access(&self) -> MutexGuard<'_, Instant> {
        self.last_access.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn touch(&self) {
        *self.last_access() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_access().elapsed()
    }
}

type SharedSession = Arc<SessionSlot>;

// ============================================================
// APPLICATION STATE
// ============================================================

/// Shared application state
pub struct AppState {
    sessions: Mutex<HashMap<String, SharedSession>>,
    /// Sessions idle for at least this long are dropped on the next create
    session_ttl: Duration,
    pub pipeline: CareerPipeline,
}

impl AppState {
    pub fn new(client: Arc<dyn CompletionClient>, max_tokens: u32) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            session_ttl: Duration::from_secs(crate::config::DEFAULT_SESSION_TTL_SECS),
            pipeline: CareerPipeline::new(client, max_tokens),
        }
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Pick the completion client: OpenAI-compatible when a key is set,
    /// otherwise the offline client (demo mode)
    pub fn from_config(config: &AppConfig) -> Result<Self, CompletionError> {
        let completion = &config.completion;
        let client: Arc<dyn CompletionClient> = match &completion.api_key {
            Some(key) => Arc::new(OpenAiCompletionClient::new(completion, key)?),
            None => {
                warn!("OPENAI_API_KEY not set; running in demo mode with fallback responses");
                Arc::new(OfflineCompletionClient)
            }
        };
        Ok(Self::new(client, completion.max_tokens)
            .with_session_ttl(Duration::from_secs(config.session_ttl_secs)))
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, SharedSession>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn create_session(&self) -> (String, DateTime<Utc>) {
        let id = Uuid::new_v4().to_string();
        let session = Session::new();
        let started_at = session.started_at();

        let mut sessions = self.sessions();
        let before = sessions.len();
        let ttl = self.session_ttl;
        sessions.retain(|_, slot| slot.is_running() || slot.idle_for() < ttl);
        if sessions.len() < before {
            debug!("Expired {} idle sessions", before - sessions.len());
        }
        sessions.insert(id.clone(), Arc::new(SessionSlot::new(session)));

        (id, started_at)
    }

    pub fn session(&self, id: &str) -> Option<SharedSession> {
        let slot = self.sessions().get(id).cloned()?;
        slot.touch();
        Some(slot)
    }

    pub fn session_count(&self) -> usize {
        self.sessions().len()
    }

    pub fn remove_session(&self, id: &str) -> bool {
        self.sessions().remove(id).is_some()
    }
}

// ============================================================
// API REQUEST/RESPONSE TYPES
// ============================================================

#[derive(Deserialize)]
pub struct RunRequest {
    pub challenge: String,
    #[serde(default)]
    pub profile: UserProfile,
    /// Keep the previous transcript instead of starting a new conversation
    #[serde(default)]
    pub keep_history: bool,
}

#[derive(Serialize)]
pub struct RunResponse {
    pub route: Route,
    pub recommendation: String,
    pub transcript: Vec<String>,
}

#[derive(Serialize)]
pub struct CreatedSession {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Deserialize)]
pub struct RecentQuery {
    #[serde(default = "default_recent_count")]
    pub count: i64,
}

fn default_recent_count() -> i64 {
    5
}

#[derive(Deserialize)]
pub struct ContextQuery {
    pub key: Option<String>,
}

#[derive(Deserialize)]
pub struct KeyValueRequest {
    pub key: String,
    pub value: Value,
}

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: &str) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message.to_string()),
        }
    }
}

fn session_not_found() -> HttpResponse {
    HttpResponse::NotFound().json(ApiResponse::<()>::error("Session not found"))
}

fn memory_error(e: &MemoryError) -> HttpResponse {
    match e {
        MemoryError::InvalidArgument(_) => {
            HttpResponse::BadRequest().json(ApiResponse::<()>::error(&e.to_string()))
        }
        MemoryError::Serialization(_) => {
            HttpResponse::InternalServerError().json(ApiResponse::<()>::error(&e.to_string()))
        }
    }
}

// ============================================================
// API HANDLERS
// ============================================================

/// Health check endpoint
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "Pathfinder API",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn create_session(data: web::Data<Arc<AppState>>) -> impl Responder {
    let (session_id, started_at) = data.create_session();
    info!("Created session {}", session_id);
    HttpResponse::Ok().json(ApiResponse::success(CreatedSession {
        session_id,
        started_at,
    }))
}

async fn delete_session(data: web::Data<Arc<AppState>>, path: web::Path<String>) -> impl Responder {
    let session_id = path.into_inner();
    if data.remove_session(&session_id) {
        HttpResponse::Ok().json(ApiResponse::success(session_id))
    } else {
        session_not_found()
    }
}

/// Run the agent pipeline for one challenge
async fn run_pipeline(
    data: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    req: web::Json<RunRequest>,
) -> impl Responder {
    let session_id = path.into_inner();

    if req.challenge.trim().is_empty() {
        return HttpResponse::BadRequest().json(ApiResponse::<()>::error("Please enter something first."));
    }

    let Some(shared) = data.session(&session_id) else {
        return session_not_found();
    };

    // One in-flight run per session; short reads only make us wait
    let Some(_run) = shared.begin_run() else {
        return HttpResponse::Conflict()
            .json(ApiResponse::<()>::error("Session is busy with another run"));
    };
    let mut session = shared.lock().await;

    if !req.keep_history {
        session.reset();
    }

    match data.pipeline.run(&mut session, &req.profile, &req.challenge).await {
        Ok(outcome) => HttpResponse::Ok().json(ApiResponse::success(RunResponse {
            route: outcome.route,
            recommendation: outcome.recommendation,
            transcript: session.entries(),
        })),
        Err(e) => memory_error(&e),
    }
}

/// Plain "<agent>: <message>" transcript
async fn get_entries(data: web::Data<Arc<AppState>>, path: web::Path<String>) -> impl Responder {
    let Some(shared) = data.session(&path.into_inner()) else {
        return session_not_found();
    };
    let session = shared.lock().await;
    HttpResponse::Ok().json(ApiResponse::success(session.entries()))
}

async fn get_log(data: web::Data<Arc<AppState>>, path: web::Path<String>) -> impl Responder {
    let Some(shared) = data.session(&path.into_inner()) else {
        return session_not_found();
    };
    let session = shared.lock().await;
    HttpResponse::Ok().json(ApiResponse::success(session.detailed_entries()))
}

async fn get_summary(data: web::Data<Arc<AppState>>, path: web::Path<String>) -> impl Responder {
    let Some(shared) = data.session(&path.into_inner()) else {
        return session_not_found();
    };
    let session = shared.lock().await;
    HttpResponse::Ok().json(ApiResponse::success(session.summary()))
}

/// Downloadable session document
async fn export_session(data: web::Data<Arc<AppState>>, path: web::Path<String>) -> impl Responder {
    let session_id = path.into_inner();
    let Some(shared) = data.session(&session_id) else {
        return session_not_found();
    };
    let session = shared.lock().await;

    match session.export_session() {
        Ok(document) => HttpResponse::Ok()
            .content_type("application/json")
            .insert_header((
                "Content-Disposition",
                format!("attachment; filename=\"pathfinder-session-{}.json\"", session_id),
            ))
            .body(document),
        Err(e) => memory_error(&e),
    }
}

async fn search_entries(
    data: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    query: web::Query<SearchQuery>,
) -> impl Responder {
    let Some(shared) = data.session(&path.into_inner()) else {
        return session_not_found();
    };
    let session = shared.lock().await;
    HttpResponse::Ok().json(ApiResponse::success(session.search(&query.q)))
}

async fn entries_by_agent(
    data: web::Data<Arc<AppState>>,
    path: web::Path<(String, String)>,
) -> impl Responder {
    let (session_id, agent) = path.into_inner();
    let Some(shared) = data.session(&session_id) else {
        return session_not_found();
    };
    let session = shared.lock().await;
    HttpResponse::Ok().json(ApiResponse::success(session.entries_by_agent(&agent)))
}

async fn recent_entries(
    data: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    query: web::Query<RecentQuery>,
) -> impl Responder {
    let Some(shared) = data.session(&path.into_inner()) else {
        return session_not_found();
    };
    let session = shared.lock().await;
    // Negative counts return nothing
    let count = usize::try_from(query.count).unwrap_or(0);
    HttpResponse::Ok().json(ApiResponse::success(session.recent_entries(count)))
}

async fn reset_session(data: web::Data<Arc<AppState>>, path: web::Path<String>) -> impl Responder {
    let Some(shared) = data.session(&path.into_inner()) else {
        return session_not_found();
    };
    let mut session = shared.lock().await;
    session.reset();
    HttpResponse::Ok().json(ApiResponse::success(session.summary()))
}

async fn get_insights(data: web::Data<Arc<AppState>>, path: web::Path<String>) -> impl Responder {
    let Some(shared) = data.session(&path.into_inner()) else {
        return session_not_found();
    };
    let session = shared.lock().await;
    HttpResponse::Ok().json(ApiResponse::success(session.insights()))
}

async fn record_insight(
    data: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    req: web::Json<KeyValueRequest>,
) -> impl Responder {
    let Some(shared) = data.session(&path.into_inner()) else {
        return session_not_found();
    };
    let mut session = shared.lock().await;
    let KeyValueRequest { key, value } = req.into_inner();
    match session.record_insight(&key, value) {
        Ok(()) => HttpResponse::Ok().json(ApiResponse::success(session.insights())),
        Err(e) => memory_error(&e),
    }
}

/// Whole context map, or a single value with `?key=`
async fn get_context(
    data: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    query: web::Query<ContextQuery>,
) -> impl Responder {
    let Some(shared) = data.session(&path.into_inner()) else {
        return session_not_found();
    };
    let session = shared.lock().await;
    match &query.key {
        Some(key) => HttpResponse::Ok().json(ApiResponse::success(session.get_context(key))),
        None => HttpResponse::Ok().json(ApiResponse::success(session.context())),
    }
}

async fn set_context(
    data: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    req: web::Json<KeyValueRequest>,
) -> impl Responder {
    let Some(shared) = data.session(&path.into_inner()) else {
        return session_not_found();
    };
    let mut session = shared.lock().await;
    let KeyValueRequest { key, value } = req.into_inner();
    match session.set_context(&key, value) {
        Ok(()) => HttpResponse::Ok().json(ApiResponse::success(session.context())),
        Err(e) => memory_error(&e),
    }
}

// ============================================================
// SERVER CONFIGURATION
// ============================================================

/// Register all routes
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/api/sessions", web::post().to(create_session))
        .route("/api/sessions/{session_id}", web::delete().to(delete_session))
        .route("/api/sessions/{session_id}/run", web::post().to(run_pipeline))
        .route("/api/sessions/{session_id}/entries", web::get().to(get_entries))
        .route("/api/sessions/{session_id}/log", web::get().to(get_log))
        .route("/api/sessions/{session_id}/summary", web::get().to(get_summary))
        .route("/api/sessions/{session_id}/export", web::get().to(export_session))
        .route("/api/sessions/{session_id}/search", web::get().to(search_entries))
        .route("/api/sessions/{session_id}/agents/{agent}", web::get().to(entries_by_agent))
        .route("/api/sessions/{session_id}/recent", web::get().to(recent_entries))
        .route("/api/sessions/{session_id}/reset", web::post().to(reset_session))
        .route("/api/sessions/{session_id}/insights", web::get().to(get_insights))
        .route("/api/sessions/{session_id}/insights", web::post().to(record_insight))
        .route("/api/sessions/{session_id}/context", web::get().to(get_context))
        .route("/api/sessions/{session_id}/context", web::post().to(set_context));
}

/// Configure and run the API server
pub async fn run_server(config: AppConfig) -> std::io::Result<()> {
    let state = AppState::from_config(&config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    let state = Arc::new(state);

    info!("Pathfinder API starting at http://{}:{}", config.host, config.port);
    info!("Completion model: {}", config.completion.model);
    println!("📚 API Endpoints:");
    println!("   POST   /api/sessions                    - Create session");
    println!("   POST   /api/sessions/:id/run            - Run agents on a challenge");
    println!("   GET    /api/sessions/:id/entries        - Plain transcript");
    println!("   GET    /api/sessions/:id/log            - Detailed log");
    println!("   GET    /api/sessions/:id/summary        - Session summary");
    println!("   GET    /api/sessions/:id/export         - Export session document");
    println!("   GET    /api/sessions/:id/search?q=      - Search messages");
    println!("   GET    /api/sessions/:id/agents/:agent  - Entries by agent");
    println!("   GET    /api/sessions/:id/recent?count=  - Most recent entries");
    println!("   POST   /api/sessions/:id/reset          - Start a new conversation");
    println!("   GET    /api/sessions/:id/insights       - User insights");
    println!("   GET    /api/sessions/:id/context        - Conversation context");
    println!("   DELETE /api/sessions/:id                - Discard session");

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header();

        App::new()
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .configure(routes)
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await
}
