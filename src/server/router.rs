use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, Request, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower::ServiceBuilder;
use tracing::{debug, info};

use crate::server::error::ApiError;
use crate::server::shutdown::ShutdownManager;
use crate::server::types::{
    HealthResponse, InputRequest, InputResponse, PidQuery, ProgramResponse, RunQuery, RunRequest,
    RunResponse, StopResponse,
};
use crate::server::AppState;
use crate::session::{PollResult, Session, SessionMode};
use crate::toolchain::{BuildRequest, Compiler, Language, Toolchain};

pub fn build_router(state: AppState, shutdown: Arc<ShutdownManager>) -> Router {
    Router::new()
        .route("/run/{mode}", post(run_program))
        .route("/program", get(program))
        .route("/input", post(input))
        .route("/stop", post(stop))
        .route("/health", get(health))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn_with_state(shutdown, track_requests))
                .layer(middleware::from_fn(cors)),
        )
}

/// Count in-flight requests so shutdown can wait for them.
async fn track_requests(
    State(shutdown): State<Arc<ShutdownManager>>,
    request: Request,
    next: Next,
) -> Response {
    shutdown.increment_requests();
    let _guard = RequestGuard(shutdown);
    next.run(request).await
}

struct RequestGuard(Arc<ShutdownManager>);

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.0.decrement_requests();
    }
}

/// Permissive CORS on every response; preflight requests end here.
async fn cors(request: Request, next: Next) -> Response {
    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    response
}

async fn run_program(
    State(state): State<AppState>,
    Path(mode): Path<String>,
    query: Result<Query<RunQuery>, QueryRejection>,
    body: Result<Json<RunRequest>, JsonRejection>,
) -> Result<Json<RunResponse>, ApiError> {
    let mode: SessionMode = mode
        .parse()
        .map_err(|mode| ApiError::BadRequest(format!("unknown run mode '{mode}'")))?;
    let Query(query) = query?;
    let Json(body) = body?;

    let language: Language = query
        .language
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("missing 'language' query parameter".to_string()))?
        .parse()?;
    let compiler: Compiler = query.compiler_type.as_deref().unwrap_or("gcc").parse()?;

    let request = BuildRequest {
        language,
        compiler,
        source: body.source_code,
        compiler_options: body.compiler_options,
    };
    // Picks up `[toolchain]` changes from a config reload.
    let toolchain = Toolchain::new(state.config.get().toolchain);
    let build = toolchain
        .build(&request, mode == SessionMode::Debugger)
        .await?;
    let spec = toolchain.spawn_spec(build, mode, &body.command_line_arguments);

    let pid = state.registry.create(mode, spec)?;
    let session = state.registry.get(pid)?;
    deliver_initial_input(&session, &body.stdin);
    info!(session_id = pid, %mode, ?language, ?compiler, "program started");

    Ok(Json(RunResponse { pid }))
}

/// Hand the submitted stdin to a freshly started session. Batch programs
/// get end-of-input right after it.
fn deliver_initial_input(session: &Session, stdin: &str) {
    let delivered = match session.mode() {
        _ if stdin.is_empty() => Ok(()),
        SessionMode::Text => session.write_stdin(stdin.as_bytes()),
        SessionMode::Interactive | SessionMode::Debugger => session.submit_input(stdin),
    };
    // The program may legitimately be gone already.
    if let Err(err) = delivered {
        debug!(session_id = session.id(), "initial input not delivered: {err}");
    }
    if session.mode() == SessionMode::Text {
        session.close_stdin();
    }
}

async fn program(
    State(state): State<AppState>,
    query: Result<Query<PidQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let pid = query.pid()?;
    let session = state.registry.get(pid)?;

    let poll = match query.offset {
        Some(offset) => session.poll_from(offset)?,
        None => session.poll()?,
    };
    match poll {
        PollResult::Finished => Ok(StatusCode::NO_CONTENT.into_response()),
        PollResult::Output { data, offset } => Ok(Json(ProgramResponse {
            pid,
            output: String::from_utf8_lossy(&data).into_owned(),
            offset,
            state: session.state(),
            exit: session.exit_info(),
        })
        .into_response()),
    }
}

async fn input(
    State(state): State<AppState>,
    query: Result<Query<PidQuery>, QueryRejection>,
    body: Result<Json<InputRequest>, JsonRejection>,
) -> Result<Json<InputResponse>, ApiError> {
    let Query(query) = query?;
    let pid = query.pid()?;
    let Json(body) = body?;

    state.registry.get(pid)?.submit_input(&body.stdin)?;
    Ok(Json(InputResponse { pid }))
}

async fn stop(
    State(state): State<AppState>,
    query: Result<Query<PidQuery>, QueryRejection>,
) -> Result<Json<StopResponse>, ApiError> {
    let Query(query) = query?;
    let pid = query.pid()?;
    let session = state.registry.get(pid)?;

    let exit = session.kill();
    Ok(Json(StopResponse {
        pid,
        state: session.state(),
        exit,
    }))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "runbox",
        sessions: state.registry.len(),
        running: state.registry.active_count(),
    })
}
