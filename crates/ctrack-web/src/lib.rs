//! Axum JSON API boundary for the contest catalog and bookmark service.
//!
//! Authentication is an external collaborator: a verified user id arrives in
//! the `x-user-id` header, put there by whatever fronts this service.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use ctrack_adapters::SolutionsClient;
use ctrack_core::{Bookmark, Contest, ContestSnapshot, ContestStatus, Platform};
use ctrack_store::{BookmarkError, BookmarkStore, CatalogFilter, CatalogStore, HttpFetcher};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use uuid::Uuid;

pub const CRATE_NAME: &str = "ctrack-web";

pub const USER_ID_HEADER: &str = "x-user-id";

/// Solution-video lookup dependencies; absent when no API key is configured.
pub struct SolutionsState {
    pub client: SolutionsClient,
    pub http: Arc<HttpFetcher>,
}

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<CatalogStore>,
    pub bookmarks: Arc<BookmarkStore>,
    pub solutions: Option<Arc<SolutionsState>>,
}

impl AppState {
    pub fn new(catalog: Arc<CatalogStore>, bookmarks: Arc<BookmarkStore>) -> Self {
        Self {
            catalog,
            bookmarks,
            solutions: None,
        }
    }

    pub fn with_solutions(mut self, solutions: Arc<SolutionsState>) -> Self {
        self.solutions = Some(solutions);
        self
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/contests", get(list_contests_handler))
        .route("/contests/{identity}", get(contest_detail_handler))
        .route("/contests/{identity}/solution", get(contest_solution_handler))
        .route("/bookmarks", post(create_bookmark_handler))
        .route("/bookmarks", get(list_bookmarks_handler))
        .route("/bookmarks/{identity}", delete(delete_bookmark_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "web api listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

/// Verified caller identity, supplied upstream. Absent header means the
/// request never went through the auth collaborator.
pub struct AuthedUser(pub String);

impl<S> FromRequestParts<S> for AuthedUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(ToString::to_string);
        match user_id {
            Some(user_id) => Ok(AuthedUser(user_id)),
            None => Err(error_response(
                StatusCode::UNAUTHORIZED,
                "missing verified user id",
            )),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct ContestsQuery {
    /// Comma-separated platform names.
    platform: Option<String>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

/// Catalog contest plus the status derived at read time.
#[derive(Debug, Clone, Serialize)]
pub struct ContestView {
    pub identity: Uuid,
    pub platform: Platform,
    pub native_id: String,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub url: String,
    pub status: ContestStatus,
}

impl ContestView {
    fn from_contest(contest: Contest, now: DateTime<Utc>) -> Self {
        let status = contest.status(now);
        Self {
            identity: contest.identity,
            platform: contest.platform,
            native_id: contest.native_id,
            title: contest.title,
            start_time: contest.start_time,
            end_time: contest.end_time,
            url: contest.url,
            status,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateBookmarkRequest {
    contest_identity: Uuid,
    /// Client-held copy for contests the catalog has rotated out.
    #[serde(default)]
    snapshot: Option<ContestSnapshot>,
}

async fn list_contests_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ContestsQuery>,
) -> Response {
    let platforms = match parse_platforms(query.platform.as_deref()) {
        Ok(platforms) => platforms,
        Err(unknown) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("unknown platform: {unknown}"),
            )
        }
    };
    let filter = CatalogFilter {
        platforms,
        from: query.from,
        to: query.to,
    };
    let now = Utc::now();
    let contests: Vec<ContestView> = state
        .catalog
        .query(&filter)
        .await
        .into_iter()
        .map(|c| ContestView::from_contest(c, now))
        .collect();
    Json(contests).into_response()
}

async fn contest_detail_handler(
    State(state): State<Arc<AppState>>,
    Path(identity): Path<Uuid>,
) -> Response {
    match state.catalog.get_by_identity(identity).await {
        Some(contest) => Json(ContestView::from_contest(contest, Utc::now())).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "contest not found"),
    }
}

/// Solution video for a past contest, matched by title against the
/// platform's playlist.
#[derive(Debug, Serialize)]
pub struct SolutionView {
    pub contest_identity: Uuid,
    pub video_title: String,
    pub video_url: String,
}

async fn contest_solution_handler(
    State(state): State<Arc<AppState>>,
    Path(identity): Path<Uuid>,
) -> Response {
    let Some(contest) = state.catalog.get_by_identity(identity).await else {
        return error_response(StatusCode::NOT_FOUND, "contest not found");
    };
    if contest.status(Utc::now()) == ContestStatus::Upcoming {
        return error_response(
            StatusCode::NOT_FOUND,
            "no solution video before the contest starts",
        );
    }
    let Some(solutions) = &state.solutions else {
        return error_response(StatusCode::NOT_FOUND, "solution lookup not configured");
    };
    match solutions
        .client
        .find_solution(&solutions.http, contest.platform, &contest.title)
        .await
    {
        Ok(Some(video)) => Json(SolutionView {
            contest_identity: identity,
            video_url: video.url(),
            video_title: video.title,
        })
        .into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "no solution video found"),
        Err(err) => error_response(StatusCode::BAD_GATEWAY, &err.to_string()),
    }
}

async fn create_bookmark_handler(
    State(state): State<Arc<AppState>>,
    AuthedUser(user_id): AuthedUser,
    Json(body): Json<CreateBookmarkRequest>,
) -> Response {
    match state
        .bookmarks
        .add(&state.catalog, &user_id, body.contest_identity, body.snapshot)
        .await
    {
        Ok(bookmark) => (StatusCode::CREATED, Json(bookmark)).into_response(),
        Err(err) => bookmark_error_response(err),
    }
}

async fn delete_bookmark_handler(
    State(state): State<Arc<AppState>>,
    AuthedUser(user_id): AuthedUser,
    Path(identity): Path<Uuid>,
) -> Response {
    match state.bookmarks.remove(&user_id, identity).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => bookmark_error_response(err),
    }
}

async fn list_bookmarks_handler(
    State(state): State<Arc<AppState>>,
    AuthedUser(user_id): AuthedUser,
) -> Response {
    let bookmarks: Vec<Bookmark> = state.bookmarks.list(&user_id).await;
    Json(bookmarks).into_response()
}

fn parse_platforms(raw: Option<&str>) -> Result<Option<Vec<Platform>>, String> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let mut platforms = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match Platform::from_str(part) {
            Ok(platform) => platforms.push(platform),
            Err(_) => return Err(part.to_string()),
        }
    }
    Ok(if platforms.is_empty() {
        None
    } else {
        Some(platforms)
    })
}

fn bookmark_error_response(err: BookmarkError) -> Response {
    let status = match err {
        BookmarkError::AlreadyBookmarked(_) => StatusCode::CONFLICT,
        BookmarkError::BookmarkNotFound(_) | BookmarkError::ContestNotFound(_) => {
            StatusCode::NOT_FOUND
        }
    };
    error_response(status, &err.to_string())
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}
