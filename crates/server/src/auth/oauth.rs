//! GitHub OAuth login.
//!
//! `/login` opens a pending session holding a random state token and sends
//! the browser to GitHub. GitHub redirects back to `/login/authorize` with
//! the same state and a code, which is traded for the user's token. The
//! session is authorized only when the state matches and the user belongs
//! to the required organization.

use axum::{
    Extension, Json, Router,
    extract::{Query, State},
    response::Redirect,
    routing::get,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use db::models::{auth_session::AuthSessionRepository, user::{User, UserRepository}};
use rand::{Rng, distr::Alphanumeric};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tracing::{debug, info, instrument, warn};
use utils::response::ApiResponse;

use super::{RequestContext, SESSION_COOKIE, session_id_from_jar};
use crate::{AppState, error::ApiError};

const STATE_TOKEN_LEN: usize = 32;

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/login", get(login))
        .route("/login/authorize", get(authorize))
        .route("/logout", get(logout))
}

pub fn protected_router() -> Router<AppState> {
    Router::new().route("/me", get(me))
}

fn generate_state_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(STATE_TOKEN_LEN)
        .map(char::from)
        .collect()
}

fn session_cookie(value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
}

fn invalid_state() -> ApiError {
    ApiError::Unauthorized("Invalid state".to_string())
}

#[instrument(name = "auth.login", skip(state, jar))]
async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), ApiError> {
    let settings = state.settings();
    if settings.github_app_id.is_empty() {
        return Err(ApiError::Internal("GitHub OAuth app is not configured".to_string()));
    }

    match AuthSessionRepository::purge_stale(state.pool(), Utc::now()).await {
        Ok(0) => {}
        Ok(purged) => debug!(purged, "Purged stale sessions"),
        Err(error) => warn!(?error, "Failed to purge stale sessions"),
    }

    let oauth_state = generate_state_token();
    let session = AuthSessionRepository::create(state.pool(), &oauth_state).await?;
    let url = state.github.authorize_url(
        &settings.github_app_id,
        &settings.oauth_redirect_uri(),
        &oauth_state,
    )?;

    info!(session_id = %session.id, "Starting OAuth login");
    let jar = jar.add(session_cookie(
        session.id.to_string(),
        settings.secure_cookies(),
    ));
    Ok((jar, Redirect::to(url.as_str())))
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    pub state: Option<String>,
    pub code: Option<String>,
}

#[instrument(name = "auth.authorize", skip_all)]
async fn authorize(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<AuthorizeQuery>,
) -> Result<Redirect, ApiError> {
    let session_id = session_id_from_jar(&jar).ok_or_else(invalid_state)?;
    let session = AuthSessionRepository::get(state.pool(), session_id).await?;

    let presented = query.state.as_deref().unwrap_or_default();
    let state_matches = match (&session.oauth_state, session.is_revoked()) {
        (Some(expected), false) => bool::from(expected.as_bytes().ct_eq(presented.as_bytes())),
        _ => false,
    };
    if !state_matches {
        warn!(session_id = %session.id, "OAuth state mismatch");
        return Err(invalid_state());
    }

    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing authorization code".to_string()))?;

    let settings = state.settings();
    let secret = settings
        .github_app_secret
        .as_ref()
        .ok_or_else(|| ApiError::Internal("GitHub OAuth secret is not configured".to_string()))?;
    let token = state
        .github
        .exchange_code(&settings.github_app_id, secret, &code)
        .await?;

    // An unset organization admits nobody.
    let orgs = state.github.user_orgs(&token).await?;
    let is_member = !settings.required_org.is_empty()
        && orgs.iter().any(|org| org.login == settings.required_org);
    if !is_member {
        warn!(required_org = %settings.required_org, "Organization requirement not met");
        return Err(ApiError::Forbidden(
            "Organization requirement not met".to_string(),
        ));
    }

    let github_user = state.github.current_user(&token).await?;
    let user = UserRepository::upsert(state.pool(), &github_user.login, &token).await?;
    AuthSessionRepository::attach_user(state.pool(), session.id, user.id).await?;

    info!(user = %user.username, "User logged in");
    Ok(Redirect::to("/"))
}

#[instrument(name = "auth.logout", skip_all)]
async fn logout(State(state): State<AppState>, jar: CookieJar) -> Result<(CookieJar, Redirect), ApiError> {
    if let Some(session_id) = session_id_from_jar(&jar) {
        AuthSessionRepository::revoke(state.pool(), session_id).await?;
        info!(session_id = %session_id, "Session revoked");
    }
    let jar = jar.remove(Cookie::build((SESSION_COOKIE, "")).path("/"));
    Ok((jar, Redirect::to("/")))
}

async fn me(Extension(ctx): Extension<RequestContext>) -> Json<ApiResponse<User>> {
    Json(ApiResponse::success(ctx.user))
}
