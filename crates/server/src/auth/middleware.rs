use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::{
    extract::cookie::CookieJar,
    headers::{Authorization, HeaderMapExt, authorization::Bearer},
};
use chrono::Utc;
use db::models::{
    auth_session::{AuthSessionError, AuthSessionRepository, MAX_SESSION_INACTIVITY_DURATION},
    user::{User, UserError, UserRepository},
};
use secrecy::ExposeSecret;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use uuid::Uuid;

use super::SESSION_COOKIE;
use crate::{AppState, error::ApiError};

/// Attached to every request that passed `require_session`.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub user: User,
    pub session_id: Uuid,
}

/// The session id carried by the session cookie, if it parses.
pub fn session_id_from_jar(jar: &CookieJar) -> Option<Uuid> {
    let cookie = jar.get(SESSION_COOKIE)?;
    Uuid::parse_str(cookie.value()).ok()
}

fn session_id_from_headers(headers: &HeaderMap) -> Option<Uuid> {
    session_id_from_jar(&CookieJar::from_headers(headers))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .typed_get::<Authorization<Bearer>>()
        .map(|Authorization(bearer)| bearer.token().to_owned())
}

fn unauthorized() -> Response {
    ApiError::Unauthorized("Authentication required".to_string()).into_response()
}

/// Resolve the cookie to an authorized, active session and its user.
async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<RequestContext, Response> {
    let Some(session_id) = session_id_from_headers(headers) else {
        return Err(unauthorized());
    };

    let pool = state.pool();
    let session = match AuthSessionRepository::get(pool, session_id).await {
        Ok(session) => session,
        Err(AuthSessionError::NotFound) => {
            warn!("session `{}` not found", session_id);
            return Err(unauthorized());
        }
        Err(AuthSessionError::Database(error)) => {
            warn!(?error, "failed to load session");
            return Err(ApiError::Database(error).into_response());
        }
    };

    if session.is_revoked() {
        warn!("session `{}` rejected (revoked)", session_id);
        return Err(unauthorized());
    }

    if session.inactivity_duration(Utc::now()) > MAX_SESSION_INACTIVITY_DURATION {
        warn!("session `{}` expired due to inactivity; revoking", session_id);
        if let Err(error) = AuthSessionRepository::revoke(pool, session.id).await {
            warn!(?error, "failed to revoke inactive session");
        }
        return Err(unauthorized());
    }

    // Pending sessions are still in the middle of the OAuth dance.
    let Some(user_id) = session.user_id else {
        debug!("session `{}` has no user yet", session_id);
        return Err(unauthorized());
    };

    let user = match UserRepository::find_by_id(pool, user_id).await {
        Ok(Some(user)) if user.active => user,
        Ok(Some(_)) => {
            warn!("user `{}` is inactive", user_id);
            return Err(unauthorized());
        }
        Ok(None) | Err(UserError::NotFound) => {
            warn!("user `{}` missing", user_id);
            return Err(unauthorized());
        }
        Err(UserError::Database(error)) => {
            warn!(?error, "failed to load user");
            return Err(ApiError::Database(error).into_response());
        }
    };

    if let Err(error) = AuthSessionRepository::touch(pool, session.id).await {
        warn!(?error, "failed to update session last-used timestamp");
    }

    Ok(RequestContext {
        user,
        session_id: session.id,
    })
}

pub async fn require_session(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    match authenticate(&state, req.headers()).await {
        Ok(ctx) => {
            req.extensions_mut().insert(ctx);
            next.run(req).await
        }
        Err(response) => response,
    }
}

/// Like `require_session`, but also admits callers presenting the configured
/// snapshot trigger token as a bearer token.
pub async fn require_session_or_trigger_token(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let presented = bearer_token(req.headers());
    if let (Some(expected), Some(presented)) =
        (state.settings().snapshot_trigger_token.as_ref(), presented)
    {
        let matches: bool = expected
            .expose_secret()
            .as_bytes()
            .ct_eq(presented.as_bytes())
            .into();
        if matches {
            debug!("request authorized by trigger token");
            return next.run(req).await;
        }
        warn!("rejected invalid trigger token");
        return unauthorized();
    }

    match authenticate(&state, req.headers()).await {
        Ok(ctx) => {
            req.extensions_mut().insert(ctx);
            next.run(req).await
        }
        Err(response) => response,
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderValue, header};

    use super::*;

    #[test]
    fn session_cookie_is_parsed() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("other=1; {SESSION_COOKIE}={id}")).unwrap(),
        );
        assert_eq!(session_id_from_headers(&headers), Some(id));
    }

    #[test]
    fn malformed_session_cookie_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("{SESSION_COOKIE}=not-a-uuid")).unwrap(),
        );
        assert_eq!(session_id_from_headers(&headers), None);
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        for value in ["Bearer abc", "bearer abc", "BEARER abc"] {
            headers.insert(header::AUTHORIZATION, HeaderValue::from_static(value));
            assert_eq!(bearer_token(&headers).as_deref(), Some("abc"), "{value}");
        }
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
    }
}
