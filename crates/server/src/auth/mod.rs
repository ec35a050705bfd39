mod middleware;
pub mod oauth;

pub use middleware::{
    RequestContext, require_session, require_session_or_trigger_token, session_id_from_jar,
};

/// Cookie holding the id of the browser's `auth_sessions` row.
pub const SESSION_COOKIE: &str = "sprints_session";
