use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use tracing::{debug, warn};

use super::UserIdentity;
use crate::routes::StatusBody;
use crate::state::AppState;

/// The signed-in, allow-listed user making the request.
#[derive(Clone, Debug)]
pub struct CurrentUser(pub UserIdentity);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    /// No valid session. API callers get 401, browsers are sent to the login page.
    Unauthenticated { api: bool },
    Forbidden,
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let api = parts.uri.path().starts_with("/api/");
        let user = state
            .identify(&parts.headers)
            .ok_or(AuthRejection::Unauthenticated { api })?;
        if !state.allow_list().is_allowed(&user.email) {
            warn!(user_id = %user.id, "session user is no longer on the allow-list");
            return Err(AuthRejection::Forbidden);
        }
        debug!(user_id = %user.id, "request authenticated");
        Ok(CurrentUser(user))
    }
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        match self {
            AuthRejection::Unauthenticated { api: true } => (
                StatusCode::UNAUTHORIZED,
                Json(StatusBody::error("Authentication required")),
            )
                .into_response(),
            AuthRejection::Unauthenticated { api: false } => {
                Redirect::to("/auth/login").into_response()
            }
            AuthRejection::Forbidden => (
                StatusCode::FORBIDDEN,
                Json(StatusBody::error("Unauthorized email address")),
            )
                .into_response(),
        }
    }
}
