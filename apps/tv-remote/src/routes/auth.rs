use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{AppendHeaders, IntoResponse, Redirect, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::{ApiError, StatusBody};
use crate::auth::{
    cookie::{read_cookie, LOGIN_COOKIE, LOGIN_STATE_TTL, SESSION_COOKIE},
    AuthRejection, CookieError, IdTokenClaims, LoginState, OidcClient, OidcError,
};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

pub async fn login(State(state): State<AppState>) -> Result<Response, ApiError> {
    let oidc = provider(&state)?;
    let login = LoginState::generate();
    let url = oidc
        .authorize_url(&login.state, &login.nonce)
        .await
        .map_err(provider_error)?;
    let value = state.cookies().issue_login(&login).map_err(cookie_error)?;
    let cookie = state.cookies().set_cookie(LOGIN_COOKIE, &value, LOGIN_STATE_TTL);
    Ok((
        AppendHeaders([(header::SET_COOKIE, cookie)]),
        Redirect::to(url.as_str()),
    )
        .into_response())
}

pub async fn callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Result<Response, ApiError> {
    let oidc = provider(&state)?;
    if let Some(error) = params.error.as_deref() {
        warn!(error, "identity provider returned an error");
        return Err(ApiError::Validation("Failed to get user info".into()));
    }

    let login = read_cookie(&headers, LOGIN_COOKIE)
        .and_then(|raw| state.cookies().open_login(raw).ok())
        .ok_or_else(|| ApiError::Validation("Login session expired, please sign in again".into()))?;
    if params.state.as_deref() != Some(login.state.as_str()) {
        warn!("login state mismatch on callback");
        return Err(ApiError::Validation("Invalid login state".into()));
    }
    let code = params
        .code
        .ok_or_else(|| ApiError::Validation("Missing authorization code".into()))?;

    let claims = oidc
        .exchange_code(&code, &login.nonce)
        .await
        .map_err(|err| {
            warn!(error = %err, "id token verification failed");
            ApiError::Authentication("Failed to verify identity".into())
        })?;
    finish_login(&state, claims)
}

/// Admit the verified identity: allow-list check, then the session cookie.
fn finish_login(state: &AppState, claims: IdTokenClaims) -> Result<Response, ApiError> {
    let user = claims
        .into_identity()
        .ok_or_else(|| ApiError::Validation("Failed to get user info".into()))?;

    if !state.allow_list().is_allowed(&user.email) {
        warn!(user_id = %user.id, "login rejected by allow-list");
        return Err(ApiError::Authorization("Unauthorized email address".into()));
    }

    let session = state.cookies().issue_session(&user).map_err(cookie_error)?;
    info!(user_id = %user.id, "user logged in");
    Ok((
        AppendHeaders([
            (
                header::SET_COOKIE,
                state
                    .cookies()
                    .set_cookie(SESSION_COOKIE, &session, state.session_ttl()),
            ),
            (header::SET_COOKIE, state.cookies().clear_cookie(LOGIN_COOKIE)),
        ]),
        Redirect::to("/"),
    )
        .into_response())
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(user) = state.identify(&headers) else {
        return AuthRejection::Unauthenticated { api: false }.into_response();
    };
    state.sessions().forget(&user.id).await;
    info!(user_id = %user.id, "user logged out");
    (
        AppendHeaders([(header::SET_COOKIE, state.cookies().clear_cookie(SESSION_COOKIE))]),
        Json(StatusBody::success("Logged out successfully")),
    )
        .into_response()
}

pub async fn user(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match state.identify(&headers) {
        Some(user) => Json(json!({
            "status": "success",
            "user": {
                "id": user.id,
                "email": user.email,
                "name": user.name,
                "picture": user.picture,
                "authenticated": true,
            },
        }))
        .into_response(),
        None => (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "status": "error",
                "message": "Not authenticated",
                "user": { "authenticated": false },
            })),
        )
            .into_response(),
    }
}

fn provider(state: &AppState) -> Result<&OidcClient, ApiError> {
    state.oidc().ok_or_else(|| {
        warn!("login attempted without an identity provider configured");
        ApiError::Provider("Identity provider is not configured".into())
    })
}

fn provider_error(err: OidcError) -> ApiError {
    warn!(error = %err, "identity provider request failed");
    ApiError::Provider("Identity provider unavailable".into())
}

fn cookie_error(err: CookieError) -> ApiError {
    warn!(error = %err, "failed to sign cookie");
    ApiError::Provider("Failed to start session".into())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use adb_broker::RecordingBroker;

    use super::*;
    use crate::config::AppConfig;

    fn state() -> AppState {
        let cfg = AppConfig {
            allowed_emails: Some("alice@example.com".into()),
            ..AppConfig::default()
        };
        AppState::new(&cfg, Arc::new(RecordingBroker::new()))
    }

    fn claims(email: Option<&str>) -> IdTokenClaims {
        IdTokenClaims {
            sub: "google-123".into(),
            email: email.map(str::to_string),
            email_verified: Some(true),
            name: Some("Alice".into()),
            picture: None,
            nonce: Some("nonce".into()),
        }
    }

    #[test]
    fn verified_user_off_the_allow_list_is_forbidden() {
        let err = finish_login(&state(), claims(Some("mallory@example.com"))).unwrap_err();
        assert!(matches!(err, ApiError::Authorization(msg) if msg == "Unauthorized email address"));
    }

    #[test]
    fn identity_without_email_is_rejected() {
        let err = finish_login(&state(), claims(None)).unwrap_err();
        assert!(matches!(err, ApiError::Validation(msg) if msg == "Failed to get user info"));
    }

    #[test]
    fn allowed_user_gets_a_session_and_is_sent_home() {
        let state = state();
        let response = finish_login(&state, claims(Some("Alice@Example.com"))).unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/");
        let cookies: Vec<&str> = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect();
        assert_eq!(cookies.len(), 2);
        assert!(cookies[1].starts_with(&format!("{LOGIN_COOKIE}=;")));

        let mut headers = HeaderMap::new();
        let session = cookies[0].split(';').next().unwrap();
        headers.insert(header::COOKIE, session.parse().unwrap());
        let user = state.identify(&headers).unwrap();
        assert_eq!(user.id, "google-123");
        assert_eq!(user.email, "Alice@Example.com");
    }
}
