use axum::{extract::State, Json};
use serde_json::Value;

use super::{ApiError, ApiResult, StatusBody};
use crate::auth::{CurrentUser, UserIdentity};
use crate::device::{Command, DeviceError, Direction, PackageName};
use crate::state::AppState;

pub async fn power(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult {
    send(&state, &user, Command::Power, "Power command sent successfully", "Failed to send power command").await
}

pub async fn volume_up(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult {
    send(
        &state,
        &user,
        Command::VolumeUp,
        "Volume up command sent successfully",
        "Failed to send volume up command",
    )
    .await
}

pub async fn volume_down(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult {
    send(
        &state,
        &user,
        Command::VolumeDown,
        "Volume down command sent successfully",
        "Failed to send volume down command",
    )
    .await
}

pub async fn volume_mute(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult {
    send(&state, &user, Command::Mute, "Mute command sent successfully", "Failed to send mute command").await
}

pub async fn launch_app(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    body: Option<Json<Value>>,
) -> ApiResult {
    let raw = required_field(body.as_deref(), "package_name")?;
    let package = raw
        .as_str()
        .and_then(|raw| PackageName::parse(raw).ok())
        .ok_or_else(invalid_package)?;
    let ok = format!("App {package} launched successfully");
    let failed = format!("Failed to launch app {package}");
    send(&state, &user, Command::LaunchApp(package), ok, failed).await
}

pub async fn navigate(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    body: Option<Json<Value>>,
) -> ApiResult {
    let raw = required_field(body.as_deref(), "direction")?;
    let direction: Direction = raw
        .as_str()
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(invalid_direction)?;
    send(
        &state,
        &user,
        Command::Navigate(direction),
        format!("Navigate {direction} command sent successfully"),
        format!("Failed to send navigate {direction} command"),
    )
    .await
}

/// A key that is present, even as `null` or the wrong type, counts as supplied.
fn required_field<'a>(body: Option<&'a Value>, name: &str) -> Result<&'a Value, ApiError> {
    body.and_then(|body| body.get(name))
        .ok_or_else(|| ApiError::Validation(format!("Missing {name} parameter")))
}

async fn send(
    state: &AppState,
    user: &UserIdentity,
    command: Command,
    ok: impl Into<String>,
    failed: impl Into<String>,
) -> ApiResult {
    match state.dispatcher().dispatch(&user.id, &command).await {
        Ok(()) => Ok(Json(StatusBody::success(ok))),
        Err(DeviceError::Connection { .. }) => Err(ApiError::Connection(
            "Failed to connect to Android TV".into(),
        )),
        Err(DeviceError::Command { .. }) => Err(ApiError::Command(failed.into())),
        Err(DeviceError::InvalidDirection(_)) => Err(invalid_direction()),
        Err(DeviceError::InvalidPackage(_)) => Err(invalid_package()),
    }
}

fn invalid_direction() -> ApiError {
    ApiError::Validation(format!(
        "Invalid direction. Must be one of: {}",
        Direction::accepted()
    ))
}

fn invalid_package() -> ApiError {
    ApiError::Validation("Invalid package_name parameter".into())
}
