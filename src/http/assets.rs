use super::{ok_envelope, SharedState};
use crate::error::GatewayError;
use crate::vfs::{self, ServedAsset};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

const APP_ENTRY_FILE: &str = "index.html";

pub(super) async fn serve_app_index(State(state): State<SharedState>) -> Response {
    respond(vfs::serve(&state.config.web_root, "", APP_ENTRY_FILE).await)
}

pub(super) async fn serve_app_asset(
    State(state): State<SharedState>,
    Path(path): Path<String>,
) -> Response {
    respond(vfs::serve(&state.config.web_root, &path, APP_ENTRY_FILE).await)
}

/// `/plugin/{pluginName}/{*path}`: the first segment names the plugin, the
/// rest is the asset path under its root. The enablement check happens
/// before any filesystem access; unknown and disabled plugins are
/// indistinguishable to the caller.
pub(super) async fn serve_plugin_asset(
    State(state): State<SharedState>,
    Path(filepath): Path<String>,
) -> Response {
    let trimmed = filepath.trim_start_matches('/');
    let (plugin_name, asset_path) = match trimmed.split_once('/') {
        Some((name, rest)) => (name, rest),
        None => (trimmed, ""),
    };
    if plugin_name.is_empty() {
        return not_found("invalid plugin path");
    }

    let Some(plugin) = state.plugins.find_enabled(plugin_name) else {
        return not_found("plugin not found or disabled");
    };

    respond(vfs::serve(&plugin.root_dir, asset_path, &plugin.entry_file).await)
}

/// Enabled plugin listing for the front-end menu, in display order.
pub(super) async fn list_plugins(State(state): State<SharedState>) -> Json<Value> {
    let plugins: Vec<Value> = state
        .plugins
        .enabled()
        .into_iter()
        .map(|p| {
            json!({
                "name": p.name,
                "title": p.title,
                "description": p.description,
                "entry": format!("{}/plugin/{}/{}", state.config.web_base_dir, p.name, p.entry_file),
                "order_num": p.order_num,
            })
        })
        .collect();
    ok_envelope(plugins)
}

fn respond(result: Result<ServedAsset, GatewayError>) -> Response {
    match result {
        Ok(asset) => (
            [(header::CONTENT_TYPE, asset.content_type)],
            asset.bytes,
        )
            .into_response(),
        // Sandbox rejections and missing files collapse to the same 404
        // shape; the rejected raw path is never echoed back.
        Err(err) => not_found(&err.public_message()),
    }
}

fn not_found(msg: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"code": 404, "msg": msg})),
    )
        .into_response()
}
