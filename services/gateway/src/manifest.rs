//! Manifest submission

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::Deserialize;

use crate::api::AppState;
use crate::bridge::parse_identifier;
use crate::error::{GatewayError, GatewayResult};
use crate::queue::TaskRequest;

/// The only manifest kind the gateway accepts.
pub const BLUEPRINT_KIND: &str = "Blueprint";

/// Router for manifest operations
pub(crate) fn router() -> Router<AppState> {
    Router::new().route("/manifests", post(post_manifest))
}

/// The fields of a manifest needed to dispatch on its kind.
#[derive(Debug, Deserialize)]
struct BaseManifest {
    kind: String,
    #[serde(default)]
    spec: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct BlueprintSpec {
    artifact: BlueprintArtifact,
}

#[derive(Debug, Deserialize)]
struct BlueprintArtifact {
    source: String,
    function: String,
    #[serde(default)]
    input: String,
}

/// Submit a manifest, enqueueing the task it describes
async fn post_manifest(State(state): State<AppState>, body: Bytes) -> GatewayResult<Response> {
    let manifest: BaseManifest = serde_json::from_slice(&body)
        .map_err(|err| GatewayError::MalformedRequest(format!("invalid manifest JSON: {err}")))?;

    let request = match manifest.kind.as_str() {
        BLUEPRINT_KIND => blueprint(manifest.spec, state.limits.manifest_input_max)?,
        other => {
            return Err(GatewayError::MalformedRequest(format!(
                "unsupported manifest kind {other:?}"
            )));
        }
    };

    let artifact = request.artifact.to_string();
    let id = state
        .queue
        .enqueue(request)
        .await
        .map_err(GatewayError::transport("enqueueing task"))?;
    tracing::info!(task = %id, %artifact, "Accepted blueprint");

    Ok((
        StatusCode::CREATED,
        [(header::CONTENT_TYPE, "text/yaml")],
        format!("taskId: {id}\n"),
    )
        .into_response())
}

fn blueprint(spec: serde_json::Value, input_max: usize) -> GatewayResult<TaskRequest> {
    let spec: BlueprintSpec = serde_json::from_value(spec)
        .map_err(|err| GatewayError::MalformedRequest(format!("invalid blueprint: {err}")))?;
    let artifact = spec.artifact;

    let identifier = parse_identifier(&artifact.source)?;

    if artifact.input.len() > input_max {
        return Err(GatewayError::MalformedRequest(format!(
            "artifact input exceeds {input_max} bytes"
        )));
    }

    let input = STANDARD
        .decode(artifact.input.as_bytes())
        .map_err(|err| GatewayError::MalformedRequest(format!("invalid base64 input: {err}")))?;

    if input.len() > input_max {
        return Err(GatewayError::MalformedRequest(format!(
            "decoded artifact input exceeds {input_max} bytes"
        )));
    }

    Ok(TaskRequest {
        artifact: identifier,
        function: artifact.function,
        input: input.into(),
    })
}
