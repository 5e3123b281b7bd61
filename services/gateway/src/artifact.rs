//! Artifact operations

use std::io;
use std::pin::pin;

use axum::Json;
use axum::Router;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures::TryStreamExt as _;
use registry::{Artifact, ArtifactFqn, ArtifactIdentifier, ArtifactQuery, TagRequest};
use serde::Deserialize;
use tokio_util::io::StreamReader;

use crate::api::AppState;
use crate::bridge::{MetadataCollector, identifier_from_parts, parse_reference};
use crate::error::{FieldProblem, GatewayError, GatewayResult};

/// Router for artifact operations
pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/artifacts",
            get(get_artifact)
                .head(head_artifact)
                .post(upload_artifact)
                .delete(delete_artifact),
        )
        .route("/artifacts/list", get(list_artifacts))
        .route("/artifacts/tags", post(add_tag).delete(remove_tag))
        .route(
            "/artifacts/{source}/{author}/{name}/download",
            get(download_artifact),
        )
}

/// Query parameters naming one artifact version.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IdentifierParams {
    source: String,
    author: String,
    name: String,
    identifier: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DownloadParams {
    identifier: String,
}

#[derive(Debug, Deserialize)]
struct DeleteRequest {
    fqn: ArtifactFqn,
    identifier: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddTagRequest {
    fqn: ArtifactFqn,
    version_hash: String,
    new_tag: String,
}

/// Look up one artifact version
async fn get_artifact(
    State(state): State<AppState>,
    params: Result<Query<IdentifierParams>, QueryRejection>,
) -> GatewayResult<Json<Artifact>> {
    let Query(params) = params?;
    let identifier =
        identifier_from_parts(&params.source, &params.author, &params.name, &params.identifier)?;

    let artifact = state
        .registry
        .get_artifact(&identifier)
        .await
        .map_err(GatewayError::registry("getting artifact"))?;
    Ok(Json(artifact))
}

/// Check whether an artifact version exists
async fn head_artifact(
    State(state): State<AppState>,
    params: Result<Query<IdentifierParams>, QueryRejection>,
) -> GatewayResult<StatusCode> {
    let Query(params) = params?;
    let identifier =
        identifier_from_parts(&params.source, &params.author, &params.name, &params.identifier)?;

    state
        .registry
        .get_artifact(&identifier)
        .await
        .map_err(GatewayError::registry("checking artifact existence"))?;
    Ok(StatusCode::OK)
}

/// List artifact versions, optionally filtered
async fn list_artifacts(
    State(state): State<AppState>,
    query: Result<Query<ArtifactQuery>, QueryRejection>,
) -> GatewayResult<Json<Vec<Artifact>>> {
    let Query(query) = query?;
    let artifacts = state
        .registry
        .query_artifacts(&query)
        .await
        .map_err(GatewayError::registry("querying artifacts"))?;
    Ok(Json(artifacts))
}

/// Delete an artifact version
async fn delete_artifact(
    State(state): State<AppState>,
    body: Result<Json<DeleteRequest>, JsonRejection>,
) -> GatewayResult<Json<Artifact>> {
    let Json(request) = body?;
    let identifier = ArtifactIdentifier::new(request.fqn, parse_reference(&request.identifier))?;

    let artifact = state
        .registry
        .delete_artifact(&identifier)
        .await
        .map_err(GatewayError::registry("deleting artifact"))?;
    tracing::info!(artifact = %identifier, "Deleted artifact");
    Ok(Json(artifact))
}

/// Point a tag at an artifact version
async fn add_tag(
    State(state): State<AppState>,
    body: Result<Json<AddTagRequest>, JsonRejection>,
) -> GatewayResult<StatusCode> {
    let Json(request) = body?;
    require_tag("newTag", &request.new_tag)?;
    let request = TagRequest {
        fqn: request.fqn,
        version_hash: request.version_hash,
        tag: request.new_tag,
    };

    state
        .registry
        .add_tag(&request)
        .await
        .map_err(GatewayError::registry("adding tag"))?;
    Ok(StatusCode::CREATED)
}

/// Remove a tag from an artifact version
async fn remove_tag(
    State(state): State<AppState>,
    body: Result<Json<TagRequest>, JsonRejection>,
) -> GatewayResult<StatusCode> {
    let Json(request) = body?;
    require_tag("tag", &request.tag)?;
    state
        .registry
        .remove_tag(&request)
        .await
        .map_err(GatewayError::registry("removing tag"))?;
    Ok(StatusCode::OK)
}

fn require_tag(field: &str, tag: &str) -> GatewayResult<()> {
    if tag.is_empty() {
        return Err(GatewayError::MalformedRequest(format!(
            "{field} must not be empty"
        )));
    }
    Ok(())
}

/// Upload an artifact from a multipart form
///
/// Scalar fields are collected until the `file` part, which is relayed to
/// the registry without buffering. Parts after `file` are refused and the
/// upload is cancelled.
async fn upload_artifact(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> GatewayResult<(StatusCode, Json<Artifact>)> {
    let mut multipart = multipart?;
    let mut collector = MetadataCollector::new(&state.limits);

    let file = loop {
        let Some(field) = multipart.next_field().await? else {
            return Err(GatewayError::MissingPayload);
        };
        if MetadataCollector::is_payload(&field) {
            break field;
        }
        collector.accept(field).await?;
    };

    let metadata = collector.finish()?;
    let mut session = state.uploads.begin(metadata).await?;

    {
        let reader = pin!(StreamReader::new(file.map_err(io::Error::other)));
        session.relay(reader).await?;
    }

    match multipart.next_field().await {
        Ok(None) => {}
        Ok(Some(trailing)) => {
            session.abort();
            return Err(GatewayError::UnexpectedField {
                field: trailing.name().unwrap_or_default().to_owned(),
                problem: FieldProblem::AfterPayload,
            });
        }
        Err(error) => {
            session.abort();
            return Err(error.into());
        }
    }

    let artifact = session.commit().await?;
    Ok((StatusCode::CREATED, Json(artifact)))
}

/// Download an artifact's content
async fn download_artifact(
    State(state): State<AppState>,
    Path((source, author, name)): Path<(String, String, String)>,
    params: Result<Query<DownloadParams>, QueryRejection>,
) -> GatewayResult<Response> {
    let Query(params) = params?;
    let identifier = identifier_from_parts(&source, &author, &name, &params.identifier)?;

    let (_, body) = state.downloads.assemble(&identifier).await?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        body,
    )
        .into_response())
}
