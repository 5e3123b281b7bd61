use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::StreamExt as _;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use registry_driver::{
    Artifact, ArtifactFqn, ArtifactIdentifier, ArtifactQuery, ContentFrame, ContentStream, Driver,
    Reference, RegistryError, RegistryErrorKind, TagRequest, UploadFrame, UploadMetadata,
    UploadStream, MAX_FRAME_SIZE, MESSAGE_CEILING,
};

const DRIVER: &str = "memory";

/// How an upload call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The upload was closed and committed.
    Committed,

    /// The upload was closed, but the registry refused to commit it.
    Rejected,

    /// The stream was dropped before it was closed.
    Cancelled,
}

/// One finished call which moved content across the registry boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transfer {
    /// A client-streaming upload.
    Upload {
        /// The name from the metadata frame, if one arrived.
        fqn: Option<ArtifactFqn>,

        /// Size of every content frame received, in order.
        frames: Vec<usize>,

        /// How the call ended.
        outcome: UploadOutcome,
    },

    /// A server-streaming pull.
    Pull {
        /// What was pulled.
        identifier: ArtifactIdentifier,

        /// Size of every content frame sent, in order.
        frames: Vec<usize>,
    },
}

#[derive(Debug)]
struct Version {
    content: Bytes,
    tags: Vec<String>,
    pulls: u64,
    created: DateTime<Utc>,
}

type VersionKey = (ArtifactFqn, String);

fn artifact(key: &VersionKey, version: &Version) -> Artifact {
    Artifact {
        fqn: key.0.clone(),
        version_hash: key.1.clone(),
        tags: version.tags.clone(),
        pulls: version.pulls,
        created_at: version.created,
    }
}

#[derive(Debug, Default)]
struct Versions {
    versions: BTreeMap<VersionKey, Version>,
}

impl Versions {
    fn resolve(&self, identifier: &ArtifactIdentifier) -> Option<VersionKey> {
        let fqn = identifier.fqn();
        match identifier.reference() {
            Reference::VersionHash(hash) => {
                let key = (fqn.clone(), hash.clone());
                self.versions.contains_key(&key).then_some(key)
            }
            Reference::Tag(tag) => self
                .versions
                .iter()
                .find(|((f, _), v)| f == fqn && v.tags.iter().any(|t| t == tag))
                .map(|(key, _)| key.clone()),
        }
    }

    /// Point `tag` at `key`, taking it away from every other version of the same name.
    fn retag(&mut self, key: &VersionKey, tag: &str) {
        for ((fqn, hash), version) in self.versions.iter_mut() {
            if fqn == &key.0 && hash != &key.1 {
                version.tags.retain(|t| t != tag);
            }
        }

        if let Some(version) = self.versions.get_mut(key) {
            if !version.tags.iter().any(|t| t == tag) {
                version.tags.push(tag.to_owned());
            }
        }
    }

    fn commit(&mut self, metadata: &UploadMetadata, content: Bytes) -> Artifact {
        let hash = hex::encode(Sha256::digest(&content));
        let key = (metadata.fqn.clone(), hash);

        self.versions.entry(key.clone()).or_insert_with(|| Version {
            content,
            tags: Vec::new(),
            pulls: 0,
            created: Utc::now(),
        });

        for tag in &metadata.tags {
            self.retag(&key, tag);
        }

        artifact(&key, &self.versions[&key])
    }
}

#[derive(Debug, Default)]
struct Inner {
    versions: RwLock<Versions>,
    transfers: Mutex<Vec<Transfer>>,
}

fn not_found(identifier: impl std::fmt::Display) -> RegistryError {
    RegistryError::builder(DRIVER, RegistryErrorKind::NotFound, "artifact not found")
        .identifier(identifier)
        .build()
}

fn invalid(message: impl Into<String>) -> RegistryError {
    RegistryError::new(DRIVER, RegistryErrorKind::InvalidRequest, message.into())
}

/// A registry that keeps every artifact in memory.
///
/// Versions are content addressed with SHA-256, so uploading the same bytes
/// under the same name twice yields the same version. Every upload and pull is
/// recorded, see [`MemoryRegistry::transfers`].
///
/// Clones share the same registry.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    inner: Arc<Inner>,
}

impl MemoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every finished upload and pull, oldest first.
    pub fn transfers(&self) -> Vec<Transfer> {
        self.inner.transfers.lock().clone()
    }

    fn record(&self, transfer: Transfer) {
        self.inner.transfers.lock().push(transfer);
    }
}

#[async_trait::async_trait]
impl Driver for MemoryRegistry {
    fn name(&self) -> &'static str {
        DRIVER
    }

    async fn upload_artifact(&self) -> Result<Box<dyn UploadStream>, RegistryError> {
        Ok(Box::new(MemoryUpload {
            registry: self.clone(),
            metadata: None,
            content: Vec::new(),
            frames: Vec::new(),
            finished: false,
        }))
    }

    async fn pull_artifact(
        &self,
        identifier: &ArtifactIdentifier,
    ) -> Result<ContentStream, RegistryError> {
        let content = {
            let mut versions = self.inner.versions.write().await;
            let key = versions
                .resolve(identifier)
                .ok_or_else(|| not_found(identifier))?;
            let version = versions
                .versions
                .get_mut(&key)
                .ok_or_else(|| not_found(identifier))?;
            version.pulls += 1;
            version.content.clone()
        };

        let frames: Vec<ContentFrame> = (0..content.len())
            .step_by(MAX_FRAME_SIZE)
            .map(|start| {
                let end = (start + MAX_FRAME_SIZE).min(content.len());
                ContentFrame::from(content.slice(start..end))
            })
            .collect();

        tracing::trace!(frames = frames.len(), "Serving pull");
        self.record(Transfer::Pull {
            identifier: identifier.clone(),
            frames: frames.iter().map(ContentFrame::len).collect(),
        });

        Ok(futures::stream::iter(frames.into_iter().map(Ok)).boxed())
    }

    async fn get_artifact(
        &self,
        identifier: &ArtifactIdentifier,
    ) -> Result<Artifact, RegistryError> {
        let versions = self.inner.versions.read().await;
        let key = versions
            .resolve(identifier)
            .ok_or_else(|| not_found(identifier))?;
        Ok(artifact(&key, &versions.versions[&key]))
    }

    async fn query_artifacts(&self, query: &ArtifactQuery) -> Result<Vec<Artifact>, RegistryError> {
        let versions = self.inner.versions.read().await;
        Ok(versions
            .versions
            .iter()
            .filter(|((fqn, _), _)| query.matches(fqn))
            .map(|(key, version)| artifact(key, version))
            .collect())
    }

    async fn delete_artifact(
        &self,
        identifier: &ArtifactIdentifier,
    ) -> Result<Artifact, RegistryError> {
        let mut versions = self.inner.versions.write().await;
        let key = versions
            .resolve(identifier)
            .ok_or_else(|| not_found(identifier))?;
        let version = versions
            .versions
            .remove(&key)
            .ok_or_else(|| not_found(identifier))?;
        Ok(artifact(&key, &version))
    }

    async fn add_tag(&self, request: &TagRequest) -> Result<(), RegistryError> {
        if request.tag.is_empty() {
            return Err(invalid("tag must not be empty"));
        }

        let mut versions = self.inner.versions.write().await;
        let key = (request.fqn.clone(), request.version_hash.clone());
        if !versions.versions.contains_key(&key) {
            return Err(not_found(format_args!(
                "{}:hash:{}",
                request.fqn, request.version_hash
            )));
        }

        versions.retag(&key, &request.tag);
        Ok(())
    }

    async fn remove_tag(&self, request: &TagRequest) -> Result<(), RegistryError> {
        let mut versions = self.inner.versions.write().await;
        let key = (request.fqn.clone(), request.version_hash.clone());
        let version = versions.versions.get_mut(&key).ok_or_else(|| {
            not_found(format_args!("{}:hash:{}", request.fqn, request.version_hash))
        })?;

        let position = version
            .tags
            .iter()
            .position(|t| t == &request.tag)
            .ok_or_else(|| not_found(format_args!("{}:{}", request.fqn, request.tag)))?;
        version.tags.remove(position);
        Ok(())
    }
}

#[derive(Debug)]
struct MemoryUpload {
    registry: MemoryRegistry,
    metadata: Option<UploadMetadata>,
    content: Vec<Bytes>,
    frames: Vec<usize>,
    finished: bool,
}

impl MemoryUpload {
    fn finish(&mut self, outcome: UploadOutcome) {
        self.finished = true;
        self.registry.record(Transfer::Upload {
            fqn: self.metadata.as_ref().map(|m| m.fqn.clone()),
            frames: std::mem::take(&mut self.frames),
            outcome,
        });
    }
}

#[async_trait::async_trait]
impl UploadStream for MemoryUpload {
    async fn send(&mut self, frame: UploadFrame) -> Result<(), RegistryError> {
        if self.finished {
            return Err(invalid("upload stream is closed"));
        }

        match frame {
            UploadFrame::Metadata(metadata) => {
                if self.metadata.is_some() {
                    return Err(invalid("metadata frame sent twice"));
                }
                tracing::trace!(artifact = %metadata.fqn, "Received upload metadata");
                self.metadata = Some(metadata);
            }
            UploadFrame::Content(frame) => {
                if self.metadata.is_none() {
                    return Err(invalid("content frame sent before metadata"));
                }
                if frame.len() > MESSAGE_CEILING {
                    return Err(invalid(format!(
                        "frame of {} bytes exceeds the {MESSAGE_CEILING} byte message ceiling",
                        frame.len()
                    )));
                }
                self.frames.push(frame.len());
                self.content.push(frame.into_bytes());
            }
        }

        Ok(())
    }

    async fn close_and_recv(&mut self) -> Result<Artifact, RegistryError> {
        if self.finished {
            return Err(invalid("upload stream is closed"));
        }

        let Some(metadata) = self.metadata.clone() else {
            self.finish(UploadOutcome::Rejected);
            return Err(invalid("upload closed before metadata was sent"));
        };

        let mut content = BytesMut::with_capacity(self.content.iter().map(Bytes::len).sum());
        for chunk in self.content.drain(..) {
            content.extend_from_slice(&chunk);
        }

        let artifact = self
            .registry
            .inner
            .versions
            .write()
            .await
            .commit(&metadata, content.freeze());

        tracing::debug!(artifact = %metadata.fqn, version = %artifact.version_hash, "Committed upload");
        self.finish(UploadOutcome::Committed);
        Ok(artifact)
    }
}

impl Drop for MemoryUpload {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!("Upload stream dropped before close, discarding");
            self.finish(UploadOutcome::Cancelled);
        }
    }
}
