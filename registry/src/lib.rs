//! # Registry client
//!
//! A cloneable handle to an artifact registry, and the configuration used to
//! pick a driver for it.

use std::sync::Arc;

use serde::Deserialize;

pub(crate) mod memory;

#[doc(inline)]
pub use memory::{MemoryRegistry, Transfer, UploadOutcome};

#[doc(inline)]
pub use registry_driver::{
    Artifact, ArtifactFqn, ArtifactIdentifier, ArtifactQuery, ContentFrame, ContentStream, Driver,
    InvalidIdentifier, Reference, RegistryError, RegistryErrorKind, TagRequest, UploadFrame,
    UploadMetadata, UploadStream, MAX_FRAME_SIZE, MESSAGE_CEILING, VERSION_HASH_PREFIX,
};

/// Which registry driver to use.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegistryConfig {
    /// An in-process registry. Artifacts live only as long as the process.
    #[default]
    Memory,
}

impl RegistryConfig {
    /// Construct the configured driver.
    #[tracing::instrument]
    pub fn build(self) -> Registry {
        match self {
            RegistryConfig::Memory => MemoryRegistry::new().into(),
        }
    }
}

pub(crate) type ArcDriver = Arc<dyn Driver + Send + Sync>;

/// A handle to the artifact registry.
///
/// Cheap to clone; every clone talks to the same driver.
#[derive(Debug, Clone)]
pub struct Registry {
    driver: ArcDriver,
}

impl<D> From<D> for Registry
where
    D: Driver + Send + Sync + 'static,
{
    fn from(value: D) -> Self {
        Registry::new(value)
    }
}

impl Registry {
    /// Wrap a driver.
    pub fn new<D: Driver + Send + Sync + 'static>(driver: D) -> Self {
        Self {
            driver: Arc::new(driver),
        }
    }

    /// Name of the underlying driver.
    pub fn name(&self) -> &'static str {
        self.driver.name()
    }

    /// Open a client-streaming upload call.
    #[tracing::instrument(skip_all, fields(driver = self.driver.name()))]
    pub async fn upload_artifact(&self) -> Result<Box<dyn UploadStream>, RegistryError> {
        tracing::trace!("Opening upload stream");
        self.driver.upload_artifact().await
    }

    /// Open a server-streaming pull of an artifact's content.
    #[tracing::instrument(skip_all, fields(driver = self.driver.name(), artifact = %identifier))]
    pub async fn pull_artifact(
        &self,
        identifier: &ArtifactIdentifier,
    ) -> Result<ContentStream, RegistryError> {
        tracing::trace!("Opening pull stream");
        self.driver.pull_artifact(identifier).await
    }

    /// Look up one artifact version.
    #[tracing::instrument(skip_all, fields(driver = self.driver.name(), artifact = %identifier))]
    pub async fn get_artifact(
        &self,
        identifier: &ArtifactIdentifier,
    ) -> Result<Artifact, RegistryError> {
        self.driver.get_artifact(identifier).await
    }

    /// List artifact versions matching `query`.
    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn query_artifacts(
        &self,
        query: &ArtifactQuery,
    ) -> Result<Vec<Artifact>, RegistryError> {
        self.driver.query_artifacts(query).await
    }

    /// Delete an artifact version, returning what was removed.
    #[tracing::instrument(skip_all, fields(driver = self.driver.name(), artifact = %identifier))]
    pub async fn delete_artifact(
        &self,
        identifier: &ArtifactIdentifier,
    ) -> Result<Artifact, RegistryError> {
        self.driver.delete_artifact(identifier).await
    }

    /// Point a tag at an artifact version.
    #[tracing::instrument(skip_all, fields(driver = self.driver.name(), artifact = %request.fqn, tag = %request.tag))]
    pub async fn add_tag(&self, request: &TagRequest) -> Result<(), RegistryError> {
        self.driver.add_tag(request).await
    }

    /// Remove a tag from an artifact version.
    #[tracing::instrument(skip_all, fields(driver = self.driver.name(), artifact = %request.fqn, tag = %request.tag))]
    pub async fn remove_tag(&self, request: &TagRequest) -> Result<(), RegistryError> {
        self.driver.remove_tag(request).await
    }
}
