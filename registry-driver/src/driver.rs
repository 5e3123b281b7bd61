use std::{fmt, ops::Deref, sync::Arc};

use futures::stream::BoxStream;

use crate::error::RegistryError;
use crate::types::{
    Artifact, ArtifactIdentifier, ArtifactQuery, ContentFrame, TagRequest, UploadFrame,
};

/// Server side of a pull: content frames in order, ending when the stream ends.
///
/// Dropping the stream cancels the pull.
pub type ContentStream = BoxStream<'static, Result<ContentFrame, RegistryError>>;

/// Client side of an upload call.
///
/// The first frame sent must be [`UploadFrame::Metadata`]; every following
/// frame is content. Dropping the stream without calling
/// [`UploadStream::close_and_recv`] cancels the call and nothing is committed.
#[async_trait::async_trait]
pub trait UploadStream: fmt::Debug + Send {
    /// Send one frame. Waits while the registry is not ready for more.
    async fn send(&mut self, frame: UploadFrame) -> Result<(), RegistryError>;

    /// Close the sending side and wait for the registry to commit the upload.
    ///
    /// The stream is finished after this returns, whatever the outcome.
    async fn close_and_recv(&mut self) -> Result<Artifact, RegistryError>;
}

/// A registry driver: one method per registry call.
#[async_trait::async_trait]
pub trait Driver: fmt::Debug {
    /// The name of the driver, used in errors and logs.
    fn name(&self) -> &'static str;

    /// Open a client-streaming upload call.
    async fn upload_artifact(&self) -> Result<Box<dyn UploadStream>, RegistryError>;

    /// Open a server-streaming pull of one artifact version's content.
    async fn pull_artifact(
        &self,
        identifier: &ArtifactIdentifier,
    ) -> Result<ContentStream, RegistryError>;

    /// Look up one artifact version.
    async fn get_artifact(
        &self,
        identifier: &ArtifactIdentifier,
    ) -> Result<Artifact, RegistryError>;

    /// List every artifact version matching a query.
    async fn query_artifacts(&self, query: &ArtifactQuery) -> Result<Vec<Artifact>, RegistryError>;

    /// Delete one artifact version, returning what was deleted.
    async fn delete_artifact(
        &self,
        identifier: &ArtifactIdentifier,
    ) -> Result<Artifact, RegistryError>;

    /// Point a tag at a version, moving it off any other version.
    async fn add_tag(&self, request: &TagRequest) -> Result<(), RegistryError>;

    /// Remove a tag from a version.
    async fn remove_tag(&self, request: &TagRequest) -> Result<(), RegistryError>;
}

#[async_trait::async_trait]
impl<D> Driver for Arc<D>
where
    D: ?Sized + Driver + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        self.deref().name()
    }

    async fn upload_artifact(&self) -> Result<Box<dyn UploadStream>, RegistryError> {
        self.deref().upload_artifact().await
    }

    async fn pull_artifact(
        &self,
        identifier: &ArtifactIdentifier,
    ) -> Result<ContentStream, RegistryError> {
        self.deref().pull_artifact(identifier).await
    }

    async fn get_artifact(
        &self,
        identifier: &ArtifactIdentifier,
    ) -> Result<Artifact, RegistryError> {
        self.deref().get_artifact(identifier).await
    }

    async fn query_artifacts(&self, query: &ArtifactQuery) -> Result<Vec<Artifact>, RegistryError> {
        self.deref().query_artifacts(query).await
    }

    async fn delete_artifact(
        &self,
        identifier: &ArtifactIdentifier,
    ) -> Result<Artifact, RegistryError> {
        self.deref().delete_artifact(identifier).await
    }

    async fn add_tag(&self, request: &TagRequest) -> Result<(), RegistryError> {
        self.deref().add_tag(request).await
    }

    async fn remove_tag(&self, request: &TagRequest) -> Result<(), RegistryError> {
        self.deref().remove_tag(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static_assertions::assert_obj_safe!(Driver);
    static_assertions::assert_obj_safe!(UploadStream);
}
