//! Assembles a pulled artifact into one response body.

use bytes::{Bytes, BytesMut};
use futures::StreamExt as _;
use registry::{Artifact, ArtifactIdentifier, Registry};

use crate::error::{GatewayError, GatewayResult};

/// Pulls artifacts from the registry and buffers them whole.
#[derive(Debug, Clone)]
pub struct DownloadAssembler {
    registry: Registry,
}

impl DownloadAssembler {
    /// Create an assembler pulling from `registry`.
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Confirm the artifact exists, then pull and assemble its content.
    ///
    /// A missing artifact is reported before any pull is opened. A stream
    /// failure discards everything received so far.
    #[tracing::instrument(skip_all, fields(artifact = %identifier))]
    pub async fn assemble(&self, identifier: &ArtifactIdentifier) -> GatewayResult<(Artifact, Bytes)> {
        let artifact = self
            .registry
            .get_artifact(identifier)
            .await
            .map_err(GatewayError::registry("looking up artifact"))?;

        let body = self.receive(identifier).await?;
        Ok((artifact, body))
    }

    async fn receive(&self, identifier: &ArtifactIdentifier) -> GatewayResult<Bytes> {
        let mut stream = self
            .registry
            .pull_artifact(identifier)
            .await
            .map_err(GatewayError::registry("opening pull stream"))?;

        let mut body = BytesMut::new();
        let mut frames = 0usize;
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(frame) => {
                    frames += 1;
                    tracing::trace!(bytes = frame.len(), frame = frames, "Received content frame");
                    body.extend_from_slice(frame.as_ref());
                }
                Err(error) => {
                    tracing::debug!(frames, received = body.len(), "Pull failed mid-stream, discarding");
                    return Err(GatewayError::transport("receiving content frame")(error));
                }
            }
        }

        let body = body.freeze();
        tracing::debug!(frames, bytes = body.len(), "Assembled artifact");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use registry::{
        ArtifactFqn, Driver as _, MemoryRegistry, Reference, Transfer, UploadFrame,
        UploadMetadata, MAX_FRAME_SIZE,
    };

    use super::*;

    fn fqn() -> ArtifactFqn {
        ArtifactFqn::new("git", "alice", "tool").unwrap()
    }

    async fn seed(memory: &MemoryRegistry, content: Vec<u8>) -> Artifact {
        let mut stream = memory.upload_artifact().await.unwrap();
        stream
            .send(UploadFrame::Metadata(UploadMetadata {
                fqn: fqn(),
                tags: vec!["v1".into()],
            }))
            .await
            .unwrap();
        for chunk in content.chunks(MAX_FRAME_SIZE) {
            stream
                .send(UploadFrame::Content(Bytes::copy_from_slice(chunk).into()))
                .await
                .unwrap();
        }
        stream.close_and_recv().await.unwrap()
    }

    #[tokio::test]
    async fn assembles_multi_frame_artifact() {
        let memory = MemoryRegistry::new();
        let content: Vec<u8> = (0..MAX_FRAME_SIZE + 17).map(|i| (i % 13) as u8).collect();
        seed(&memory, content.clone()).await;

        let assembler = DownloadAssembler::new(memory.clone().into());
        let identifier = ArtifactIdentifier::new(fqn(), Reference::Tag("v1".into())).unwrap();
        let (artifact, body) = assembler.assemble(&identifier).await.unwrap();

        assert_eq!(body.len(), content.len());
        assert!(body[..] == content[..]);
        assert_eq!(artifact.tags, vec!["v1".to_string()]);
    }

    #[tokio::test]
    async fn missing_artifact_never_pulls() {
        let memory = MemoryRegistry::new();
        let assembler = DownloadAssembler::new(memory.clone().into());
        let identifier =
            ArtifactIdentifier::new(fqn(), Reference::VersionHash("deadbeef".into())).unwrap();

        let error = assembler.assemble(&identifier).await.unwrap_err();
        assert!(matches!(error, GatewayError::NotFound(_)));
        assert!(
            !memory
                .transfers()
                .iter()
                .any(|t| matches!(t, Transfer::Pull { .. }))
        );
    }

    #[tokio::test]
    async fn empty_artifact() {
        let memory = MemoryRegistry::new();
        seed(&memory, Vec::new()).await;

        let assembler = DownloadAssembler::new(memory.into());
        let identifier = ArtifactIdentifier::new(fqn(), Reference::Tag("v1".into())).unwrap();
        let (_, body) = assembler.assemble(&identifier).await.unwrap();
        assert!(body.is_empty());
    }
}
