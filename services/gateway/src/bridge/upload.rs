//! Relays an upload payload to the registry as bounded content frames.

use bytes::BytesMut;
use registry::{
    Artifact, ContentFrame, MAX_FRAME_SIZE, Registry, UploadFrame, UploadMetadata, UploadStream,
};
use tokio::io::{AsyncRead, AsyncReadExt as _};

use super::TransferState;
use crate::error::{GatewayError, GatewayResult};

/// Opens upload calls against the registry.
#[derive(Debug, Clone)]
pub struct UploadBridge {
    registry: Registry,
    chunk_size: usize,
}

impl UploadBridge {
    /// Create a bridge which sends frames of at most `chunk_size` bytes.
    ///
    /// The chunk size is clamped to `1..=MAX_FRAME_SIZE`.
    pub fn new(registry: Registry, chunk_size: usize) -> Self {
        Self {
            registry,
            chunk_size: chunk_size.clamp(1, MAX_FRAME_SIZE),
        }
    }

    /// The largest content frame this bridge will send.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Open an upload call and send its metadata frame.
    #[tracing::instrument(skip_all, fields(artifact = %metadata.fqn, tags = metadata.tags.len()))]
    pub async fn begin(&self, metadata: UploadMetadata) -> GatewayResult<UploadSession> {
        let mut session = UploadSession {
            stream: None,
            state: TransferState::Idle,
            chunk_size: self.chunk_size,
            frames: 0,
            bytes: 0,
        };

        let stream = match self.registry.upload_artifact().await {
            Ok(stream) => stream,
            Err(error) => {
                session.fail();
                return Err(GatewayError::registry("opening upload stream")(error));
            }
        };
        session.stream = Some(stream);
        session.transition(TransferState::StreamOpen);

        session
            .send(UploadFrame::Metadata(metadata), "sending upload metadata")
            .await?;
        Ok(session)
    }

    /// Upload a whole payload: metadata, every content frame, then commit.
    pub async fn upload<R>(&self, metadata: UploadMetadata, reader: R) -> GatewayResult<Artifact>
    where
        R: AsyncRead + Unpin,
    {
        let mut session = self.begin(metadata).await?;
        session.relay(reader).await?;
        session.commit().await
    }
}

/// One open upload call.
///
/// Dropping a session before [`UploadSession::commit`] cancels the call, and
/// the registry commits nothing.
#[derive(Debug)]
pub struct UploadSession {
    stream: Option<Box<dyn UploadStream>>,
    state: TransferState,
    chunk_size: usize,
    frames: usize,
    bytes: u64,
}

impl UploadSession {
    /// Where this upload is.
    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Number of content frames sent so far.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Number of content bytes sent so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    fn transition(&mut self, next: TransferState) {
        tracing::trace!(from = %self.state, to = %next, "Upload state");
        self.state = next;
    }

    fn fail(&mut self) {
        self.stream = None;
        self.transition(TransferState::Failed);
    }

    async fn send(&mut self, frame: UploadFrame, context: &'static str) -> GatewayResult<()> {
        let Some(stream) = self.stream.as_mut() else {
            self.fail();
            return Err(GatewayError::transport(context)("upload stream is not open"));
        };

        if let Err(error) = stream.send(frame).await {
            self.fail();
            return Err(GatewayError::registry(context)(error));
        }

        Ok(())
    }

    /// Relay the payload until `reader` is exhausted, one frame per chunk.
    ///
    /// Every frame except the last is exactly the chunk size. An empty payload
    /// sends no content frames, and a payload which is an exact multiple of the
    /// chunk size sends no trailing empty frame.
    pub async fn relay<R>(&mut self, mut reader: R) -> GatewayResult<u64>
    where
        R: AsyncRead + Unpin,
    {
        self.transition(TransferState::Transferring);

        loop {
            let mut chunk = BytesMut::with_capacity(self.chunk_size);
            let mut exhausted = false;

            while chunk.len() < self.chunk_size {
                let wanted = (self.chunk_size - chunk.len()) as u64;
                match (&mut reader).take(wanted).read_buf(&mut chunk).await {
                    Ok(0) => {
                        exhausted = true;
                        break;
                    }
                    Ok(_) => {}
                    Err(error) => {
                        self.fail();
                        return Err(GatewayError::part_read("reading upload payload")(error));
                    }
                }
            }

            if !chunk.is_empty() {
                let len = chunk.len();
                self.send(
                    UploadFrame::Content(ContentFrame::from(chunk.freeze())),
                    "sending content frame",
                )
                .await?;
                self.frames += 1;
                self.bytes += len as u64;
                tracing::debug!(bytes = len, frame = self.frames, "Sent content frame");
            }

            if exhausted {
                break;
            }
        }

        Ok(self.bytes)
    }

    /// Close the sending side and wait for the registry to commit the upload.
    #[tracing::instrument(skip_all, fields(frames = self.frames, bytes = self.bytes))]
    pub async fn commit(mut self) -> GatewayResult<Artifact> {
        self.transition(TransferState::Finalizing);

        let Some(mut stream) = self.stream.take() else {
            self.fail();
            return Err(GatewayError::transport("finalizing upload")(
                "upload stream is not open",
            ));
        };

        match stream.close_and_recv().await {
            Ok(artifact) => {
                self.transition(TransferState::Committed);
                tracing::info!(artifact = %artifact.fqn, version = %artifact.version_hash, "Artifact uploaded");
                Ok(artifact)
            }
            Err(error) => {
                self.fail();
                Err(GatewayError::registry("finalizing upload")(error))
            }
        }
    }

    /// Abandon the upload, cancelling the registry call.
    pub fn abort(mut self) {
        self.fail();
    }
}

impl Drop for UploadSession {
    fn drop(&mut self) {
        if !self.state.is_final() {
            tracing::debug!(state = %self.state, frames = self.frames, "Upload abandoned, cancelling stream");
            self.fail();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use bytes::Bytes;
    use futures::StreamExt as _;
    use registry::{
        ArtifactFqn, ArtifactIdentifier, ArtifactQuery, ContentStream, Driver, MemoryRegistry,
        Reference, RegistryError, RegistryErrorKind, TagRequest, Transfer, UploadOutcome,
    };
    use tokio_util::io::StreamReader;

    use super::*;

    fn metadata() -> UploadMetadata {
        UploadMetadata {
            fqn: ArtifactFqn::new("git", "alice", "tool").unwrap(),
            tags: vec!["v1".into()],
        }
    }

    fn uploaded_frames(registry: &MemoryRegistry) -> (Vec<usize>, UploadOutcome) {
        match registry.transfers().as_slice() {
            [Transfer::Upload { frames, outcome, .. }] => (frames.clone(), *outcome),
            other => panic!("expected a single upload, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn frame_counts() {
        let c = MAX_FRAME_SIZE;
        for len in [0, 1, c - 1, c, c + 1, 2 * c] {
            let memory = MemoryRegistry::new();
            let bridge = UploadBridge::new(memory.clone().into(), MAX_FRAME_SIZE);

            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let artifact = bridge.upload(metadata(), &payload[..]).await.unwrap();

            let (frames, outcome) = uploaded_frames(&memory);
            assert_eq!(outcome, UploadOutcome::Committed);
            assert_eq!(frames.len(), len.div_ceil(c), "frame count for {len} bytes");
            assert!(frames.iter().all(|&f| f > 0 && f <= c));
            assert_eq!(frames.iter().sum::<usize>(), len);

            let identifier = ArtifactIdentifier::new(
                artifact.fqn.clone(),
                Reference::VersionHash(artifact.version_hash.clone()),
            )
            .unwrap();
            let mut pulled = Vec::new();
            let mut stream = memory.pull_artifact(&identifier).await.unwrap();
            while let Some(frame) = stream.next().await {
                pulled.extend_from_slice(frame.unwrap().as_ref());
            }
            assert!(pulled == payload, "payload of {len} bytes round trips");
        }
    }

    #[tokio::test]
    async fn small_chunks_from_a_trickling_reader() {
        let memory = MemoryRegistry::new();
        let bridge = UploadBridge::new(memory.clone().into(), 4);

        let pieces: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"ab")),
            Ok(Bytes::from_static(b"cde")),
            Ok(Bytes::from_static(b"fghij")),
        ];
        let reader = StreamReader::new(futures::stream::iter(pieces));

        bridge.upload(metadata(), reader).await.unwrap();
        let (frames, _) = uploaded_frames(&memory);
        assert_eq!(frames, vec![4, 4, 2]);
    }

    #[tokio::test]
    async fn chunk_size_is_clamped() {
        let registry: Registry = MemoryRegistry::new().into();
        assert_eq!(UploadBridge::new(registry.clone(), 0).chunk_size(), 1);
        assert_eq!(
            UploadBridge::new(registry, MAX_FRAME_SIZE * 2).chunk_size(),
            MAX_FRAME_SIZE
        );
    }

    #[tokio::test]
    async fn read_failure_cancels_upload() {
        let memory = MemoryRegistry::new();
        let bridge = UploadBridge::new(memory.clone().into(), 4);

        let pieces: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"abcdef")),
            Err(io::Error::new(io::ErrorKind::ConnectionAborted, "client went away")),
        ];
        let reader = StreamReader::new(futures::stream::iter(pieces));

        let mut session = bridge.begin(metadata()).await.unwrap();
        assert_eq!(session.state(), TransferState::StreamOpen);

        let error = session.relay(reader).await.unwrap_err();
        assert!(matches!(error, GatewayError::TransportFailure { .. }));
        assert_eq!(session.state(), TransferState::Failed);
        drop(session);

        let (frames, outcome) = uploaded_frames(&memory);
        assert_eq!(frames, vec![4]);
        assert_eq!(outcome, UploadOutcome::Cancelled);
    }

    #[tokio::test]
    async fn dropped_session_commits_nothing() {
        let memory = MemoryRegistry::new();
        let bridge = UploadBridge::new(memory.clone().into(), 4);

        let mut session = bridge.begin(metadata()).await.unwrap();
        session.relay(&b"content"[..]).await.unwrap();
        session.abort();

        let (_, outcome) = uploaded_frames(&memory);
        assert_eq!(outcome, UploadOutcome::Cancelled);
        assert!(
            memory
                .query_artifacts(&ArtifactQuery::default())
                .await
                .unwrap()
                .is_empty()
        );
    }

    /// Where a [`FlakyRegistry`] upload breaks.
    #[derive(Debug, Clone, Copy)]
    enum Breakage {
        Open,
        /// Fail the send of this frame, counting the metadata frame as 0.
        Send(usize),
        Close,
    }

    fn reset() -> RegistryError {
        RegistryError::new("flaky", RegistryErrorKind::Unavailable, "stream reset")
    }

    #[derive(Debug)]
    struct FlakyUpload {
        inner: Box<dyn UploadStream>,
        sent: usize,
        breakage: Breakage,
    }

    #[async_trait::async_trait]
    impl UploadStream for FlakyUpload {
        async fn send(&mut self, frame: UploadFrame) -> Result<(), RegistryError> {
            if matches!(self.breakage, Breakage::Send(n) if n == self.sent) {
                return Err(reset());
            }
            self.sent += 1;
            self.inner.send(frame).await
        }

        async fn close_and_recv(&mut self) -> Result<Artifact, RegistryError> {
            if matches!(self.breakage, Breakage::Close) {
                return Err(reset());
            }
            self.inner.close_and_recv().await
        }
    }

    /// A memory registry whose uploads break at a chosen step.
    #[derive(Debug)]
    struct FlakyRegistry {
        memory: MemoryRegistry,
        breakage: Breakage,
    }

    #[async_trait::async_trait]
    impl Driver for FlakyRegistry {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn upload_artifact(&self) -> Result<Box<dyn UploadStream>, RegistryError> {
            if matches!(self.breakage, Breakage::Open) {
                return Err(reset());
            }
            Ok(Box::new(FlakyUpload {
                inner: self.memory.upload_artifact().await?,
                sent: 0,
                breakage: self.breakage,
            }))
        }

        async fn pull_artifact(
            &self,
            identifier: &ArtifactIdentifier,
        ) -> Result<ContentStream, RegistryError> {
            self.memory.pull_artifact(identifier).await
        }

        async fn get_artifact(
            &self,
            identifier: &ArtifactIdentifier,
        ) -> Result<Artifact, RegistryError> {
            self.memory.get_artifact(identifier).await
        }

        async fn query_artifacts(
            &self,
            query: &ArtifactQuery,
        ) -> Result<Vec<Artifact>, RegistryError> {
            self.memory.query_artifacts(query).await
        }

        async fn delete_artifact(
            &self,
            identifier: &ArtifactIdentifier,
        ) -> Result<Artifact, RegistryError> {
            self.memory.delete_artifact(identifier).await
        }

        async fn add_tag(&self, request: &TagRequest) -> Result<(), RegistryError> {
            self.memory.add_tag(request).await
        }

        async fn remove_tag(&self, request: &TagRequest) -> Result<(), RegistryError> {
            self.memory.remove_tag(request).await
        }
    }

    fn flaky_bridge(breakage: Breakage) -> (UploadBridge, MemoryRegistry) {
        let memory = MemoryRegistry::new();
        let registry: Registry = FlakyRegistry {
            memory: memory.clone(),
            breakage,
        }
        .into();
        (UploadBridge::new(registry, 4), memory)
    }

    async fn nothing_committed(memory: &MemoryRegistry) -> bool {
        memory
            .query_artifacts(&ArtifactQuery::default())
            .await
            .unwrap()
            .is_empty()
    }

    #[tokio::test]
    async fn open_failure_sends_nothing() {
        let (bridge, memory) = flaky_bridge(Breakage::Open);

        let error = bridge.begin(metadata()).await.unwrap_err();
        assert!(matches!(error, GatewayError::TransportFailure { .. }));
        assert!(memory.transfers().is_empty());
    }

    #[tokio::test]
    async fn metadata_send_failure_cancels_upload() {
        let (bridge, memory) = flaky_bridge(Breakage::Send(0));

        let error = bridge.begin(metadata()).await.unwrap_err();
        assert!(matches!(error, GatewayError::TransportFailure { .. }));

        let (frames, outcome) = uploaded_frames(&memory);
        assert!(frames.is_empty());
        assert_eq!(outcome, UploadOutcome::Cancelled);
        assert!(nothing_committed(&memory).await);
    }

    #[tokio::test]
    async fn content_send_failure_fails_session() {
        let (bridge, memory) = flaky_bridge(Breakage::Send(2));

        let mut session = bridge.begin(metadata()).await.unwrap();
        let error = session.relay(&b"0123456789"[..]).await.unwrap_err();

        assert!(matches!(error, GatewayError::TransportFailure { .. }));
        assert_eq!(session.state(), TransferState::Failed);
        assert_eq!(session.frames(), 1);
        drop(session);

        let (frames, outcome) = uploaded_frames(&memory);
        assert_eq!(frames, vec![4]);
        assert_eq!(outcome, UploadOutcome::Cancelled);
        assert!(nothing_committed(&memory).await);
    }

    #[tokio::test]
    async fn close_failure_commits_nothing() {
        let (bridge, memory) = flaky_bridge(Breakage::Close);

        let error = bridge
            .upload(metadata(), &b"0123456789"[..])
            .await
            .unwrap_err();
        assert!(matches!(error, GatewayError::TransportFailure { .. }));

        let (frames, outcome) = uploaded_frames(&memory);
        assert_eq!(frames, vec![4, 4, 2]);
        assert_eq!(outcome, UploadOutcome::Cancelled);
        assert!(nothing_committed(&memory).await);
    }
}
