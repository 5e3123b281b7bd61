//! # Registry driver
//!
//! The boundary between the artifact gateway and the artifact registry.
//!
//! The registry is reached through a streaming RPC transport: uploads are
//! client-streaming (one metadata frame, then content frames, then a single
//! committed [`Artifact`] in reply) and pulls are server-streaming. A
//! [`Driver`] implements that transport; everything above it speaks only in
//! the types defined here.

mod driver;
mod error;
mod types;

pub use driver::{ContentStream, Driver, UploadStream};
pub use error::{RegistryError, RegistryErrorBuilder, RegistryErrorKind};
pub use types::{
    Artifact, ArtifactFqn, ArtifactIdentifier, ArtifactQuery, ContentFrame, InvalidIdentifier,
    MAX_FRAME_SIZE, MESSAGE_CEILING, Reference, TagRequest, UploadFrame, UploadMetadata,
    VERSION_HASH_PREFIX,
};
