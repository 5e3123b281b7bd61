use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Largest content frame the gateway will put on the wire.
///
/// Kept below [`MESSAGE_CEILING`] to leave room for message framing.
pub const MAX_FRAME_SIZE: usize = 3 * 1024 * 1024;

/// Largest single message the registry transport accepts.
pub const MESSAGE_CEILING: usize = 4 * 1024 * 1024;

/// Lexical prefix which marks a reference as a version hash rather than a tag.
pub const VERSION_HASH_PREFIX: &str = "hash:";

/// An artifact name or reference could not be constructed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidIdentifier {
    /// One of source, author or name is empty.
    #[error("artifact name is missing its {0}")]
    MissingComponent(&'static str),

    /// The tag or version hash is empty.
    #[error("artifact reference is empty")]
    EmptyReference,

    /// The identifier string does not follow `source/author/name:reference`.
    #[error("malformed identifier {0:?}")]
    Malformed(String),
}

#[derive(Deserialize)]
struct FqnParts {
    source: String,
    author: String,
    name: String,
}

impl TryFrom<FqnParts> for ArtifactFqn {
    type Error = InvalidIdentifier;

    fn try_from(parts: FqnParts) -> Result<Self, Self::Error> {
        ArtifactFqn::new(parts.source, parts.author, parts.name)
    }
}

/// Fully qualified name of an artifact: the namespace all of its versions share.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "FqnParts")]
pub struct ArtifactFqn {
    source: String,
    author: String,
    name: String,
}

impl ArtifactFqn {
    /// Create a name, rejecting empty components.
    pub fn new(
        source: impl Into<String>,
        author: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self, InvalidIdentifier> {
        let fqn = Self {
            source: source.into(),
            author: author.into(),
            name: name.into(),
        };

        if fqn.source.is_empty() {
            return Err(InvalidIdentifier::MissingComponent("source"));
        }
        if fqn.author.is_empty() {
            return Err(InvalidIdentifier::MissingComponent("author"));
        }
        if fqn.name.is_empty() {
            return Err(InvalidIdentifier::MissingComponent("name"));
        }

        Ok(fqn)
    }

    /// Where the artifact comes from, e.g. `github.com`.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Who published the artifact.
    pub fn author(&self) -> &str {
        &self.author
    }

    /// The artifact's own name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ArtifactFqn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.source, self.author, self.name)
    }
}

/// Selects one version of an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    /// A mutable, human assigned label.
    Tag(String),

    /// The immutable content hash assigned by the registry.
    VersionHash(String),
}

impl Reference {
    /// The raw tag or hash, without any prefix.
    pub fn as_str(&self) -> &str {
        match self {
            Reference::Tag(tag) => tag,
            Reference::VersionHash(hash) => hash,
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Tag(tag) => f.write_str(tag),
            Reference::VersionHash(hash) => write!(f, "{VERSION_HASH_PREFIX}{hash}"),
        }
    }
}

/// One specific version of an artifact, by tag or by version hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactIdentifier {
    fqn: ArtifactFqn,
    reference: Reference,
}

impl ArtifactIdentifier {
    /// Create an identifier, rejecting an empty tag or hash.
    pub fn new(fqn: ArtifactFqn, reference: Reference) -> Result<Self, InvalidIdentifier> {
        if reference.as_str().is_empty() {
            return Err(InvalidIdentifier::EmptyReference);
        }
        Ok(Self { fqn, reference })
    }

    /// The artifact's namespace.
    pub fn fqn(&self) -> &ArtifactFqn {
        &self.fqn
    }

    /// Which version is selected.
    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    /// The tag, if this identifier selects by tag.
    pub fn tag(&self) -> Option<&str> {
        match &self.reference {
            Reference::Tag(tag) => Some(tag),
            Reference::VersionHash(_) => None,
        }
    }

    /// The version hash, if this identifier selects by hash.
    pub fn version_hash(&self) -> Option<&str> {
        match &self.reference {
            Reference::VersionHash(hash) => Some(hash),
            Reference::Tag(_) => None,
        }
    }
}

impl fmt::Display for ArtifactIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.fqn, self.reference)
    }
}

/// First frame of every upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMetadata {
    /// Namespace the uploaded version belongs to.
    pub fqn: ArtifactFqn,

    /// Tags to point at the uploaded version, in the order the client sent them.
    pub tags: Vec<String>,
}

/// One bounded chunk of artifact content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentFrame {
    data: Bytes,
}

impl ContentFrame {
    /// Number of content bytes in this frame.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the frame carries no content.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Take the frame's content.
    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

impl From<Bytes> for ContentFrame {
    fn from(data: Bytes) -> Self {
        Self { data }
    }
}

impl AsRef<[u8]> for ContentFrame {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

/// A message on the client side of an upload stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadFrame {
    /// Names the artifact and its tags. Always sent first, exactly once.
    Metadata(UploadMetadata),

    /// Artifact content, in order.
    Content(ContentFrame),
}

/// A committed artifact version, as reported by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// Namespace of the artifact.
    pub fqn: ArtifactFqn,

    /// Content derived identity, assigned by the registry.
    pub version_hash: String,

    /// Tags currently pointing at this version.
    pub tags: Vec<String>,

    /// How many times this version has been pulled.
    pub pulls: u64,

    /// When this version was first committed.
    pub created_at: DateTime<Utc>,
}

/// Filters for listing artifacts. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactQuery {
    /// Only artifacts from this source.
    pub source: Option<String>,

    /// Only artifacts by this author.
    pub author: Option<String>,

    /// Only artifacts with this name.
    pub name: Option<String>,
}

impl ArtifactQuery {
    /// Whether an artifact name passes every filter.
    pub fn matches(&self, fqn: &ArtifactFqn) -> bool {
        fn check(filter: &Option<String>, value: &str) -> bool {
            filter.as_deref().is_none_or(|f| f == value)
        }

        check(&self.source, fqn.source())
            && check(&self.author, fqn.author())
            && check(&self.name, fqn.name())
    }
}

/// Adds a tag to, or removes a tag from, a specific version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagRequest {
    /// Namespace of the artifact.
    pub fqn: ArtifactFqn,

    /// Version to modify.
    pub version_hash: String,

    /// The tag.
    pub tag: String,
}
