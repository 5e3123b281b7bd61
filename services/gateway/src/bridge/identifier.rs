//! Parsing of artifact identifier strings.

use registry::{
    ArtifactFqn, ArtifactIdentifier, InvalidIdentifier, Reference, VERSION_HASH_PREFIX,
};

/// Literal which marks the version hash form in a full identifier.
const HASH_MARKER: &str = "hash";

/// Parse `source/author/name:tag` or `source/author/name:hash:<hex>`.
///
/// ```rust
/// use artifact_gateway::bridge::parse_identifier;
///
/// let identifier = parse_identifier("git/alice/tool:hash:deadbeef").unwrap();
/// assert_eq!(identifier.version_hash(), Some("deadbeef"));
/// assert_eq!(identifier.to_string(), "git/alice/tool:hash:deadbeef");
/// ```
pub fn parse_identifier(token: &str) -> Result<ArtifactIdentifier, InvalidIdentifier> {
    let malformed = || InvalidIdentifier::Malformed(token.to_owned());

    let segments: Vec<&str> = token.split('/').collect();
    let [source, author, rest] = segments.as_slice() else {
        return Err(malformed());
    };

    let parts: Vec<&str> = rest.split(':').collect();
    let (name, reference) = match parts.as_slice() {
        [name, tag] => (*name, Reference::Tag((*tag).to_owned())),
        [name, HASH_MARKER, hash] => (*name, Reference::VersionHash((*hash).to_owned())),
        _ => return Err(malformed()),
    };

    let identifier = ArtifactIdentifier::new(ArtifactFqn::new(*source, *author, name)?, reference)?;

    // Exactly one of tag and hash must be set.
    if identifier.tag().is_some() == identifier.version_hash().is_some() {
        return Err(malformed());
    }

    Ok(identifier)
}

/// Parse the reference half of an identifier: a bare tag, or `hash:<hex>`.
pub fn parse_reference(token: &str) -> Reference {
    match token.strip_prefix(VERSION_HASH_PREFIX) {
        Some(hash) => Reference::VersionHash(hash.to_owned()),
        None => Reference::Tag(token.to_owned()),
    }
}

/// Build an identifier from separate name components and a reference token.
pub fn identifier_from_parts(
    source: &str,
    author: &str,
    name: &str,
    token: &str,
) -> Result<ArtifactIdentifier, InvalidIdentifier> {
    ArtifactIdentifier::new(ArtifactFqn::new(source, author, name)?, parse_reference(token))
}
