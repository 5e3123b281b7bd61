//! Accumulates upload metadata from multipart form fields.

use std::io;
use std::pin::pin;

use axum::extract::multipart::Field;
use futures::TryStreamExt as _;
use registry::{ArtifactFqn, UploadMetadata};
use tokio_util::io::StreamReader;

use super::field::{FieldRead, read_bounded};
use crate::config::Limits;
use crate::error::{FieldProblem, GatewayError, GatewayResult};

/// Name of the form field which carries the artifact payload.
pub const PAYLOAD_FIELD: &str = "file";

/// Collects `source`, `author`, `name` and `tag` fields, in whatever order
/// the client sends them.
///
/// The caller walks the multipart stream, handing every part to
/// [`MetadataCollector::accept`] until [`MetadataCollector::is_payload`]
/// reports the `file` part, then calls [`MetadataCollector::finish`].
#[derive(Debug)]
pub struct MetadataCollector {
    field_max_size: usize,
    tag_budget: usize,
    source: Option<String>,
    author: Option<String>,
    name: Option<String>,
    tags: Vec<String>,
    tag_bytes: usize,
}

impl MetadataCollector {
    /// Start collecting under the given limits.
    pub fn new(limits: &Limits) -> Self {
        Self {
            field_max_size: limits.field_max_size,
            tag_budget: limits.tag_budget,
            source: None,
            author: None,
            name: None,
            tags: Vec::new(),
            tag_bytes: 0,
        }
    }

    /// Whether this part is the artifact payload, which ends collection.
    pub fn is_payload(field: &Field<'_>) -> bool {
        field.name() == Some(PAYLOAD_FIELD)
    }

    /// Read one scalar field into the collected metadata.
    pub async fn accept(&mut self, field: Field<'_>) -> GatewayResult<()> {
        let name = field.name().unwrap_or_default().to_owned();
        let (value, limit) = match name.as_str() {
            "source" | "author" | "name" => {
                if self.slot(&name).is_some_and(|slot| slot.is_some()) {
                    return Err(GatewayError::UnexpectedField {
                        field: name,
                        problem: FieldProblem::Duplicate,
                    });
                }
                (read_field(field, self.field_max_size).await, self.field_max_size)
            }
            "tag" => {
                let remaining = self.tag_budget.saturating_sub(self.tag_bytes);
                (read_field(field, remaining).await, remaining)
            }
            _ => {
                return Err(GatewayError::UnexpectedField {
                    field: name,
                    problem: FieldProblem::Unknown,
                });
            }
        };

        let value = match value? {
            FieldRead::Complete(bytes) => String::from_utf8(bytes).map_err(|_| {
                GatewayError::MalformedRequest(format!("field {name:?} is not valid UTF-8"))
            })?,
            FieldRead::TooLong => {
                tracing::debug!(field = %name, limit, "Field too long");
                return Err(GatewayError::FieldTooLarge { field: name, limit });
            }
        };

        tracing::trace!(field = %name, bytes = value.len(), "Collected field");
        if name == "tag" {
            self.tag_bytes += value.len();
            self.tags.push(value);
        } else if let Some(slot) = self.slot(&name) {
            *slot = Some(value);
        }

        Ok(())
    }

    /// Finish collecting, validating the artifact name.
    pub fn finish(self) -> GatewayResult<UploadMetadata> {
        let fqn = ArtifactFqn::new(
            self.source.unwrap_or_default(),
            self.author.unwrap_or_default(),
            self.name.unwrap_or_default(),
        )?;

        Ok(UploadMetadata {
            fqn,
            tags: self.tags,
        })
    }

    fn slot(&mut self, name: &str) -> Option<&mut Option<String>> {
        match name {
            "source" => Some(&mut self.source),
            "author" => Some(&mut self.author),
            "name" => Some(&mut self.name),
            _ => None,
        }
    }
}

async fn read_field(field: Field<'_>, limit: usize) -> GatewayResult<FieldRead> {
    let reader = pin!(StreamReader::new(field.map_err(io::Error::other)));
    read_bounded(reader, limit)
        .await
        .map_err(GatewayError::part_read("reading multipart field"))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::extract::{FromRequest, Multipart};
    use axum::http::Request;
    use registry::InvalidIdentifier;

    use super::*;

    const BOUNDARY: &str = "collector-boundary";

    fn multipart(parts: &[(&str, &[u8])]) -> Request<Body> {
        let mut body = Vec::new();
        for (name, value) in parts {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(value);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn limits(field_max_size: usize, tag_budget: usize) -> Limits {
        Limits {
            field_max_size,
            tag_budget,
            ..Limits::default()
        }
    }

    /// Feed every part before `file` to a collector; report whether `file` was seen.
    async fn collect(
        request: Request<Body>,
        limits: &Limits,
    ) -> (GatewayResult<()>, MetadataCollector, bool) {
        let mut multipart = Multipart::from_request(request, &()).await.unwrap();
        let mut collector = MetadataCollector::new(limits);

        while let Some(field) = multipart.next_field().await.unwrap() {
            if MetadataCollector::is_payload(&field) {
                return (Ok(()), collector, true);
            }
            if let Err(error) = collector.accept(field).await {
                return (Err(error), collector, false);
            }
        }

        (Ok(()), collector, false)
    }

    #[tokio::test]
    async fn collects_in_any_order() {
        let request = multipart(&[
            ("tag", b"v1"),
            ("name", b"tool"),
            ("tag", b"latest"),
            ("author", b"alice"),
            ("source", b"git"),
            ("file", b"payload"),
        ]);

        let (result, collector, saw_file) = collect(request, &Limits::default()).await;
        result.unwrap();
        assert!(saw_file);

        let metadata = collector.finish().unwrap();
        assert_eq!(metadata.fqn, ArtifactFqn::new("git", "alice", "tool").unwrap());
        assert_eq!(metadata.tags, vec!["v1".to_string(), "latest".to_string()]);
    }

    #[tokio::test]
    async fn duplicate_scalar_is_rejected() {
        let request = multipart(&[("source", b"git"), ("source", b"svn")]);
        let (result, _, _) = collect(request, &Limits::default()).await;

        assert!(matches!(
            result,
            Err(GatewayError::UnexpectedField { ref field, problem: FieldProblem::Duplicate }) if field == "source"
        ));
    }

    #[tokio::test]
    async fn duplicate_tags_are_kept() {
        let request = multipart(&[("tag", b"v1"), ("tag", b"v1")]);
        let (result, collector, _) = collect(request, &Limits::default()).await;
        result.unwrap();
        assert_eq!(collector.tags, vec!["v1".to_string(), "v1".to_string()]);
    }

    #[tokio::test]
    async fn unknown_field_is_rejected() {
        let request = multipart(&[("colour", b"blue")]);
        let (result, _, _) = collect(request, &Limits::default()).await;

        assert!(matches!(
            result,
            Err(GatewayError::UnexpectedField { problem: FieldProblem::Unknown, .. })
        ));
    }

    #[tokio::test]
    async fn field_ceiling() {
        let limits = limits(8, 64);

        let under = multipart(&[("author", b"1234567")]);
        let (result, collector, _) = collect(under, &limits).await;
        result.unwrap();
        assert_eq!(collector.author.as_deref(), Some("1234567"));

        let exact = multipart(&[("author", b"12345678")]);
        let (result, _, _) = collect(exact, &limits).await;
        assert!(matches!(
            result,
            Err(GatewayError::FieldTooLarge { ref field, limit: 8 }) if field == "author"
        ));
    }

    #[tokio::test]
    async fn tag_budget_is_cumulative() {
        let limits = limits(64, 10);
        let request = multipart(&[("tag", b"abcd"), ("tag", b"efgh"), ("tag", b"ij")]);

        let (result, collector, _) = collect(request, &limits).await;
        assert!(matches!(
            result,
            Err(GatewayError::FieldTooLarge { ref field, limit: 2 }) if field == "tag"
        ));
        assert_eq!(collector.tag_bytes, 8);
    }

    #[tokio::test]
    async fn missing_name_component() {
        let request = multipart(&[("source", b"git"), ("name", b"tool"), ("file", b"x")]);
        let (result, collector, saw_file) = collect(request, &Limits::default()).await;
        result.unwrap();
        assert!(saw_file);

        assert!(matches!(
            collector.finish(),
            Err(GatewayError::InvalidIdentifier(InvalidIdentifier::MissingComponent("author")))
        ));
    }
}
