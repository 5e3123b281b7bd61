//! # Artifact gateway
//!
//! An HTTP front end for an artifact registry. Artifacts are uploaded as
//! multipart forms and relayed to the registry as a stream of bounded content
//! frames; downloads are pulled from the registry and served with an exact
//! length. Manifests submitted over HTTP become tasks on a queue.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use artifact_gateway::{GatewayBuilder, MemoryQueue};
//! use registry::MemoryRegistry;
//!
//! let app = GatewayBuilder::new()
//!     .registry(MemoryRegistry::new().into())
//!     .queue(Arc::new(MemoryQueue::new()))
//!     .build();
//!
//! // Serve `app` with axum or any tower-compatible server
//! # let _ = app;
//! ```

mod api;
mod artifact;
pub mod bridge;
mod config;
mod error;
mod manifest;
pub mod queue;

pub use api::GatewayBuilder;
pub use config::{ConfigError, GatewayConfig, Limits, LogConfig, LogFormat};
pub use error::{FieldProblem, GatewayError, GatewayResult};
pub use manifest::BLUEPRINT_KIND;
pub use queue::{MemoryQueue, QueueConfig, Task, TaskId, TaskQueue, TaskRequest};
