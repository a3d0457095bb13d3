//! # Storage Driver
//!
//! Uniform object storage for ferry. A destination URI selects one of a
//! closed set of backends:
//!
//! - bare paths and `file://` URIs write to the local filesystem
//! - `s3://KEY:SECRET@REGION/BUCKET/KEY` targets AWS S3
//! - `s3+http(s)://KEY:SECRET@HOST[:PORT]/BUCKET/KEY` targets S3-compatible services
//! - `gs://BUCKET/KEY` targets Google Cloud Storage
//! - `memory://STORE/KEY` is an in-process store, enabled only on test registries
//!
//! [`DriverRegistry`] resolves a [`Destination`] into a [`StorageSession`],
//! reusing one client per store.

mod error;
mod location;
mod object_session;
mod registry;
mod session;
mod uri;

pub use error::{StorageError, StorageResult};
pub use object_session::ObjectStoreSession;
pub use registry::{DriverDescription, DriverRegistry};
pub use session::{
    FileInfo, FileProperties, ListPage, ObjectData, SaveOutput, StorageResolver, StorageSession,
};
pub use uri::{Backend, Destination};
