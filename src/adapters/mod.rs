// Adapters layer: concrete implementations of the domain ports.

pub mod local;
pub mod memory;
pub mod postgres;
#[cfg(feature = "aws")]
pub mod s3;

pub use local::LocalObjectStore;
pub use memory::{MemoryObjectStore, MemoryWarehouse};
pub use postgres::PgExecutor;
#[cfg(feature = "aws")]
pub use s3::S3ObjectStore;
