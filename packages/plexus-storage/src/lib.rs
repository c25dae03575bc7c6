pub mod chunks;
pub mod db;
pub mod docs;
pub mod jobs;
pub mod lock;
pub mod models;
pub mod overrides;
pub mod schema;
pub mod shard;
pub mod state;

mod error;

pub use error::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;
