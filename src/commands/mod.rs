//! CLI commands implementation

pub mod ask;
pub mod index;
pub mod init;
pub mod query;
pub mod status;
pub mod tasks;

pub use ask::*;
pub use index::*;
pub use init::*;
pub use query::*;
pub use status::*;
pub use tasks::*;
