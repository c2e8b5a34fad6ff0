//! Shardset's client functionality modules.

mod apistub;
mod clerk;

pub use apistub::ClientApiStub;
pub use clerk::{ClientConfig, ShardsetClient};
