//! The publish boundary: starting and stopping live sessions.

mod input;
mod server;

pub use input::{InputBinding, InputSource};
pub use server::IngestServer;
