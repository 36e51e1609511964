//! Live sessions and the registry that tracks them.

mod registry;
mod session;

pub use registry::{validate_stream_name, SessionRegistry, MAX_STREAM_NAME_LEN};
pub use session::{Session, SessionState, SessionSummary};
