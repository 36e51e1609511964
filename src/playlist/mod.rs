//! Rolling HLS playlists.

mod manager;

pub use manager::{PlaylistManager, PlaylistSnapshot, Retention};
