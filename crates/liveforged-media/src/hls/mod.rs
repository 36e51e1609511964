//! HLS media playlist model and m3u8 rendering.
//!
//! Only live sliding-window media playlists are produced; there is no master
//! playlist because every stream has a single rendition.

mod playlist;

pub use playlist::{MediaPlaylist, PlaylistEntry, CONTENT_TYPE};
