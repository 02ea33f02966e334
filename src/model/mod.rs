//! Text model
//!
//! The piece tree and everything built on top of it: buffers, the façade
//! applying batched edits, snapshots and the chunk builder.

pub mod buffer;
pub mod builder;
pub mod edit;
pub mod piece_tree;
pub mod rb_tree;
pub mod search_cache;
pub mod snapshot;
pub mod text_buffer;
pub mod text_change;
