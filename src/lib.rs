// Piece-table text buffer library

pub mod config;
pub mod model;
pub mod primitives;

pub use config::{BufferConfig, ConfigError, DefaultEol};
pub use model::builder::PieceTreeTextBufferBuilder;
pub use model::edit::{ApplyEditsResult, EditError, EndOfLine, SingleEditOperation};
pub use model::text_buffer::{PieceTreeTextBuffer, SearchQuery};
pub use primitives::range::{Position, Range};
