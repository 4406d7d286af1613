pub mod cache;
pub mod cells;
pub mod config;
pub mod layout;
pub mod nav;
pub mod normalize;
pub mod session;
pub mod text;
pub mod types;

pub mod state;

pub use config::ReaderConfig;
pub use session::{NavCommand, ReaderSession, SessionError};
pub use types::{Book, Document};
