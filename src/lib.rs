pub mod cli;
pub mod config;
pub mod error;
pub mod format;
pub mod image;
pub mod integrity;
pub mod layout;
pub mod patcher;
pub mod progress;
pub mod resolver;
pub mod stream;
pub mod verify;
pub mod writer;

pub use cli::run;
pub use error::{PatchError, Result};
