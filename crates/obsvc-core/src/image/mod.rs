//! Kiwi image build configuration editing.

mod editor;
mod error;

pub use editor::{ImageEditor, RepositoryBinaries, SessionState};
pub use error::{ImageConfigError, ImageConfigResult};
