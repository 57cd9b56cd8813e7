pub mod audio;
pub mod coach;
pub mod config;
pub mod error;
pub mod live;
pub mod prompts;
pub mod response;

pub use error::{CoachError, Result};
