//! API request handlers

mod jobs;
mod triggers;
mod workflows;

pub use jobs::*;
pub use triggers::*;
pub use workflows::*;
