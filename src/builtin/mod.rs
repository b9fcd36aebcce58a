//! Built-in task bodies for the file chores a site build needs.
//!
//! Anything heavier (bundling, style compilation, image optimization,
//! deployment) is an external tool run through [`CommandBody`].

mod clean;
mod command;
mod copy;

pub use clean::CleanBody;
pub use command::{CommandBody, DEFAULT_SHELL};
pub use copy::CopyBody;
