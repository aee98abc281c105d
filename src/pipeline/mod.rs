//! The in-process pipeline: coordinator, prompt templating, and the
//! child-side stdio request loop.

pub mod coordinator;
pub mod stdin_loop;
pub mod templates;

pub use coordinator::Coordinator;
