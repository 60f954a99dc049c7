//! Safe wrappers around the Windows API calls the input hooks need.

pub mod hooks;
pub mod message_loop;

pub use hooks::*;
pub use message_loop::*;
