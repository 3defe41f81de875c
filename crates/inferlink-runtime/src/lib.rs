//! An in-process inference engine reached through the `Engine` trait.
//!
//! Requests flow `LocalServer::infer_async -> Scheduler -> Worker`, all on an
//! engine-owned tokio runtime, and complete by firing the caller's callback
//! from a worker task.

pub mod config;
pub mod kernel;
pub mod repository;
pub mod request;
pub mod scheduler;
pub mod server;
pub mod worker;

pub use config::*;
pub use kernel::*;
pub use repository::*;
pub use request::*;
pub use scheduler::*;
pub use server::*;
pub use worker::*;
