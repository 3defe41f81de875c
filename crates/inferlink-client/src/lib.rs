//! Caller side of the asynchronous inference protocol.
//!
//! ```text
//! ReadinessGate::wait_for_model
//!       │
//!       ▼
//! InferenceRequest::new + bind_input
//!       │
//!       ▼
//! AsyncInvoker::submit(request) ──► CompletionSignal
//!       │                                 │  engine thread:
//!       │                                 │  allocate() ... callback
//!       ▼                                 ▼
//! ResponseReader::new(response) ──► destroy() ──► release() per buffer
//! ```

pub mod allocator;
pub mod invoker;
pub mod readiness;
pub mod reader;

pub use allocator::*;
pub use invoker::*;
pub use readiness::*;
pub use reader::*;
