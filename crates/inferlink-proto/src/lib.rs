//! Wire messages exchanged with the engine: server/model status and
//! inference request/response headers.
//!
//! The messages are declared with prost's derive macros, so the encoding is
//! plain protobuf and stays schema-evolvable without a codegen step.

pub mod inferlink {
    pub mod v1 {
        mod header;
        mod status;

        pub use header::*;
        pub use status::*;
    }
}
