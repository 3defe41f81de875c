pub mod allocator;
pub mod engine;
pub mod error;
pub mod request;
pub mod response;
pub mod spec;
pub mod tensor;

pub use allocator::*;
pub use engine::*;
pub use error::*;
pub use request::*;
pub use response::*;
pub use spec::*;
pub use tensor::*;
