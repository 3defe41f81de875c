use std::any::Any;
use std::fmt;

use crate::{MemoryType, Result};

/// Allocator-defined value handed out with a buffer and presented back at
/// release. Owned by the allocator contract from `allocate` until `release`.
pub type BufferToken = Box<dyn Any + Send>;

/// A result buffer produced by a [`ResponseAllocator`].
///
/// Moves allocator -> engine -> response -> allocator; the move back into
/// `release` is what guarantees a single free.
pub struct OutputBuffer {
    data: Box<[u8]>,
    memory_type: MemoryType,
    memory_type_id: i64,
}

impl OutputBuffer {
    /// Zero-filled host buffer of exactly `byte_size` bytes.
    pub fn zeroed(byte_size: usize, memory_type: MemoryType, memory_type_id: i64) -> Self {
        Self {
            data: vec![0u8; byte_size].into_boxed_slice(),
            memory_type,
            memory_type_id,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.data.as_ptr()
    }

    pub fn memory_type(&self) -> MemoryType {
        self.memory_type
    }

    pub fn memory_type_id(&self) -> i64 {
        self.memory_type_id
    }
}

impl fmt::Debug for OutputBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputBuffer")
            .field("ptr", &self.as_ptr())
            .field("len", &self.len())
            .field("memory_type", &self.memory_type)
            .field("memory_type_id", &self.memory_type_id)
            .finish()
    }
}

/// Outcome of a single `allocate` call.
///
/// * buffer and token: allocation succeeded.
/// * token only: zero-byte request, nothing was allocated.
/// * neither: the allocator cannot satisfy the requested memory type.
#[derive(Default)]
pub struct Allocation {
    pub buffer: Option<OutputBuffer>,
    pub token: Option<BufferToken>,
}

impl Allocation {
    pub fn new(buffer: OutputBuffer, token: BufferToken) -> Self {
        Self {
            buffer: Some(buffer),
            token: Some(token),
        }
    }

    pub fn empty(token: BufferToken) -> Self {
        Self {
            buffer: None,
            token: Some(token),
        }
    }

    pub fn unsatisfied() -> Self {
        Self::default()
    }

    pub fn is_unsatisfied(&self) -> bool {
        self.buffer.is_none() && self.token.is_none()
    }
}

impl fmt::Debug for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocation")
            .field("buffer", &self.buffer)
            .field("has_token", &self.token.is_some())
            .finish()
    }
}

/// Strategy object supplying and reclaiming result-tensor memory.
///
/// Passed explicitly into every submission. Both methods run on engine
/// threads, possibly concurrently for different tensors, so implementations
/// must synchronize any state shared across allocations.
pub trait ResponseAllocator: Send + Sync + 'static {
    /// Returns a buffer of at least `byte_size` bytes in `memory_type`.
    ///
    /// Must not allocate for `byte_size == 0` (return [`Allocation::empty`])
    /// and must return [`Allocation::unsatisfied`] rather than an error for
    /// memory types it does not serve.
    fn allocate(
        &self,
        tensor_name: &str,
        byte_size: usize,
        memory_type: MemoryType,
        memory_type_id: i64,
    ) -> Result<Allocation>;

    /// Called exactly once per non-null buffer returned by `allocate`.
    fn release(
        &self,
        buffer: OutputBuffer,
        token: Option<BufferToken>,
        byte_size: usize,
        memory_type: MemoryType,
        memory_type_id: i64,
    ) -> Result<()>;
}
