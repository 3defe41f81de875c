use inferlink_core::{InferenceResponse, MemoryType, OutputData, Result, ServerError};
use inferlink_proto::inferlink::v1 as pb;
use tracing::error;

/// Fixed-width little-endian element types an output can be read as.
pub trait Element: Copy {
    const SIZE: usize;
    fn from_le(bytes: &[u8]) -> Self;
}

impl Element for i32 {
    const SIZE: usize = 4;
    fn from_le(b: &[u8]) -> Self {
        i32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }
}

impl Element for i64 {
    const SIZE: usize = 8;
    fn from_le(b: &[u8]) -> Self {
        i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
    }
}

impl Element for f32 {
    const SIZE: usize = 4;
    fn from_le(b: &[u8]) -> Self {
        f32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }
}

/// Consumes a completed response whose status has been checked.
///
/// A reader only exists for successful responses; construction tears a
/// failed response down and returns its error.
#[derive(Debug)]
pub struct ResponseReader {
    response: InferenceResponse,
}

impl ResponseReader {
    pub fn new(response: InferenceResponse) -> Result<Self> {
        if let Err(err) = response.status() {
            error!(id = response.id(), error = %err, "inference failed");
            return Err(err);
        }
        Ok(Self { response })
    }

    pub fn id(&self) -> u64 {
        self.response.id()
    }

    pub fn header(&self) -> Result<pb::InferResponseHeader> {
        self.response.header()
    }

    pub fn output(&self, name: &str) -> Result<OutputData<'_>> {
        self.response.output(name)
    }

    /// Fetches `name` after checking its size and memory placement.
    pub fn expect_output(
        &self,
        name: &str,
        byte_size: usize,
        memory_type: MemoryType,
    ) -> Result<OutputData<'_>> {
        let output = self.output(name)?;
        if output.byte_size != byte_size {
            return Err(ServerError::SizeMismatch {
                name: name.to_string(),
                expected: byte_size,
                actual: output.byte_size,
            });
        }
        if output.memory_type != memory_type {
            return Err(ServerError::UnexpectedMemoryType {
                name: name.to_string(),
                expected: memory_type,
                actual: output.memory_type,
            });
        }
        Ok(output)
    }

    /// Decodes `count` host-resident elements of `name`.
    pub fn read_as<T: Element>(&self, name: &str, count: usize) -> Result<Vec<T>> {
        let output = self.expect_output(name, count * T::SIZE, MemoryType::Cpu)?;
        Ok(output.data.chunks_exact(T::SIZE).map(T::from_le).collect())
    }

    pub fn destroy(self) {
        self.response.destroy()
    }
}
