use std::fmt;
use std::sync::Arc;

use inferlink_proto::inferlink::v1 as pb;
use prost::Message;
use tracing::{error, warn};

use crate::{
    Allocation, BufferToken, IOName, MemoryType, OutputBuffer, ResponseAllocator, Result,
    ServerError,
};

struct ResponseOutput {
    name: IOName,
    buffer: Option<OutputBuffer>,
    token: Option<BufferToken>,
    byte_size: usize,
    memory_type: MemoryType,
    memory_type_id: i64,
}

/// Read-only view of one output, valid while the response is alive.
#[derive(Clone, Copy, Debug)]
pub struct OutputData<'r> {
    pub data: &'r [u8],
    pub byte_size: usize,
    pub memory_type: MemoryType,
    pub memory_type_id: i64,
}

/// Response handle produced by the engine at completion.
///
/// Owns every result buffer until dropped; dropping hands each non-null
/// buffer back to the allocator that produced it, exactly once.
pub struct InferenceResponse {
    id: u64,
    status: Option<ServerError>,
    header: Vec<u8>,
    outputs: Vec<ResponseOutput>,
    allocator: Arc<dyn ResponseAllocator>,
}

impl InferenceResponse {
    pub fn new(id: u64, allocator: Arc<dyn ResponseAllocator>) -> Self {
        Self {
            id,
            status: None,
            header: Vec::new(),
            outputs: Vec::new(),
            allocator,
        }
    }

    /// Records an allocation for `name`. `byte_size` is the size the engine
    /// asked for, which may be smaller than the buffer.
    pub fn add_output(
        &mut self,
        name: IOName,
        allocation: Allocation,
        byte_size: usize,
        memory_type: MemoryType,
        memory_type_id: i64,
    ) {
        let Allocation { buffer, token } = allocation;
        let (memory_type, memory_type_id) = match &buffer {
            Some(b) => (b.memory_type(), b.memory_type_id()),
            None => (memory_type, memory_type_id),
        };
        self.outputs.push(ResponseOutput {
            name,
            buffer,
            token,
            byte_size,
            memory_type,
            memory_type_id,
        });
    }

    pub fn output_buffer_mut(&mut self, name: &str) -> Option<&mut OutputBuffer> {
        self.outputs
            .iter_mut()
            .find(|o| o.name.0 == name)
            .and_then(|o| o.buffer.as_mut())
    }

    pub fn set_header(&mut self, header: &pb::InferResponseHeader) {
        self.header = header.encode_to_vec();
    }

    /// Marks the response failed. The first failure wins.
    pub fn fail(&mut self, err: ServerError) {
        if self.status.is_none() {
            self.status = Some(err);
        } else {
            warn!(id = self.id, error = %err, "response already failed; ignoring later failure");
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_none()
    }

    /// Must be checked before anything else is read.
    pub fn status(&self) -> Result<()> {
        match &self.status {
            None => Ok(()),
            Some(err) => Err(err.clone()),
        }
    }

    pub fn header(&self) -> Result<pb::InferResponseHeader> {
        self.status()?;
        Ok(pb::InferResponseHeader::decode(self.header.as_slice())?)
    }

    /// Refuses to hand out data from a failed response.
    pub fn output(&self, name: &str) -> Result<OutputData<'_>> {
        self.status()?;
        let output = self
            .outputs
            .iter()
            .find(|o| o.name.0 == name)
            .ok_or_else(|| ServerError::UnknownOutput(name.to_string()))?;

        let data = match &output.buffer {
            Some(buffer) => buffer.as_slice().get(..output.byte_size).ok_or_else(|| {
                ServerError::SizeMismatch {
                    name: name.to_string(),
                    expected: output.byte_size,
                    actual: buffer.len(),
                }
            })?,
            None => &[][..],
        };
        Ok(OutputData {
            data,
            byte_size: output.byte_size,
            memory_type: output.memory_type,
            memory_type_id: output.memory_type_id,
        })
    }

    /// Tears the response down, releasing every result buffer.
    pub fn destroy(self) {
        drop(self)
    }
}

impl Drop for InferenceResponse {
    fn drop(&mut self) {
        for output in self.outputs.drain(..) {
            let Some(buffer) = output.buffer else {
                continue;
            };
            if let Err(err) = self.allocator.release(
                buffer,
                output.token,
                output.byte_size,
                output.memory_type,
                output.memory_type_id,
            ) {
                error!(
                    id = self.id,
                    output = %output.name,
                    error = %err,
                    "failed to release result buffer"
                );
            }
        }
    }
}

impl fmt::Debug for InferenceResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InferenceResponse")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("outputs", &self.outputs.iter().map(|o| &o.name).collect::<Vec<_>>())
            .finish()
    }
}
