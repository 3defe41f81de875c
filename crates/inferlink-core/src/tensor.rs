use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use smallvec::SmallVec;

use crate::ServerError;

/// Memory domain a buffer lives in. Carried unchanged through the allocator
/// contract and every output descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum MemoryType {
    #[default]
    Cpu,
    CpuPinned,
    Gpu,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Cpu => "cpu",
            MemoryType::CpuPinned => "cpu_pinned",
            MemoryType::Gpu => "gpu",
        }
    }

    pub fn is_host(&self) -> bool {
        matches!(self, MemoryType::Cpu | MemoryType::CpuPinned)
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryType {
    type Err = ServerError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "cpu" => Ok(MemoryType::Cpu),
            "cpu_pinned" => Ok(MemoryType::CpuPinned),
            "gpu" => Ok(MemoryType::Gpu),
            other => Err(ServerError::InvalidArgument(format!(
                "unsupported memory type: {other} (expected cpu, cpu_pinned or gpu)"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    F16,
    I64,
    I32,
    U8,
}

impl DType {
    pub fn byte_size(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 => 2,
            DType::I64 => 8,
            DType::I32 => 4,
            DType::U8 => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::F16 => "f16",
            DType::I64 => "i64",
            DType::I32 => "i32",
            DType::U8 => "u8",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DType {
    type Err = ServerError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "f32" | "fp32" => Ok(DType::F32),
            "f16" | "fp16" => Ok(DType::F16),
            "i64" | "int64" => Ok(DType::I64),
            "i32" | "int32" => Ok(DType::I32),
            "u8" | "uint8" => Ok(DType::U8),
            other => Err(ServerError::InvalidArgument(format!(
                "unsupported data type: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Shape(pub SmallVec<[usize; 6]>);

impl Shape {
    pub fn from_slice(d: &[usize]) -> Self {
        Self(d.iter().copied().collect())
    }
    pub fn rank(&self) -> usize {
        self.0.len()
    }
    pub fn numel(&self) -> usize {
        self.0.iter().product::<usize>().max(1)
    }
    pub fn to_dims(&self) -> Vec<i64> {
        self.0.iter().map(|d| *d as i64).collect()
    }
}

/// A host tensor the engine owns after copying it out of a request.
#[derive(Clone, Debug)]
pub struct Tensor {
    pub dtype: DType,
    pub shape: Shape,
    pub data: Bytes,
}

impl Tensor {
    pub fn from_cpu_bytes(dtype: DType, shape: Shape, data: Bytes) -> Self {
        Self { dtype, shape, data }
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn numel(&self) -> usize {
        self.data.len() / self.dtype.byte_size()
    }
}
