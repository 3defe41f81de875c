use std::str::FromStr;

use bytes::Bytes;
use inferlink_core::{DType, IOName, ModelSpec, Result, ServerError, Tensor};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Platform {
    /// Two inputs, `OUTPUT0 = a + b`, `OUTPUT1 = a - b`.
    AddSub,
    /// Output i is a copy of input i.
    Identity,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::AddSub => "add_sub",
            Platform::Identity => "identity",
        }
    }
}

impl FromStr for Platform {
    type Err = ServerError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "add_sub" => Ok(Platform::AddSub),
            "identity" => Ok(Platform::Identity),
            other => Err(ServerError::Startup(format!(
                "unsupported platform: {other} (expected add_sub or identity)"
            ))),
        }
    }
}

/// A loaded model: platform plus the IO spec it was validated against.
#[derive(Debug)]
pub struct Kernel {
    platform: Platform,
    spec: ModelSpec,
}

impl Kernel {
    pub fn new(platform: Platform, spec: ModelSpec) -> Result<Self> {
        match platform {
            Platform::AddSub => {
                if spec.inputs.len() != 2 || spec.outputs.len() != 2 {
                    return Err(ServerError::Startup(format!(
                        "add_sub model '{}' needs exactly 2 inputs and 2 outputs",
                        spec.name
                    )));
                }
                let dtype = spec.inputs[0].dtype;
                if !matches!(dtype, DType::I32 | DType::I64 | DType::F32) {
                    return Err(ServerError::Startup(format!(
                        "add_sub model '{}' does not support {dtype}",
                        spec.name
                    )));
                }
                if spec
                    .inputs
                    .iter()
                    .chain(spec.outputs.iter())
                    .any(|t| t.dtype != dtype)
                {
                    return Err(ServerError::Startup(format!(
                        "add_sub model '{}' needs one data type for all tensors",
                        spec.name
                    )));
                }
            }
            Platform::Identity => {
                if spec.inputs.len() != spec.outputs.len() {
                    return Err(ServerError::Startup(format!(
                        "identity model '{}' needs as many outputs as inputs",
                        spec.name
                    )));
                }
                if let Some((i, o)) = spec
                    .inputs
                    .iter()
                    .zip(spec.outputs.iter())
                    .find(|(i, o)| i.dtype != o.dtype)
                {
                    return Err(ServerError::Startup(format!(
                        "identity model '{}' maps {} ({}) to {} ({})",
                        spec.name, i.name, i.dtype, o.name, o.dtype
                    )));
                }
            }
        }
        Ok(Self { platform, spec })
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    /// Runs the model over already-copied host inputs.
    pub fn execute(&self, inputs: &[(IOName, Tensor)]) -> Result<Vec<(IOName, Tensor)>> {
        let find = |name: &IOName| {
            inputs
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, t)| t)
                .ok_or_else(|| ServerError::Execution(format!("missing input '{name}'")))
        };

        match self.platform {
            Platform::AddSub => {
                let a = find(&self.spec.inputs[0].name)?;
                let b = find(&self.spec.inputs[1].name)?;
                if a.byte_len() != b.byte_len() {
                    return Err(ServerError::Execution(format!(
                        "input element counts differ: {} vs {}",
                        a.numel(),
                        b.numel()
                    )));
                }
                let (sum, diff) = match a.dtype {
                    DType::I32 => add_sub::<i32>(&a.data, &b.data)?,
                    DType::I64 => add_sub::<i64>(&a.data, &b.data)?,
                    DType::F32 => add_sub::<f32>(&a.data, &b.data)?,
                    other => {
                        return Err(ServerError::Execution(format!(
                            "add_sub does not support {other}"
                        )))
                    }
                };
                Ok(vec![
                    (
                        self.spec.outputs[0].name.clone(),
                        Tensor::from_cpu_bytes(a.dtype, a.shape.clone(), Bytes::from(sum)),
                    ),
                    (
                        self.spec.outputs[1].name.clone(),
                        Tensor::from_cpu_bytes(a.dtype, a.shape.clone(), Bytes::from(diff)),
                    ),
                ])
            }
            Platform::Identity => self
                .spec
                .inputs
                .iter()
                .zip(self.spec.outputs.iter())
                .map(|(i, o)| Ok((o.name.clone(), find(&i.name)?.clone())))
                .collect(),
        }
    }
}

trait Element: Copy {
    const SIZE: usize;
    fn read(bytes: &[u8]) -> Self;
    fn write(self, out: &mut Vec<u8>);
    fn add(self, other: Self) -> Self;
    fn sub(self, other: Self) -> Self;
}

impl Element for i32 {
    const SIZE: usize = 4;
    fn read(b: &[u8]) -> Self {
        i32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }
    fn write(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
    fn add(self, other: Self) -> Self {
        self.wrapping_add(other)
    }
    fn sub(self, other: Self) -> Self {
        self.wrapping_sub(other)
    }
}

impl Element for i64 {
    const SIZE: usize = 8;
    fn read(b: &[u8]) -> Self {
        i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
    }
    fn write(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
    fn add(self, other: Self) -> Self {
        self.wrapping_add(other)
    }
    fn sub(self, other: Self) -> Self {
        self.wrapping_sub(other)
    }
}

impl Element for f32 {
    const SIZE: usize = 4;
    fn read(b: &[u8]) -> Self {
        f32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }
    fn write(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
    fn add(self, other: Self) -> Self {
        self + other
    }
    fn sub(self, other: Self) -> Self {
        self - other
    }
}

fn add_sub<T: Element>(a: &[u8], b: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    if a.len() % T::SIZE != 0 {
        return Err(ServerError::Execution(format!(
            "input byte length {} is not a multiple of {}",
            a.len(),
            T::SIZE
        )));
    }
    let mut sum = Vec::with_capacity(a.len());
    let mut diff = Vec::with_capacity(a.len());
    for (x, y) in a.chunks_exact(T::SIZE).zip(b.chunks_exact(T::SIZE)) {
        let (x, y) = (T::read(x), T::read(y));
        x.add(y).write(&mut sum);
        x.sub(y).write(&mut diff);
    }
    Ok((sum, diff))
}
