use std::fmt;

use crate::DType;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IOName(pub String);

impl IOName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IOName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IOName {
    fn from(name: &str) -> Self {
        IOName(name.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TensorSpec {
    pub name: IOName,
    pub dtype: DType,
    pub dims: Vec<Option<usize>>, // None = dynamic
}

impl TensorSpec {
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Byte size of one batch element, filling dynamic dims from `overrides`
    /// when the caller supplied a concrete shape. `None` when a dim stays
    /// dynamic.
    pub fn element_byte_size(&self, overrides: &[i64]) -> Option<usize> {
        let mut numel = 1usize;
        for (idx, dim) in self.dims.iter().enumerate() {
            let concrete = match dim {
                Some(d) => *d,
                None => {
                    let d = *overrides.get(idx)?;
                    usize::try_from(d).ok()?
                }
            };
            numel = numel.checked_mul(concrete)?;
        }
        numel.checked_mul(self.dtype.byte_size())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub inputs: Vec<TensorSpec>,
    pub outputs: Vec<TensorSpec>,
    pub max_batch: usize, // 0 = no batch dimension
}

impl ModelSpec {
    pub fn input(&self, name: &str) -> Option<&TensorSpec> {
        self.inputs.iter().find(|t| t.name.0 == name)
    }

    pub fn output(&self, name: &str) -> Option<&TensorSpec> {
        self.outputs.iter().find(|t| t.name.0 == name)
    }

    pub fn accepts_batch(&self, batch_size: u32) -> bool {
        match self.max_batch {
            0 => batch_size == 1,
            max => batch_size >= 1 && batch_size as usize <= max,
        }
    }
}
