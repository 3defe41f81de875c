use std::collections::HashSet;

use inferlink_proto::inferlink::v1 as pb;
use prost::Message;
use tracing::debug;

use crate::{Engine, IOName, MemoryType, ModelSpec, Result, ServerError};

/// Caller-owned input memory bound to a request.
#[derive(Clone, Debug)]
pub struct InferInput<'a> {
    pub name: IOName,
    pub data: &'a [u8],
    pub memory_type: MemoryType,
    pub memory_type_id: i64,
}

/// A validated inference request.
///
/// Borrows its input buffers for `'a`, so they stay alive and unmodified
/// until the request is dropped, which the caller may do as soon as
/// submission returns.
#[derive(Debug)]
pub struct InferenceRequest<'a> {
    model: String,
    version: i64,
    spec: ModelSpec,
    header: pb::InferRequestHeader,
    inputs: Vec<InferInput<'a>>,
}

impl<'a> InferenceRequest<'a> {
    pub fn new<E: Engine + ?Sized>(
        engine: &E,
        model_name: &str,
        model_version: Option<i64>,
        serialized_header: &[u8],
    ) -> Result<Self> {
        let header = pb::InferRequestHeader::decode(serialized_header)?;
        let (version, spec) = engine.model_spec(model_name, model_version)?;

        if !spec.accepts_batch(header.batch_size) {
            return Err(ServerError::InvalidArgument(format!(
                "batch size {} not supported by model '{}' (max {})",
                header.batch_size, model_name, spec.max_batch
            )));
        }

        let mut seen = HashSet::new();
        for input in &header.input {
            if !seen.insert(input.name.as_str()) {
                return Err(ServerError::DuplicateInput(input.name.clone()));
            }
            let tensor = spec
                .input(&input.name)
                .ok_or_else(|| ServerError::UnknownInput(input.name.clone()))?;
            if !input.dims.is_empty() && input.dims.len() != tensor.rank() {
                return Err(ServerError::InvalidArgument(format!(
                    "input '{}' has rank {}, model expects {}",
                    input.name,
                    input.dims.len(),
                    tensor.rank()
                )));
            }
        }

        let mut seen = HashSet::new();
        for output in &header.output {
            if !seen.insert(output.name.as_str()) {
                return Err(ServerError::InvalidArgument(format!(
                    "output '{}' requested more than once",
                    output.name
                )));
            }
            if spec.output(&output.name).is_none() {
                return Err(ServerError::UnknownOutput(output.name.clone()));
            }
        }

        debug!(
            model = model_name,
            version,
            id = header.id,
            inputs = header.input.len(),
            outputs = header.output.len(),
            "created inference request"
        );

        Ok(Self {
            model: model_name.to_string(),
            version,
            spec,
            header,
            inputs: Vec::new(),
        })
    }

    /// Associates `data` with the declared input `name`.
    ///
    /// The size is checked against the model when the shape is fully known;
    /// with dynamic dims left open the engine does the final check.
    pub fn bind_input(
        &mut self,
        name: &str,
        data: &'a [u8],
        memory_type: MemoryType,
    ) -> Result<()> {
        let declared = self
            .header
            .input
            .iter()
            .find(|i| i.name == name)
            .ok_or_else(|| ServerError::UnknownInput(name.to_string()))?;

        if self.inputs.iter().any(|i| i.name.0 == name) {
            return Err(ServerError::DuplicateInput(name.to_string()));
        }

        let tensor = self
            .spec
            .input(name)
            .ok_or_else(|| ServerError::UnknownInput(name.to_string()))?;

        if let Some(per_item) = tensor.element_byte_size(&declared.dims) {
            let expected = per_item
                .checked_mul(self.header.batch_size as usize)
                .unwrap_or(usize::MAX);
            if expected != data.len() {
                return Err(ServerError::SizeMismatch {
                    name: name.to_string(),
                    expected,
                    actual: data.len(),
                });
            }
        }

        if declared.batch_byte_size != 0 && declared.batch_byte_size as usize != data.len() {
            return Err(ServerError::SizeMismatch {
                name: name.to_string(),
                expected: declared.batch_byte_size as usize,
                actual: data.len(),
            });
        }

        self.inputs.push(InferInput {
            name: IOName(name.to_string()),
            data,
            memory_type,
            memory_type_id: 0,
        });
        Ok(())
    }

    pub fn id(&self) -> u64 {
        self.header.id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn batch_size(&self) -> u32 {
        self.header.batch_size
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn header(&self) -> &pb::InferRequestHeader {
        &self.header
    }

    pub fn inputs(&self) -> &[InferInput<'a>] {
        &self.inputs
    }

    pub fn input(&self, name: &str) -> Option<&InferInput<'a>> {
        self.inputs.iter().find(|i| i.name.0 == name)
    }

    pub fn requested_outputs(&self) -> impl Iterator<Item = &str> {
        self.header.output.iter().map(|o| o.name.as_str())
    }

    /// Declared inputs that have no data yet.
    pub fn unbound_inputs(&self) -> Vec<&str> {
        self.header
            .input
            .iter()
            .map(|i| i.name.as_str())
            .filter(|name| self.input(name).is_none())
            .collect()
    }
}
