#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InferRequestInput {
    #[prost(string, tag = "1")]
    pub name: String,
    /// Shape of one batch element; only needed for dynamic dims.
    #[prost(int64, repeated, tag = "2")]
    pub dims: Vec<i64>,
    /// Total byte size across the batch; 0 = unspecified.
    #[prost(uint64, tag = "3")]
    pub batch_byte_size: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InferRequestOutput {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InferRequestHeader {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(uint32, tag = "2")]
    pub flags: u32,
    #[prost(uint32, tag = "3")]
    pub batch_size: u32,
    #[prost(message, repeated, tag = "4")]
    pub input: Vec<InferRequestInput>,
    #[prost(message, repeated, tag = "5")]
    pub output: Vec<InferRequestOutput>,
}

impl InferRequestHeader {
    pub fn new(id: u64, batch_size: u32) -> Self {
        Self {
            id,
            batch_size,
            ..Default::default()
        }
    }

    pub fn add_input(&mut self, name: impl Into<String>) -> &mut InferRequestInput {
        self.input.push(InferRequestInput {
            name: name.into(),
            ..Default::default()
        });
        let last = self.input.len() - 1;
        &mut self.input[last]
    }

    pub fn add_output(&mut self, name: impl Into<String>) -> &mut InferRequestOutput {
        self.output.push(InferRequestOutput { name: name.into() });
        let last = self.output.len() - 1;
        &mut self.output[last]
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InferResponseOutput {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int64, repeated, tag = "2")]
    pub dims: Vec<i64>,
    #[prost(uint64, tag = "3")]
    pub batch_byte_size: u64,
    #[prost(string, tag = "4")]
    pub data_type: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InferResponseHeader {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(string, tag = "2")]
    pub model_name: String,
    #[prost(int64, tag = "3")]
    pub model_version: i64,
    #[prost(uint32, tag = "4")]
    pub batch_size: u32,
    #[prost(message, repeated, tag = "5")]
    pub output: Vec<InferResponseOutput>,
}
