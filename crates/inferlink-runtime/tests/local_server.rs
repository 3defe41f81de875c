use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use inferlink_core::{
    Allocation, BufferToken, Engine, InferenceRequest, InferenceResponse, MemoryType,
    OutputBuffer, ResponseAllocator, ServerError,
};
use inferlink_proto::inferlink::v1 as pb;
use inferlink_runtime::{LocalServer, ServerOptions};
use prost::Message;
use tokio::sync::oneshot;

const ADD_SUB: &str = r#"
platform = "add_sub"
max_batch_size = 8

[[input]]
name = "INPUT0"
data_type = "i32"
dims = [16]

[[input]]
name = "INPUT1"
data_type = "i32"
dims = [16]

[[output]]
name = "OUTPUT0"
data_type = "i32"
dims = [16]

[[output]]
name = "OUTPUT1"
data_type = "i32"
dims = [16]
"#;

fn identity(dims: &str) -> String {
    format!(
        r#"
platform = "identity"

[[input]]
name = "INPUT0"
data_type = "i32"
dims = {dims}

[[output]]
name = "OUTPUT0"
data_type = "i32"
dims = {dims}
"#
    )
}

fn write_model(root: &Path, name: &str, config: &str) -> Result<()> {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir)?;
    std::fs::write(dir.join("config.toml"), config)?;
    Ok(())
}

/// Host-only allocator that records what it released.
#[derive(Default)]
struct HostOnly {
    allocated: Mutex<Vec<String>>,
    released: Mutex<Vec<String>>,
    empty: AtomicUsize,
}

impl ResponseAllocator for HostOnly {
    fn allocate(
        &self,
        tensor_name: &str,
        byte_size: usize,
        memory_type: MemoryType,
        memory_type_id: i64,
    ) -> inferlink_core::Result<Allocation> {
        if byte_size == 0 {
            self.empty.fetch_add(1, Ordering::Relaxed);
            return Ok(Allocation::empty(Box::new(tensor_name.to_string())));
        }
        if memory_type != MemoryType::Cpu {
            return Ok(Allocation::unsatisfied());
        }
        self.allocated.lock().unwrap().push(tensor_name.to_string());
        Ok(Allocation::new(
            OutputBuffer::zeroed(byte_size, memory_type, memory_type_id),
            Box::new(tensor_name.to_string()),
        ))
    }

    fn release(
        &self,
        _buffer: OutputBuffer,
        token: Option<BufferToken>,
        _byte_size: usize,
        _memory_type: MemoryType,
        _memory_type_id: i64,
    ) -> inferlink_core::Result<()> {
        let name = token
            .and_then(|t| t.downcast::<String>().ok())
            .map(|s| *s)
            .unwrap_or_default();
        self.released.lock().unwrap().push(name);
        Ok(())
    }
}

async fn wait_ready(server: &LocalServer) -> Result<()> {
    for _ in 0..200 {
        if server.is_ready()? {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    anyhow::bail!("server never became ready")
}

fn request_header(id: u64) -> Vec<u8> {
    let mut header = pb::InferRequestHeader::new(id, 1);
    header.add_input("INPUT0");
    header.add_input("INPUT1");
    header.add_output("OUTPUT0");
    header.add_output("OUTPUT1");
    header.encode_to_vec()
}

fn i32_bytes(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn to_i32(bytes: &[u8]) -> Vec<i32> {
    bytes
        .chunks_exact(4)
        .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

async fn infer(
    server: &LocalServer,
    allocator: Arc<HostOnly>,
    input0: &[i32],
    input1: &[i32],
) -> Result<InferenceResponse> {
    let in0 = i32_bytes(input0);
    let in1 = i32_bytes(input1);
    let mut request = InferenceRequest::new(server, "simple", None, &request_header(9))?;
    request.bind_input("INPUT0", &in0, MemoryType::Cpu)?;
    request.bind_input("INPUT1", &in1, MemoryType::Cpu)?;

    let (tx, rx) = oneshot::channel();
    server.infer_async(
        &request,
        allocator,
        Box::new(move |response| {
            let _ = tx.send(response);
        }),
    )?;
    drop(request);

    rx.await.context("completion dropped")
}

#[test]
fn missing_repository_fails_startup() {
    let err = LocalServer::new(ServerOptions::new("/no/such/repository"))
        .err()
        .expect("startup must fail");
    assert!(matches!(err, ServerError::Startup(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn add_sub_round_trip() -> Result<()> {
    let repo = tempfile::tempdir()?;
    write_model(repo.path(), "simple", ADD_SUB)?;
    let server = LocalServer::new(ServerOptions::new(repo.path()))?;
    wait_ready(&server).await?;

    let allocator = Arc::new(HostOnly::default());
    let input0: Vec<i32> = (0..16).collect();
    let input1 = vec![1; 16];
    let response = infer(&server, allocator.clone(), &input0, &input1).await?;

    response.status()?;
    let header = response.header()?;
    ensure!(header.id == 9, "unexpected id {}", header.id);
    ensure!(header.model_version == 1, "unexpected version");
    ensure!(header.output.len() == 2, "expected two outputs");
    ensure!(header.output[0].dims == vec![16], "batch dim must be stripped");

    let sum = response.output("OUTPUT0")?;
    let diff = response.output("OUTPUT1")?;
    assert_eq!(sum.byte_size, 64);
    assert_eq!(sum.memory_type, MemoryType::Cpu);
    for i in 0..16 {
        assert_eq!(to_i32(sum.data)[i], input0[i] + input1[i]);
        assert_eq!(to_i32(diff.data)[i], input0[i] - input1[i]);
    }

    assert!(allocator.released.lock().unwrap().is_empty());
    response.destroy();
    let mut released = allocator.released.lock().unwrap().clone();
    released.sort();
    assert_eq!(released, vec!["OUTPUT0", "OUTPUT1"]);

    let status = pb::ServerStatus::decode(server.model_status("simple")?.as_slice())?;
    assert_eq!(status.model_status["simple"].version_status[&1].inference_count, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn loading_model_rejects_submission_without_callback() -> Result<()> {
    let repo = tempfile::tempdir()?;
    write_model(
        repo.path(),
        "simple",
        &format!("load_delay_ms = 60000\n{ADD_SUB}"),
    )?;
    let server = LocalServer::new(ServerOptions::new(repo.path()))?;
    assert!(server.is_live()?);
    assert!(!server.is_ready()?);

    let in0 = i32_bytes(&[0; 16]);
    let mut request = InferenceRequest::new(&server, "simple", None, &request_header(1))?;
    request.bind_input("INPUT0", &in0, MemoryType::Cpu)?;
    request.bind_input("INPUT1", &in0, MemoryType::Cpu)?;

    let (tx, mut rx) = oneshot::channel::<InferenceResponse>();
    let err = server
        .infer_async(
            &request,
            Arc::new(HostOnly::default()),
            Box::new(move |response| {
                let _ = tx.send(response);
            }),
        )
        .unwrap_err();
    assert!(matches!(err, ServerError::SchedulingRejected(_)));
    // The callback was dropped unfired.
    assert!(matches!(
        rx.try_recv(),
        Err(oneshot::error::TryRecvError::Closed)
    ));

    let status = pb::ServerStatus::decode(server.model_status("simple")?.as_slice())?;
    assert_eq!(
        status.model_status["simple"].version_status[&1].state(),
        pb::ModelReadyState::ModelLoading
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn unbound_input_is_rejected_synchronously() -> Result<()> {
    let repo = tempfile::tempdir()?;
    write_model(repo.path(), "simple", ADD_SUB)?;
    let server = LocalServer::new(ServerOptions::new(repo.path()))?;
    wait_ready(&server).await?;

    let in0 = i32_bytes(&[0; 16]);
    let mut request = InferenceRequest::new(&server, "simple", None, &request_header(1))?;
    request.bind_input("INPUT0", &in0, MemoryType::Cpu)?;

    let err = server
        .infer_async(&request, Arc::new(HostOnly::default()), Box::new(|_| {}))
        .unwrap_err();
    assert_eq!(err, ServerError::MissingInput("INPUT1".to_string()));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn unsatisfied_allocation_fails_the_response() -> Result<()> {
    let repo = tempfile::tempdir()?;
    write_model(
        repo.path(),
        "simple",
        &format!("output_memory = \"gpu\"\n{ADD_SUB}"),
    )?;
    let server = LocalServer::new(ServerOptions::new(repo.path()))?;
    wait_ready(&server).await?;

    let allocator = Arc::new(HostOnly::default());
    let response = infer(&server, allocator.clone(), &[1; 16], &[2; 16]).await?;
    assert!(matches!(response.status(), Err(ServerError::Execution(_))));
    assert!(response.output("OUTPUT0").is_err());
    drop(response);

    assert!(allocator.allocated.lock().unwrap().is_empty());
    assert!(allocator.released.lock().unwrap().is_empty());

    let status = pb::ServerStatus::decode(server.server_status()?.as_slice())?;
    assert_eq!(status.model_status["simple"].version_status[&1].failure_count, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn broken_model_blocks_strict_readiness_only() -> Result<()> {
    let repo = tempfile::tempdir()?;
    write_model(repo.path(), "simple", ADD_SUB)?;
    write_model(repo.path(), "broken", "platform = \"add_sub\"\nmax_batch_size = \"x\"")?;

    let strict = LocalServer::new(ServerOptions::new(repo.path()))?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!strict.is_ready()?);
    let status = pb::ServerStatus::decode(strict.server_status()?.as_slice())?;
    assert_eq!(
        status.model_status["broken"].version_status[&1].state(),
        pb::ModelReadyState::ModelUnavailable
    );
    assert!(matches!(
        strict.model_spec("broken", None),
        Err(ServerError::InvalidModel { .. })
    ));

    let relaxed = LocalServer::new(ServerOptions::new(repo.path()).with_strict_readiness(false))?;
    assert!(relaxed.is_ready()?);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_stops_accepting_requests() -> Result<()> {
    let repo = tempfile::tempdir()?;
    write_model(repo.path(), "simple", ADD_SUB)?;
    let server = LocalServer::new(ServerOptions::new(repo.path()))?;
    wait_ready(&server).await?;

    server.shutdown();
    assert!(!server.is_live()?);
    assert!(!server.is_ready()?);

    let in0 = i32_bytes(&[0; 16]);
    let mut request = InferenceRequest::new(&server, "simple", None, &request_header(1))?;
    request.bind_input("INPUT0", &in0, MemoryType::Cpu)?;
    request.bind_input("INPUT1", &in0, MemoryType::Cpu)?;
    let err = server
        .infer_async(&request, Arc::new(HostOnly::default()), Box::new(|_| {}))
        .unwrap_err();
    assert!(matches!(err, ServerError::SchedulingRejected(_)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_output_is_never_allocated_or_released() -> Result<()> {
    let repo = tempfile::tempdir()?;
    write_model(repo.path(), "echo", &identity("[-1]"))?;
    let server = LocalServer::new(ServerOptions::new(repo.path()))?;
    wait_ready(&server).await?;

    let mut header = pb::InferRequestHeader::new(4, 1);
    header.add_input("INPUT0");
    header.add_output("OUTPUT0");
    let mut request = InferenceRequest::new(&server, "echo", None, &header.encode_to_vec())?;
    request.bind_input("INPUT0", &[], MemoryType::Cpu)?;

    let allocator = Arc::new(HostOnly::default());
    let (tx, rx) = oneshot::channel();
    server.infer_async(
        &request,
        allocator.clone(),
        Box::new(move |response| {
            let _ = tx.send(response);
        }),
    )?;
    drop(request);
    let response = rx.await.context("completion dropped")?;

    response.status()?;
    let out = response.output("OUTPUT0")?;
    assert_eq!(out.byte_size, 0);
    assert!(out.data.is_empty());
    assert_eq!(response.header()?.output[0].dims, vec![0]);
    response.destroy();

    assert!(allocator.allocated.lock().unwrap().is_empty());
    assert_eq!(allocator.empty.load(Ordering::Relaxed), 1);
    assert!(allocator.released.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn overflowing_declared_dims_are_rejected_synchronously() -> Result<()> {
    let repo = tempfile::tempdir()?;
    write_model(repo.path(), "echo", &identity("[-1, -1]"))?;
    let server = LocalServer::new(ServerOptions::new(repo.path()))?;
    wait_ready(&server).await?;

    let mut header = pb::InferRequestHeader::new(5, 1);
    header.add_input("INPUT0");
    header.input[0].dims = vec![1 << 40, 1 << 40];
    header.add_output("OUTPUT0");
    let data = i32_bytes(&[7; 4]);
    let mut request = InferenceRequest::new(&server, "echo", None, &header.encode_to_vec())?;
    // Too large to check here; the engine decides.
    request.bind_input("INPUT0", &data, MemoryType::Cpu)?;

    let allocator = Arc::new(HostOnly::default());
    let (tx, mut rx) = oneshot::channel::<InferenceResponse>();
    let err = server
        .infer_async(
            &request,
            allocator.clone(),
            Box::new(move |response| {
                let _ = tx.send(response);
            }),
        )
        .unwrap_err();
    assert!(matches!(err, ServerError::SizeMismatch { actual: 16, .. }));
    assert!(matches!(
        rx.try_recv(),
        Err(oneshot::error::TryRecvError::Closed)
    ));
    assert!(allocator.allocated.lock().unwrap().is_empty());
    Ok(())
}
