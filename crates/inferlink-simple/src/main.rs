mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command, ServerArgs};
use inferlink_client::{
    AsyncInvoker, CountingAllocator, HostAllocator, ReadinessGate, ResponseReader,
};
use inferlink_core::{InferenceRequest, MemoryType};
use inferlink_proto::inferlink::v1 as pb;
use inferlink_runtime::{LocalServer, ServerOptions};
use prost::Message;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const REQUEST_ID: u64 = 123;
const ELEMENTS: usize = 16;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            server,
            model,
            model_version,
            timeout_secs,
        } => {
            init_logging(&server.log);
            run(server, model, model_version, Duration::from_secs(timeout_secs)).await
        }
        Command::Status { server } => {
            init_logging(&server.log);
            status(server).await
        }
    }
}

fn init_logging(log: &str) {
    std::env::set_var("RUST_LOG", log);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}

async fn start(args: &ServerArgs) -> Result<(Arc<LocalServer>, ReadinessGate)> {
    let options = ServerOptions::new(args.model_repository.clone()).with_worker_count(args.workers);
    let server = LocalServer::new(options).with_context(|| {
        format!(
            "unable to create inference server for {}",
            args.model_repository.display()
        )
    })?;
    let server = Arc::new(server);

    let gate = ReadinessGate::new(
        Duration::from_millis(args.poll_interval_ms),
        args.health_attempts,
    );
    gate.wait_for_server(server.as_ref())
        .await
        .context("inference server never became ready")?;

    let status = gate.server_status(server.as_ref())?;
    println!("Server Status:\n{status:#?}");
    Ok((server, gate))
}

async fn status(args: ServerArgs) -> Result<()> {
    let (server, _) = start(&args).await?;
    server.shutdown();
    Ok(())
}

async fn run(
    args: ServerArgs,
    model: String,
    model_version: Option<i64>,
    timeout: Duration,
) -> Result<()> {
    let (server, gate) = start(&args).await?;
    let version = gate
        .wait_for_model(server.as_ref(), &model, model_version)
        .await
        .with_context(|| format!("model '{model}' never became ready"))?;
    info!(model = %model, version, "model ready");

    let mut header = pb::InferRequestHeader::new(REQUEST_ID, 1);
    header.add_input("INPUT0");
    header.add_input("INPUT1");
    header.add_output("OUTPUT0");
    header.add_output("OUTPUT1");

    let input0: Vec<i32> = (0..ELEMENTS as i32).collect();
    let input1 = vec![1i32; ELEMENTS];
    let input0_data = to_le_bytes(&input0);
    let input1_data = to_le_bytes(&input1);

    let mut request = InferenceRequest::new(
        server.as_ref(),
        &model,
        Some(version),
        &header.encode_to_vec(),
    )
    .context("unable to create inference request")?;
    request
        .bind_input("INPUT0", &input0_data, MemoryType::Cpu)
        .context("unable to set data for INPUT0")?;
    request
        .bind_input("INPUT1", &input1_data, MemoryType::Cpu)
        .context("unable to set data for INPUT1")?;

    let allocator = Arc::new(CountingAllocator::new(Arc::new(HostAllocator::new())));
    let invoker = AsyncInvoker::new(server.clone(), allocator.clone());
    let signal = invoker
        .submit(&request)
        .context("unable to run inference")?;
    drop(request);

    let response = signal.wait_timeout(timeout).await?;
    let reader = ResponseReader::new(response).context("response")?;
    let response_header = reader.header()?;
    info!(
        id = response_header.id,
        model = %response_header.model_name,
        version = response_header.model_version,
        outputs = response_header.output.len(),
        "response header"
    );

    let byte_size = ELEMENTS * std::mem::size_of::<i32>();
    reader.expect_output("OUTPUT0", byte_size, MemoryType::Cpu)?;
    reader.expect_output("OUTPUT1", byte_size, MemoryType::Cpu)?;
    let sum = reader.read_as::<i32>("OUTPUT0", ELEMENTS)?;
    let diff = reader.read_as::<i32>("OUTPUT1", ELEMENTS)?;
    let checked = check_add_sub(&input0, &input1, &sum, &diff);

    reader.destroy();
    drop(invoker);
    server.shutdown();

    let stats = allocator.stats();
    info!(
        allocations = stats.allocations,
        releases = stats.releases,
        outstanding = stats.outstanding(),
        "allocator torn down"
    );
    checked?;
    if stats.outstanding() != 0 {
        anyhow::bail!("{} result buffers were never released", stats.outstanding());
    }
    Ok(())
}

fn check_add_sub(input0: &[i32], input1: &[i32], sum: &[i32], diff: &[i32]) -> Result<()> {
    for i in 0..input0.len() {
        let (a, b) = (input0[i], input1[i]);
        info!("{a} + {b} = {}", sum[i]);
        info!("{a} - {b} = {}", diff[i]);
        if sum[i] != a.wrapping_add(b) {
            error!(index = i, "incorrect sum");
            anyhow::bail!("incorrect sum at {i}: {a} + {b} != {}", sum[i]);
        }
        if diff[i] != a.wrapping_sub(b) {
            error!(index = i, "incorrect difference");
            anyhow::bail!("incorrect difference at {i}: {a} - {b} != {}", diff[i]);
        }
    }
    Ok(())
}

fn to_le_bytes(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}
