use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use flowgrid::cache::LocalCache;
use flowgrid::cluster::{LeastLoadedBalancer, LocalComputeService};
use flowgrid::config::ExecutorConfig;
use flowgrid::executor::TaskExecutor;
use flowgrid::handler::TaskState;
use flowgrid::task::closure::SessionRegistry;
use flowgrid::task::envelope::WorkerContext;
use flowgrid::task::{TaskOutput, TaskRun};

#[derive(Parser, Debug)]
#[command(name = "flowgrid")]
#[command(about = "Run one workflow task on an in-process compute cluster")]
struct Args {
    /// Script body to execute
    #[arg(long)]
    script: String,

    /// Task name
    #[arg(long, default_value = "task")]
    name: String,

    /// Shared working directory for task artifacts
    #[arg(long)]
    work_dir: PathBuf,

    /// Target directory declared outputs are copied to
    #[arg(long)]
    target_dir: PathBuf,

    /// Worker-local cache root
    #[arg(long)]
    cache_root: Option<PathBuf>,

    /// Output patterns (repeatable)
    #[arg(long = "output")]
    outputs: Vec<String>,

    /// Input files as name=path (repeatable)
    #[arg(long = "input")]
    inputs: Vec<String>,

    /// Compute slots in the in-process cluster
    #[arg(long, default_value = "2")]
    slots: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = ExecutorConfig::default()
        .with_worker_slots(args.slots)
        .with_poll_interval_ms(200);
    if let Some(root) = args.cache_root {
        config = config.with_cache_root(root);
    }

    tracing::info!(
        session_id = %config.session_id,
        cache_root = %config.cache_root.display(),
        slots = config.worker_slots,
        "Starting flowgrid"
    );

    let cache = Arc::new(LocalCache::new(&config.cache_root)?);
    let worker = Arc::new(WorkerContext::new(cache.clone(), Arc::new(SessionRegistry::new())));
    let compute = Arc::new(LocalComputeService::new(worker, config.worker_slots));
    let balancer = Arc::new(LeastLoadedBalancer::new(compute.loads()));
    let executor = TaskExecutor::new(config, compute, balancer);

    let shutdown = CancellationToken::new();
    cache.purge_on_shutdown(shutdown.clone());
    let monitor = executor.monitor();
    let monitor_shutdown = shutdown.clone();
    tokio::spawn(async move {
        monitor.run(monitor_shutdown).await;
    });

    let mut task = TaskRun::script(args.name, args.work_dir, args.target_dir, args.script);
    for pattern in args.outputs {
        task = task.with_output_pattern(pattern);
    }
    for input in &args.inputs {
        let Some((name, source)) = input.split_once('=') else {
            tracing::warn!(input = %input, "Invalid input format, expected name=path");
            continue;
        };
        task = task.with_input(name, source);
    }

    let handler = executor.create_task_handler(task).await;
    handler.submit().await?;

    while handler.state() != TaskState::Completed {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let task = handler.task();
    let task = task.read().await;
    if let Some(error) = &task.error {
        tracing::error!(error = %error, "Task failed");
    } else {
        tracing::info!(
            exit_status = ?task.exit_status,
            stdout = ?task.stdout.as_ref().and_then(TaskOutput::as_path),
            "Task finished"
        );
    }

    shutdown.cancel();
    // give the cache purge a moment before the runtime goes away
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(())
}
