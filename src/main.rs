use std::sync::Arc;
use anyhow::{bail, Context};
use async_trait::async_trait;
use darkroom::config::Config;
use darkroom::upload::spawn_observer;
use darkroom::{FileHandle, HttpBackend, RemoteRecord, TaskId, TaskStatus, UploadManager, UploadObserver};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

struct ConsoleObserver;

#[async_trait]
impl UploadObserver for ConsoleObserver {
    async fn on_progress(&self, task_id: TaskId, progress: u8) {
        println!("[PROGRESS] {} - {}%", task_id, progress);
    }

    async fn on_status_change(&self, task_id: TaskId, old_status: TaskStatus, new_status: TaskStatus) {
        println!("[STATE] {} - {} -> {}", task_id, old_status, new_status);
    }

    async fn on_success(&self, task_id: TaskId, record: &RemoteRecord) {
        println!("[COMPLETED] {} - record {}", task_id, record.id);
    }

    async fn on_error(&self, task_id: TaskId, error: &str) {
        eprintln!("[FAILED] {} - Error: {}", task_id, error);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "darkroom=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let Some(config_path) = args.next() else {
        bail!("usage: darkroom <config.toml> <file>...");
    };
    let config = Config::load(&config_path)
        .with_context(|| format!("loading {}", config_path))?;

    let mut files = Vec::new();
    for path in args {
        let file = FileHandle::from_path(&path)
            .await
            .with_context(|| format!("reading {}", path))?;
        files.push(file);
    }
    if files.is_empty() {
        bail!("no files given");
    }

    let mut backend = HttpBackend::new(&config.client.endpoint)?;
    if let Some(token) = &config.client.token {
        backend = backend.with_token(token);
    }

    let handle = UploadManager::new(Arc::new(backend), config.uploader.clone())?;
    let manager = handle.manager.clone();
    let mut events = manager.subscribe_events();
    let observer = spawn_observer(manager.subscribe_events(), ConsoleObserver);

    let ids = manager.enqueue(files, config.client.album_id.clone()).await?;
    info!(count = ids.len(), album = %config.client.album_id, "files queued");
    manager.start().await?;

    // Wait for the run to drain
    loop {
        match events.recv().await {
            Ok(darkroom::UploadEvent::Completed { .. }) => break,
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }

    let status = manager.queue_status().await?;
    drop(manager);
    handle.shutdown().await?;
    observer.await?;

    println!(
        "{} uploaded, {} failed, {} cancelled",
        status.success, status.error, status.cancelled
    );
    if status.error > 0 {
        std::process::exit(1);
    }
    Ok(())
}
