use anyhow::{Context, Result};
use dotenvy::dotenv;
use simplelog::LevelFilter;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use cogito_ingest::cli::{Cli, Commands};
use cogito_ingest::core::validation::{content_type_for_filename, sanitize_filename, validate_upload, validate_video_url};
use cogito_ingest::core::{config, init_logger, log_pipeline_configuration, metrics, ContentType, Tier};
use cogito_ingest::ingest::{
    BatchItem, BufferConfig, BufferError, BufferKey, DebouncedBuffer, DispatchSink, Dispatcher, DispatcherConfig,
    DocumentStatus, FixedTier, JobQueue,
};
use cogito_ingest::processing::{RoutingProcessor, TextFileProcessor};
use cogito_ingest::storage::{create_pool, Document, DocumentStore, SqliteDocumentStore, SqliteJobJournal};
use cogito_ingest::telegram::{LogNotifier, Notifier, TelegramNotifier};

/// How often `ingest` and `recover` check whether the queue drained
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Documents listed after an ingest run
const REPORT_LIMIT: usize = 50;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Load environment variables from .env if present
    let _ = dotenv();

    let level = if cli.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    init_logger(&config::LOG_FILE_PATH, level)?;
    metrics::init_metrics();

    match cli.command {
        Commands::Ingest {
            owner,
            tier,
            paths,
            links,
        } => run_ingest(owner, tier, paths, links).await,
        Commands::Status { document_id, json } => run_status(document_id, json).await,
        Commands::Recover => run_recover().await,
        Commands::Retry { document_id, tier } => run_retry(document_id, tier).await,
        Commands::Metrics => {
            print!("{}", metrics::gather_metrics());
            Ok(())
        }
    }
}

/// Everything a command needs to run the pipeline against the configured database
struct Pipeline {
    store: Arc<SqliteDocumentStore>,
    dispatcher: Arc<Dispatcher>,
}

fn build_pipeline() -> Result<Pipeline> {
    log_pipeline_configuration();

    let pool = create_pool(&config::DATABASE_PATH).context("Failed to create database pool")?;
    let store = Arc::new(SqliteDocumentStore::new(pool.clone()));
    let queue = Arc::new(JobQueue::with_journal(
        *config::queue::MAX_QUEUE_SIZE,
        Arc::new(SqliteJobJournal::new(pool)),
    ));

    // Photo OCR and video transcription run in separate services
    let processor = RoutingProcessor::new().route(ContentType::File, Arc::new(TextFileProcessor));

    let notifier: Arc<dyn Notifier> = if config::BOT_TOKEN.is_empty() {
        Arc::new(LogNotifier)
    } else {
        Arc::new(TelegramNotifier::from_env().context("Failed to create Bot API client")?)
    };

    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        queue,
        Arc::new(processor),
        notifier,
        DispatcherConfig::from_env()?,
    ));
    Ok(Pipeline { store, dispatcher })
}

/// Waits until no job is queued or leased, or until Ctrl+C.
async fn wait_until_idle(dispatcher: &Dispatcher) {
    loop {
        if dispatcher.queue().is_idle().await {
            return;
        }
        tokio::select! {
            _ = signal::ctrl_c() => {
                log::warn!("Interrupted, {} job(s) left in the journal", dispatcher.queue().size().await);
                return;
            }
            _ = tokio::time::sleep(IDLE_POLL_INTERVAL) => {}
        }
    }
}

async fn run_ingest(owner_id: i64, tier: String, paths: Vec<String>, links: Vec<String>) -> Result<()> {
    let pipeline = build_pipeline()?;
    let dispatcher = pipeline.dispatcher.clone();
    dispatcher.recover().await?;

    let shutdown = CancellationToken::new();
    let workers = dispatcher.start(shutdown.clone());

    let resolved_tier = Tier::from_str(&tier).unwrap_or_else(|e| {
        log::warn!("{}, falling back to {}", e, Tier::default());
        Tier::default()
    });
    let sink = Arc::new(DispatchSink::new(dispatcher.clone(), Arc::new(FixedTier(resolved_tier))));
    let buffer = DebouncedBuffer::new(BufferConfig::from_env()?, sink);

    let mut keys = Vec::new();
    for path in &paths {
        let name = Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .map(sanitize_filename)
            .unwrap_or_else(|| path.clone());
        let Some(content_type) = content_type_for_filename(&name) else {
            log::warn!("Skipping {}: unsupported file type", path);
            continue;
        };
        let size = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("Cannot read {}", path))?
            .len();
        if let Err(e) = validate_upload(content_type, &name, size) {
            log::warn!("Skipping {}: {}", path, e);
            continue;
        }

        let key = BufferKey::new(owner_id, content_type);
        match buffer.start_cycle(key).await {
            Ok(()) => keys.push(key),
            Err(BufferError::AlreadyWaiting) => {}
            Err(e) => return Err(e.into()),
        }
        buffer.add(key, BatchItem::new(name, path.clone())).await?;
    }
    // No more uploads coming: skip the debounce window
    for key in keys {
        buffer.flush(key).await?;
    }

    for link in &links {
        match validate_video_url(link) {
            Ok(url) => {
                let title = url.host_str().unwrap_or("video").to_string();
                dispatcher
                    .submit_single(owner_id, ContentType::Video, BatchItem::new(title, url.as_str()), &tier)
                    .await?;
            }
            Err(e) => log::warn!("Skipping link: {}", e),
        }
    }

    wait_until_idle(&dispatcher).await;
    workers.shutdown().await;

    for doc in pipeline.store.documents_for_owner(owner_id, REPORT_LIMIT).await? {
        print_document(&doc);
    }
    Ok(())
}

async fn run_status(document_id: i64, json: bool) -> Result<()> {
    let pool = create_pool(&config::DATABASE_PATH).context("Failed to create database pool")?;
    let doc = SqliteDocumentStore::new(pool).get(document_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else {
        print_document(&doc);
    }
    Ok(())
}

async fn run_recover() -> Result<()> {
    let pipeline = build_pipeline()?;
    let dispatcher = pipeline.dispatcher;

    let recovered = dispatcher.recover().await?;
    if recovered == 0 {
        println!("Nothing to recover");
        return Ok(());
    }

    let workers = dispatcher.start(CancellationToken::new());
    wait_until_idle(&dispatcher).await;
    workers.shutdown().await;
    println!("Recovered and processed {} job(s)", recovered);
    Ok(())
}

async fn run_retry(document_id: i64, tier: String) -> Result<()> {
    let pipeline = build_pipeline()?;
    let dispatcher = pipeline.dispatcher;

    // Journaled jobs first, so a pending document that still has one is not queued twice
    dispatcher.recover().await?;
    let doc = pipeline.store.get(document_id).await?;
    let job_id = match doc.status {
        DocumentStatus::Pending => dispatcher.resubmit_pending(document_id, &tier).await?,
        _ => dispatcher.resubmit_failed(document_id, &tier).await?,
    };
    let workers = dispatcher.start(CancellationToken::new());
    wait_until_idle(&dispatcher).await;
    workers.shutdown().await;

    if let Some(status) = dispatcher.job_status(job_id).await? {
        println!("{}", serde_json::to_string(&status)?);
    }
    Ok(())
}

fn print_document(doc: &Document) {
    println!(
        "#{} [{}] {} \"{}\" ({}%)",
        doc.id,
        doc.status,
        doc.content_type,
        doc.filename,
        doc.status.progress()
    );
    if let Some(error) = &doc.error_message {
        println!("    error: {}", error);
    }
    if let Some(result) = &doc.result {
        let preview: String = result.chars().take(120).collect();
        println!("    text: {}", preview.replace('\n', " "));
    }
}
