//! Logging initialization and startup diagnostics

use anyhow::Result;
use simplelog::*;
use std::fs::File;

use crate::core::config;

/// Initialize logger for both console and file output
///
/// # Arguments
/// * `log_file_path` - Path to the log file
/// * `level` - Minimum level written to both sinks
pub fn init_logger(log_file_path: &str, level: LevelFilter) -> Result<()> {
    let log_file = File::create(log_file_path).map_err(|e| anyhow::anyhow!("Failed to create log file: {}", e))?;

    CombinedLogger::init(vec![
        TermLogger::new(level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto),
        WriteLogger::new(level, Config::default(), log_file),
    ])
    .map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;

    Ok(())
}

/// Logs the effective pipeline configuration at startup
pub fn log_pipeline_configuration() {
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("Ingestion pipeline configuration");
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("  database:        {}", config::DATABASE_PATH.as_str());
    log::info!(
        "  buffer:          max_items={} timeout={}s",
        *config::buffer::MAX_ITEMS,
        *config::buffer::TIMEOUT_SECS
    );
    log::info!(
        "  workers:         {} (max_retries={}, initial_delay={}ms)",
        *config::dispatcher::WORKER_CONCURRENCY,
        *config::dispatcher::MAX_RETRIES,
        *config::dispatcher::RETRY_INITIAL_DELAY_MS
    );
    log::info!("  queue capacity:  {}", *config::queue::MAX_QUEUE_SIZE);

    if config::BOT_TOKEN.is_empty() {
        log::warn!("⚠️  BOT_TOKEN is not set, notifications go to the log only");
    } else {
        log::info!("✅ BOT_TOKEN set, notifications go to {}", config::BOT_API_URL.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::NamedTempFile;

    #[test]
    fn test_init_logger_creates_log_file() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();

        // A second init in the same process fails, which is fine here
        let _ = init_logger(path, LevelFilter::Info);

        assert!(temp_file.path().exists());
    }

    #[test]
    fn test_init_logger_rejects_unwritable_path() {
        let result = init_logger("/nonexistent-dir/cogito/ingest.log", LevelFilter::Info);
        assert!(result.is_err());
    }
}
