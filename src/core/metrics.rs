//! Metrics collection for the ingestion pipeline using Prometheus
//!
//! This module provides a centralized metrics registry for tracking:
//! - Buffer behaviour (flush triggers, batch sizes)
//! - Queue health (depth per priority band, wait time)
//! - Job outcomes (completed/failed, retries, processing duration)

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram, register_histogram_vec, CounterVec,
    Encoder, Gauge, GaugeVec, Histogram, HistogramVec, TextEncoder,
};

use crate::core::types::{ContentType, Priority};

// ======================
// BUFFER METRICS
// ======================

lazy_static! {
    /// Buffer flushes by content type and trigger
    /// Labels: content_type (photo/file/video), trigger (size/timeout/manual)
    pub static ref BUFFER_FLUSHES_TOTAL: CounterVec = register_counter_vec!(
        "cogito_buffer_flushes_total",
        "Total number of buffer flushes handed to the dispatcher",
        &["content_type", "trigger"]
    )
    .unwrap();

    /// Number of items per flushed batch
    pub static ref BATCH_SIZE: Histogram = register_histogram!(
        "cogito_batch_size",
        "Number of items in each flushed batch",
        vec![1.0, 2.0, 3.0, 5.0, 8.0, 10.0, 20.0]
    )
    .unwrap();

    /// Cycles cancelled without dispatch
    /// Labels: content_type
    pub static ref BUFFER_CANCELLED_TOTAL: CounterVec = register_counter_vec!(
        "cogito_buffer_cancelled_total",
        "Total number of buffer cycles cancelled without dispatch",
        &["content_type"]
    )
    .unwrap();
}

// ======================
// QUEUE METRICS
// ======================

lazy_static! {
    /// Ready jobs per priority band
    /// Labels: priority (0..4)
    pub static ref QUEUE_DEPTH: GaugeVec = register_gauge_vec!(
        "cogito_queue_depth",
        "Number of ready jobs per priority band",
        &["priority"]
    )
    .unwrap();

    /// Total ready jobs
    pub static ref QUEUE_DEPTH_TOTAL: Gauge = register_gauge!(
        "cogito_queue_depth_total",
        "Total number of ready jobs"
    )
    .unwrap();

    /// Time from enqueue to first delivery
    /// Labels: priority
    pub static ref QUEUE_WAIT_TIME_SECONDS: HistogramVec = register_histogram_vec!(
        "cogito_queue_wait_time_seconds",
        "Time jobs spend waiting in the queue before delivery",
        &["priority"],
        vec![0.1, 1.0, 5.0, 30.0, 60.0, 300.0, 1800.0]
    )
    .unwrap();
}

// ======================
// JOB METRICS
// ======================

lazy_static! {
    /// Terminal job outcomes
    /// Labels: content_type, status (completed/failed)
    pub static ref JOB_OUTCOMES_TOTAL: CounterVec = register_counter_vec!(
        "cogito_job_outcomes_total",
        "Total number of jobs that reached a terminal state",
        &["content_type", "status"]
    )
    .unwrap();

    /// Retries by attempt number
    /// Labels: attempt
    pub static ref TASK_RETRIES_TOTAL: CounterVec = register_counter_vec!(
        "cogito_task_retries_total",
        "Total number of job retries by attempt number",
        &["attempt"]
    )
    .unwrap();

    /// Content processor duration
    /// Labels: content_type
    pub static ref PROCESSING_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "cogito_processing_duration_seconds",
        "Time spent in the content processor per delivery",
        &["content_type"],
        vec![0.05, 0.25, 1.0, 5.0, 15.0, 60.0, 300.0]
    )
    .unwrap();
}

/// Initialize metrics (call this at startup to register all metrics)
pub fn init_metrics() {
    log::info!("Initializing metrics registry...");

    let _ = &*BUFFER_FLUSHES_TOTAL;
    let _ = &*BATCH_SIZE;
    let _ = &*BUFFER_CANCELLED_TOTAL;
    let _ = &*QUEUE_DEPTH;
    let _ = &*QUEUE_DEPTH_TOTAL;
    let _ = &*QUEUE_WAIT_TIME_SECONDS;
    let _ = &*JOB_OUTCOMES_TOTAL;
    let _ = &*TASK_RETRIES_TOTAL;
    let _ = &*PROCESSING_DURATION_SECONDS;

    // Pre-create label combinations so they show up with 0 values
    for ct in ContentType::ALL {
        for trigger in ["size", "timeout", "manual"] {
            BUFFER_FLUSHES_TOTAL.with_label_values(&[ct.as_str(), trigger]);
        }
        JOB_OUTCOMES_TOTAL.with_label_values(&[ct.as_str(), "completed"]);
        JOB_OUTCOMES_TOTAL.with_label_values(&[ct.as_str(), "failed"]);
    }
    for band in 0..Priority::BANDS {
        QUEUE_DEPTH.with_label_values(&[&band.to_string()]);
    }

    log::info!("Metrics registry initialized successfully");
}

/// Renders every registered collector in the Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        log::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Helper function to record a buffer flush
pub fn record_flush(content_type: ContentType, trigger: &str, items: usize) {
    BUFFER_FLUSHES_TOTAL
        .with_label_values(&[content_type.as_str(), trigger])
        .inc();
    BATCH_SIZE.observe(items as f64);
}

/// Helper function to record a cancelled cycle
pub fn record_cancel(content_type: ContentType) {
    BUFFER_CANCELLED_TOTAL.with_label_values(&[content_type.as_str()]).inc();
}

/// Helper function to update queue depth for one band
pub fn update_queue_depth(priority: Priority, depth: usize) {
    QUEUE_DEPTH
        .with_label_values(&[&priority.to_string()])
        .set(depth as f64);
}

/// Helper function to update total queue depth
pub fn update_queue_depth_total(depth: usize) {
    QUEUE_DEPTH_TOTAL.set(depth as f64);
}

pub fn record_queue_wait(priority: Priority, seconds: f64) {
    QUEUE_WAIT_TIME_SECONDS
        .with_label_values(&[&priority.to_string()])
        .observe(seconds.max(0.0));
}

/// Helper function to record a terminal job outcome
pub fn record_job_outcome(content_type: ContentType, status: &str) {
    JOB_OUTCOMES_TOTAL
        .with_label_values(&[content_type.as_str(), status])
        .inc();
}

pub fn record_retry(attempt: u32) {
    TASK_RETRIES_TOTAL.with_label_values(&[&attempt.to_string()]).inc();
}

/// Starts a processing timer; the duration is observed when the timer drops
pub fn start_processing_timer(content_type: ContentType) -> prometheus::HistogramTimer {
    PROCESSING_DURATION_SECONDS
        .with_label_values(&[content_type.as_str()])
        .start_timer()
}
