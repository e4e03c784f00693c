//! Telegram-facing side of the pipeline: user notifications

pub mod notifications;

// Re-exports for convenience
pub use notifications::{LogNotifier, Notifier, TelegramNotifier};
