use async_trait::async_trait;

use crate::ingest::job::JobPayload;
use crate::processing::{ContentProcessor, ProcessingError};

/// Reads a UTF-8 text file from the local path in `payload_ref`.
#[derive(Debug, Default, Clone)]
pub struct TextFileProcessor;

#[async_trait]
impl ContentProcessor for TextFileProcessor {
    async fn process(&self, payload: &JobPayload) -> Result<String, ProcessingError> {
        let bytes = tokio::fs::read(&payload.payload_ref).await?;

        let text = String::from_utf8(bytes)
            .map_err(|_| ProcessingError::permanent(format!("{} is not valid UTF-8 text", payload.payload_ref)))?;

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ProcessingError::permanent(format!("{} contains no text", payload.payload_ref)));
        }

        log::debug!(
            "Extracted {} chars from document {}",
            trimmed.chars().count(),
            payload.document_id
        );
        Ok(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ContentType;
    use std::io::Write;

    fn payload_for(path: &str) -> JobPayload {
        JobPayload {
            document_id: 3,
            content_type: ContentType::File,
            priority: 2,
            payload_ref: path.to_string(),
            retry_count: 0,
        }
    }

    #[tokio::test]
    async fn test_reads_text_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "  meeting notes  ").unwrap();

        let text = TextFileProcessor
            .process(&payload_for(file.path().to_str().unwrap()))
            .await
            .unwrap();
        assert_eq!(text, "meeting notes");
    }

    #[tokio::test]
    async fn test_missing_file_is_permanent() {
        let err = TextFileProcessor
            .process(&payload_for("/definitely/not/here.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::Permanent(_)));
    }

    #[tokio::test]
    async fn test_binary_and_empty_files_are_permanent() {
        let mut binary = tempfile::NamedTempFile::new().unwrap();
        binary.write_all(&[0xff, 0xfe, 0x00]).unwrap();
        let err = TextFileProcessor
            .process(&payload_for(binary.path().to_str().unwrap()))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::Permanent(_)));

        let empty = tempfile::NamedTempFile::new().unwrap();
        let err = TextFileProcessor
            .process(&payload_for(empty.path().to_str().unwrap()))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::Permanent(_)));
    }
}
