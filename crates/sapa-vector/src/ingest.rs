//! Loading of pre-embedded chunks produced by the ingestion collaborator.
//!
//! The chunk file is JSON Lines: one `DocumentChunk` object per line. Blank
//! lines are skipped. The whole file is parsed before anything is upserted,
//! so a malformed line leaves the index unchanged.

use std::io::BufRead;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use sapa_core::error::SapaError;
use sapa_core::types::{DocumentChunk, Language};

use crate::index::SemanticIndex;

/// Summary of a chunk-file load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub chunks: usize,
    pub english: usize,
    pub vietnamese: usize,
}

/// Parse chunks from a JSON Lines reader.
pub fn read_chunks(reader: impl BufRead) -> Result<Vec<DocumentChunk>, SapaError> {
    let mut chunks = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let chunk: DocumentChunk = serde_json::from_str(&line).map_err(|e| {
            SapaError::Index(format!("chunk file line {}: {}", n + 1, e))
        })?;
        chunks.push(chunk);
    }
    Ok(chunks)
}

/// Load a chunk file into `index` in a single batch upsert.
pub fn load_chunk_file(index: &SemanticIndex, path: &Path) -> Result<IngestReport, SapaError> {
    let file = std::fs::File::open(path)?;
    let chunks = read_chunks(std::io::BufReader::new(file))?;

    let report = IngestReport {
        chunks: chunks.len(),
        english: chunks.iter().filter(|c| c.language == Language::English).count(),
        vietnamese: chunks
            .iter()
            .filter(|c| c.language == Language::Vietnamese)
            .count(),
    };

    index.upsert(chunks)?;
    info!(
        path = %path.display(),
        chunks = report.chunks,
        english = report.english,
        vietnamese = report.vietnamese,
        "Chunk file loaded"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use crate::index::DistanceMetric;

    fn line(id: &str, language: &str, embedding: &[f32]) -> String {
        serde_json::json!({
            "id": id,
            "text": format!("text {}", id),
            "language": language,
            "source": "data/raw/food.txt",
            "category": "food",
            "embedding": embedding,
        })
        .to_string()
    }

    #[test]
    fn test_load_chunk_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", line("a", "english", &[1.0, 0.0])).unwrap();
        writeln!(file).unwrap();
        writeln!(file, "{}", line("b", "vietnamese", &[0.0, 1.0])).unwrap();
        writeln!(file, "{}", line("c", "vietnamese", &[0.5, 0.5])).unwrap();

        let index = SemanticIndex::new();
        index.ensure_created(2, DistanceMetric::Cosine).unwrap();
        let report = load_chunk_file(&index, file.path()).unwrap();

        assert_eq!(
            report,
            IngestReport {
                chunks: 3,
                english: 1,
                vietnamese: 2
            }
        );
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_malformed_line_names_line_number() {
        let input = format!("{}\nnot json\n", line("a", "english", &[1.0]));
        let err = read_chunks(input.as_bytes()).unwrap_err();
        assert!(matches!(err, SapaError::Index(_)));
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_wrong_dimension_leaves_index_empty() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", line("a", "english", &[1.0, 0.0])).unwrap();
        writeln!(file, "{}", line("b", "english", &[1.0, 0.0, 0.0])).unwrap();

        let index = SemanticIndex::new();
        index.ensure_created(2, DistanceMetric::Cosine).unwrap();
        assert!(load_chunk_file(&index, file.path()).is_err());
        assert!(index.is_empty());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let index = SemanticIndex::new();
        let err = load_chunk_file(&index, Path::new("/nonexistent/chunks.jsonl")).unwrap_err();
        assert!(matches!(err, SapaError::Io(_)));
    }
}
