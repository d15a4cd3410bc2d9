use crate::{Document, IngestError};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// Resolves files and folders into upload-ordered documents.
///
/// Files are taken as given; folders contribute their PDFs recursively in path order.
pub fn collect_documents(inputs: &[PathBuf]) -> Result<Vec<Document>, IngestError> {
    let mut documents = Vec::new();

    for input in inputs {
        let files = if input.is_dir() {
            discover_pdf_files(input)
        } else {
            vec![input.clone()]
        };

        for path in files {
            debug!(path = %path.display(), "reading document");
            documents.push(Document::from_path(&path)?);
        }
    }

    if documents.is_empty() {
        return Err(IngestError::NoDocuments);
    }

    Ok(documents)
}
