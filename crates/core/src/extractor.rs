use crate::error::IngestError;
use crate::models::{CorpusText, Document};
use lopdf::Document as PdfDocument;
use tracing::{debug, info};

/// Text of a single page. `None` when the page has no decodable text layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub number: u32,
    pub text: Option<String>,
}

pub trait PdfExtractor {
    /// Extracts every page of one PDF in document order.
    ///
    /// Fails only when the bytes are not a readable PDF; individual pages
    /// without text come back as `PageText { text: None, .. }`.
    fn extract_pages(&self, name: &str, bytes: &[u8]) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, name: &str, bytes: &[u8]) -> Result<Vec<PageText>, IngestError> {
        let document =
            PdfDocument::load_mem(bytes).map_err(|error| IngestError::MalformedDocument {
                name: name.to_string(),
                reason: error.to_string(),
            })?;

        let pages = document
            .get_pages()
            .into_keys()
            .map(|page_no| {
                let text = match document.extract_text(&[page_no]) {
                    Ok(text) if !text.trim().is_empty() => Some(text),
                    Ok(_) => None,
                    Err(error) => {
                        debug!(document = name, page = page_no, %error, "page text not decodable");
                        None
                    }
                };
                PageText {
                    number: page_no,
                    text,
                }
            })
            .collect();

        Ok(pages)
    }
}

/// Concatenates the page text of all documents in order. Page boundaries are not kept.
pub fn extract_corpus<X>(extractor: &X, documents: &[Document]) -> Result<CorpusText, IngestError>
where
    X: PdfExtractor + ?Sized,
{
    let mut corpus = CorpusText::default();

    for document in documents {
        let pages = extractor.extract_pages(&document.name, &document.bytes)?;
        let skipped = pages.iter().filter(|page| page.text.is_none()).count();

        info!(
            document = %document.name,
            pages = pages.len(),
            skipped_pages = skipped,
            "extracted pdf text"
        );

        corpus.pages_total += pages.len();
        corpus.pages_skipped += skipped;
        for text in pages.into_iter().filter_map(|page| page.text) {
            corpus.text.push_str(&text);
        }
    }

    Ok(corpus)
}


#[cfg(test)]
mod tests {
    use super::fixtures::pdf_with_pages;
    use super::*;

    #[test]
    fn pages_without_text_are_skipped_not_fatal() -> Result<(), Box<dyn std::error::Error>> {
        let documents = vec![
            Document::new("first.pdf", pdf_with_pages(&[Some("Alpha page."), None])),
            Document::new("second.pdf", pdf_with_pages(&[None, Some("Omega page.")])),
        ];

        let corpus = extract_corpus(&LopdfExtractor, &documents)?;

        assert_eq!(corpus.pages_total, 4);
        assert_eq!(corpus.pages_skipped, 2);
        let alpha = corpus.text.find("Alpha").expect("first document text present");
        let omega = corpus.text.find("Omega").expect("second document text present");
        assert!(alpha < omega, "upload order must be kept");
        Ok(())
    }

    #[test]
    fn invalid_pdf_is_reported_as_malformed() {
        let documents = vec![
            Document::new("good.pdf", pdf_with_pages(&[Some("Readable.")])),
            Document::new("broken.pdf", b"%PDF-1.4\n%broken".to_vec()),
        ];

        let result = extract_corpus(&LopdfExtractor, &documents);

        match result {
            Err(IngestError::MalformedDocument { name, .. }) => assert_eq!(name, "broken.pdf"),
            other => panic!("expected malformed document error, got {other:?}"),
        }
    }

    #[test]
    fn image_only_document_yields_empty_corpus_text() -> Result<(), Box<dyn std::error::Error>> {
        let documents = vec![Document::new("scan.pdf", pdf_with_pages(&[None, None]))];

        let corpus = extract_corpus(&LopdfExtractor, &documents)?;

        assert!(!corpus.has_content());
        assert_eq!(corpus.pages_skipped, 2);
        Ok(())
    }
}
