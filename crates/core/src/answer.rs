use crate::error::SearchError;
use crate::models::{Answer, TextChunk, DEFAULT_FALLBACK_ANSWER};
use crate::traits::{bounded, LanguageModel};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SynthesisOptions {
    pub fallback_answer: String,
    pub timeout: Duration,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            fallback_answer: DEFAULT_FALLBACK_ANSWER.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Renders the grounding prompt for `question` over `chunks`.
pub fn build_prompt(question: &str, chunks: &[TextChunk], fallback_answer: &str) -> String {
    let context = chunks
        .iter()
        .map(|chunk| chunk.text.trim())
        .collect::<Vec<_>>()
        .join("\n\n");

    let question = question.trim();

    format!(
        "Answer the question as thoroughly as possible using only the provided context.\n\
         Rules:\n\
         1. Base every statement strictly on the context below. Do not use outside knowledge.\n\
         2. If the context does not contain the answer, do not guess. \
         Reply with exactly this sentence and nothing else: \"{fallback_answer}\"\n\
         3. Never invent facts, figures, names or sources that the context does not support. \
         Accuracy matters more than completeness.\n\
         \n\
         Context:\n{context}\n\
         \n\
         Question:\n{question}\n\
         \n\
         Answer:\n"
    )
}

/// Asks the model once and returns its completion verbatim.
///
/// Model failures surface as `SearchError::Synthesis` or `SearchError::Timeout`,
/// never as the fallback sentence.
pub async fn synthesize<L>(
    question: &str,
    chunks: Vec<TextChunk>,
    model: &L,
    options: &SynthesisOptions,
) -> Result<Answer, SearchError>
where
    L: LanguageModel + Sync + ?Sized,
{
    let prompt = build_prompt(question, &chunks, &options.fallback_answer);
    debug!(
        model = model.model_name(),
        context_chunks = chunks.len(),
        prompt_chars = prompt.len(),
        "invoking language model"
    );

    let text = bounded(model.model_name(), options.timeout, model.complete(&prompt))
        .await
        .map_err(SearchError::synthesis)?;

    Ok(Answer {
        text,
        context: chunks,
    })
}
