use crate::error::ServiceError;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// Converts text into fixed-length vectors.
#[async_trait]
pub trait Embedder {
    /// Identifies the model so a persisted index can be matched against the query-time model.
    fn model_name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError>;
}

/// Produces a single text completion for a prompt.
#[async_trait]
pub trait LanguageModel {
    fn model_name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String, ServiceError>;
}

/// Runs a collaborator call, failing with `ServiceError::Timeout` once `after` elapses.
pub(crate) async fn bounded<T, F>(service: &str, after: Duration, call: F) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    match tokio::time::timeout(after, call).await {
        Ok(result) => result,
        Err(_) => Err(ServiceError::Timeout {
            service: service.to_string(),
            after,
        }),
    }
}

#[async_trait]
impl<T> Embedder for Box<T>
where
    T: Embedder + Send + Sync + ?Sized,
{
    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        (**self).embed(text).await
    }
}
