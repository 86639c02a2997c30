use crate::adapters::llm::Backend;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{} API error ({status}): {body}", .backend.vendor())]
    Api {
        backend: Backend,
        status: u16,
        body: String,
    },

    #[error("{} returned no choices", .backend.vendor())]
    EmptyResponse { backend: Backend },

    #[error("{} stream error: {message}", .backend.vendor())]
    Stream { backend: Backend, message: String },
}

/// Turns a non-success response into `BackendError::Api`, passing
/// successful ones through untouched.
pub(crate) async fn check_status(
    backend: Backend,
    response: reqwest::Response,
) -> Result<reqwest::Response, BackendError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Api {
        backend,
        status,
        body,
    })
}
