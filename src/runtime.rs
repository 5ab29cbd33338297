//! AWS Lambda custom runtime interface
//!
//! A Rust deployment ships as a custom runtime, so the binary owns the
//! runtime loop: long-poll the next invocation, run the handler, report
//! the invocation outcome. The loop runs until the platform freezes or
//! terminates the process.
//!
//! A malformed event cannot be answered through the callback (no URL is
//! available), so it is reported to the runtime as an invocation error,
//! like a failed callback delivery.

use tracing::{error, info};

use crate::event::ResourceEvent;
use crate::handler;
use crate::resolver::ImageCatalog;
use crate::response::{CallbackTransport, Notifier};
use crate::{Error, Result};

/// Runtime interface version prefix of every endpoint path
pub const RUNTIME_API_VERSION: &str = "2018-06-01";

/// One invocation fetched from the runtime queue
#[derive(Clone, Debug)]
pub struct Invocation {
    /// Invocation id, echoed when reporting the outcome
    pub request_id: String,
    /// Raw JSON event payload
    pub body: String,
}

/// Client for the runtime interface endpoints
pub struct RuntimeClient {
    base: String,
    client: reqwest::Client,
}

impl RuntimeClient {
    /// Build a client against `AWS_LAMBDA_RUNTIME_API`
    pub fn from_env() -> Result<Self> {
        let api = std::env::var("AWS_LAMBDA_RUNTIME_API").map_err(|_| {
            Error::configuration(
                "AWS_LAMBDA_RUNTIME_API is unset; not running under a Lambda runtime",
            )
        })?;
        Ok(Self::new(api))
    }

    /// Build a client against an explicit `host:port` runtime address
    pub fn new(api: impl Into<String>) -> Self {
        Self {
            base: format!("http://{}/{}/runtime", api.into(), RUNTIME_API_VERSION),
            client: reqwest::Client::new(),
        }
    }

    /// Long-poll for the next invocation
    pub async fn next_invocation(&self) -> Result<Invocation> {
        let response = self
            .client
            .get(format!("{}/invocation/next", self.base))
            .send()
            .await
            .map_err(|e| Error::runtime(format!("polling for the next invocation failed: {e}")))?;

        let request_id = response
            .headers()
            .get("lambda-runtime-aws-request-id")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| Error::runtime("invocation is missing the request id header"))?;

        let body = response
            .text()
            .await
            .map_err(|e| Error::runtime(format!("invocation payload unreadable: {e}")))?;

        Ok(Invocation { request_id, body })
    }

    /// Report a successful invocation
    pub async fn invocation_response(
        &self,
        request_id: &str,
        payload: &serde_json::Value,
    ) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/invocation/{}/response", self.base, request_id))
            .json(payload)
            .send()
            .await
            .map_err(|e| Error::runtime(format!("reporting invocation success failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::runtime(format!(
                "runtime rejected the invocation response: {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Report a failed invocation
    pub async fn invocation_error(&self, request_id: &str, invocation_error: &Error) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/invocation/{}/error", self.base, request_id))
            .json(&error_document(invocation_error))
            .send()
            .await
            .map_err(|e| Error::runtime(format!("reporting invocation error failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::runtime(format!(
                "runtime rejected the invocation error: {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Error document shape the runtime expects
fn error_document(error: &Error) -> serde_json::Value {
    serde_json::json!({
        "errorMessage": error.to_string(),
        "errorType": error.kind(),
    })
}

/// Run the invocation loop until the environment terminates the process
///
/// Runtime interface failures propagate out so the process exits and the
/// platform replaces it; handler failures are reported per invocation and
/// the loop continues.
pub async fn run<C, T>(catalog: &C, notifier: &Notifier<T>) -> Result<()>
where
    C: ImageCatalog + ?Sized,
    T: CallbackTransport,
{
    let client = RuntimeClient::from_env()?;
    info!("runtime loop started");

    loop {
        let invocation = client.next_invocation().await?;
        info!(request = %invocation.request_id, "invocation received");

        let outcome = match serde_json::from_str::<ResourceEvent>(&invocation.body) {
            Ok(event) => handler::handle_event(&event, catalog, notifier).await,
            Err(e) => Err(Error::malformed_event(format!(
                "event did not deserialize: {e}"
            ))),
        };

        match outcome {
            Ok(()) => {
                client
                    .invocation_response(
                        &invocation.request_id,
                        &serde_json::json!({ "message": "stack response delivered" }),
                    )
                    .await?;
            }
            Err(e) => {
                error!(request = %invocation.request_id, error = %e, "invocation failed");
                client.invocation_error(&invocation.request_id, &e).await?;
            }
        }
    }
}
