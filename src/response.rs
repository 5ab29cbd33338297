//! Callback envelope construction and delivery
//!
//! CloudFormation hands every custom resource event a pre-signed S3 URL;
//! the handler reports its outcome by PUTting a fixed-shape JSON envelope
//! there. Exactly one envelope is sent per invocation. Delivery goes
//! through the [`CallbackTransport`] seam so the state machine is testable
//! without a network.
//!
//! Wire quirk: the pre-signed URL was signed with an empty content type,
//! so the PUT must carry an empty `Content-Type` header and an explicit
//! `Content-Length`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::event::ResourceEvent;
use crate::{Error, Result};

/// Outcome reported to CloudFormation
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    /// The operation completed
    Success,
    /// The operation failed; the stack operation rolls back
    Failed,
}

/// Free-form data payload of the envelope
///
/// Carries the selected identifier on success or a diagnostic on failure;
/// empty (`{}`) for Delete acknowledgements.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ResultData {
    /// Selected image identifier
    #[serde(rename = "Id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Diagnostic message for a failed resolution
    #[serde(rename = "Error", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResultData {
    /// Empty payload (Delete acknowledgements)
    pub fn none() -> Self {
        Self::default()
    }

    /// Payload carrying a selected identifier
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Payload carrying a failure diagnostic
    pub fn with_error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// The fixed-shape JSON envelope CloudFormation expects
///
/// `StackId`, `RequestId`, and `LogicalResourceId` are echoed verbatim
/// from the invocation event.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct CallbackEnvelope {
    /// Reported outcome
    #[serde(rename = "Status")]
    pub status: ResponseStatus,

    /// Human-readable pointer at the diagnostic log location
    #[serde(rename = "Reason")]
    pub reason: String,

    /// Stable physical id of the resource across its lifecycle
    #[serde(rename = "PhysicalResourceId")]
    pub physical_resource_id: String,

    /// Echoed stack ARN
    #[serde(rename = "StackId")]
    pub stack_id: String,

    /// Echoed request id
    #[serde(rename = "RequestId")]
    pub request_id: String,

    /// Echoed template-local resource name
    #[serde(rename = "LogicalResourceId")]
    pub logical_resource_id: String,

    /// Result payload
    #[serde(rename = "Data")]
    pub data: ResultData,
}

/// Transport that delivers a serialized envelope to the callback URL
///
/// External collaborator: HTTPS in production, mocked in tests. A transport
/// error is terminal for the invocation; there is no retry.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CallbackTransport: Send + Sync {
    /// Deliver the body to the pre-signed URL
    ///
    /// # Arguments
    ///
    /// * `url` - Caller-supplied pre-signed callback URL
    /// * `body` - Serialized envelope
    async fn deliver(&self, url: &str, body: String) -> Result<()>;
}

/// HTTPS transport implementing the pre-signed-URL PUT contract
#[derive(Clone, Debug, Default)]
pub struct HttpCallbackTransport {
    client: reqwest::Client,
}

impl HttpCallbackTransport {
    /// Create a transport with a fresh HTTP client
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CallbackTransport for HttpCallbackTransport {
    async fn deliver(&self, url: &str, body: String) -> Result<()> {
        let response = self
            .client
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, "")
            .header(reqwest::header::CONTENT_LENGTH, body.len())
            .body(body)
            .send()
            .await
            .map_err(|e| Error::callback(format!("PUT to callback URL failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::callback(format!(
                "callback URL rejected the response: {status}"
            )));
        }
        debug!(status = %status, "callback accepted");
        Ok(())
    }
}

/// Packages result payloads into envelopes and delivers them
pub struct Notifier<T: CallbackTransport> {
    transport: T,
    log_stream: Option<String>,
}

impl<T: CallbackTransport> Notifier<T> {
    /// Create a notifier over the given transport
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            log_stream: None,
        }
    }

    /// Name of the hosting log stream, used for `Reason` and
    /// `PhysicalResourceId`
    pub fn with_log_stream(mut self, log_stream: impl Into<String>) -> Self {
        self.log_stream = Some(log_stream.into());
        self
    }

    /// Build the envelope for an event without sending it
    pub fn envelope(
        &self,
        event: &ResourceEvent,
        status: ResponseStatus,
        data: ResultData,
    ) -> CallbackEnvelope {
        let reason = match &self.log_stream {
            Some(stream) => format!("See the details in CloudWatch Log Stream: {stream}"),
            None => "See the details in the handler log".to_string(),
        };
        // Without a log stream (local one-shot runs) the request id is the
        // only stable identifier available.
        let physical_resource_id = self
            .log_stream
            .clone()
            .unwrap_or_else(|| event.request_id.clone());

        CallbackEnvelope {
            status,
            reason,
            physical_resource_id,
            stack_id: event.stack_id.clone(),
            request_id: event.request_id.clone(),
            logical_resource_id: event.logical_resource_id.clone(),
            data,
        }
    }

    /// Serialize the envelope and deliver it to the event's callback URL
    ///
    /// This is the single notification of the invocation; a delivery
    /// failure is terminal.
    pub async fn notify(
        &self,
        event: &ResourceEvent,
        status: ResponseStatus,
        data: ResultData,
    ) -> Result<()> {
        let envelope = self.envelope(event, status, data);
        let body = serde_json::to_string(&envelope)
            .map_err(|e| Error::serialization(format!("envelope serialization failed: {e}")))?;

        debug!(body = %body, "response body");
        self.transport.deliver(&event.response_url, body).await?;
        info!(status = ?envelope.status, url = %event.response_url, "stack response delivered");
        Ok(())
    }
}
