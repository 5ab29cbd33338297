//! Custom resource invocation event types
//!
//! CloudFormation delivers custom resource lifecycle events as JSON objects
//! with PascalCase field names. The types here mirror that wire shape and
//! tolerate fields we do not consume (`ServiceToken`, `ResourceType`, ...).
//!
//! The architecture tag stays a raw string at this layer: an unrecognized
//! tag must surface as a resolution failure reported through the callback,
//! never as a deserialization error that would leave the stack hanging.

use serde::{Deserialize, Serialize};

/// Lifecycle operation requested by CloudFormation
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum RequestType {
    /// Resource is being created
    Create,
    /// Resource is being updated in place
    Update,
    /// Resource is being removed from the stack
    Delete,
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "Create"),
            Self::Update => write!(f, "Update"),
            Self::Delete => write!(f, "Delete"),
        }
    }
}

/// Caller-supplied properties of the custom resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ResourceProperties {
    /// Target CPU/virtualization architecture tag (e.g. "HVM64")
    #[serde(rename = "Architecture", default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,

    /// Region whose image catalog should be queried
    #[serde(rename = "Region", default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// A custom resource invocation event
///
/// `stack_id`, `request_id`, and `logical_resource_id` are correlation
/// identifiers that must be echoed verbatim in the callback envelope.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ResourceEvent {
    /// Requested lifecycle operation
    #[serde(rename = "RequestType")]
    pub request_type: RequestType,

    /// Pre-signed URL the result envelope must be PUT to
    #[serde(rename = "ResponseURL")]
    pub response_url: String,

    /// ARN of the owning stack
    #[serde(rename = "StackId")]
    pub stack_id: String,

    /// Unique id of this request
    #[serde(rename = "RequestId")]
    pub request_id: String,

    /// Template-local name of the resource
    #[serde(rename = "LogicalResourceId")]
    pub logical_resource_id: String,

    /// Resource properties; absent on some Delete events
    #[serde(rename = "ResourceProperties", default)]
    pub resource_properties: ResourceProperties,
}
