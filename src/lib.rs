//! cfn-ami-lookup - CloudFormation custom resource for latest-AMI resolution
//!
//! Given a target architecture, the handler queries the EC2 image catalog,
//! selects the most recent non-prerelease Amazon Linux image, and reports
//! the result back to CloudFormation through the pre-signed callback URL
//! supplied with the request.
//!
//! Control flow per invocation: event received → (Delete? acknowledge
//! success) | (resolve image → notify result or failure). Exactly one
//! callback is delivered either way; a delivery failure is the one error
//! that escapes to the hosting runtime.
//!
//! # Modules
//!
//! - [`event`] - Custom resource invocation event types
//! - [`resolver`] - Architecture mapping, catalog seam, selection policy
//! - [`response`] - Callback envelope construction and delivery
//! - [`handler`] - The invocation state machine
//! - [`runtime`] - Lambda custom runtime interface loop
//! - [`error`] - Error types for the handler

#![deny(missing_docs)]

pub mod error;
pub mod event;
pub mod handler;
pub mod resolver;
pub mod response;
pub mod runtime;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
