//! Error types for the AMI lookup handler

use thiserror::Error;

/// Main error type for handler operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Catalog query error (transport, auth, or permission failure)
    #[error("catalog query failed: {0}")]
    Catalog(String),

    /// No image satisfied the filter and selection policy
    #[error("no qualifying image: {0}")]
    NoQualifyingImage(String),

    /// Callback delivery error; terminal for the invocation
    #[error("callback delivery failed: {0}")]
    Callback(String),

    /// Invocation event could not be understood
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// Missing or invalid platform-injected configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Lambda runtime interface error
    #[error("runtime interface error: {0}")]
    Runtime(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a catalog error with the given message
    pub fn catalog(msg: impl Into<String>) -> Self {
        Self::Catalog(msg.into())
    }

    /// Create a no-qualifying-image error with the given message
    pub fn no_qualifying_image(msg: impl Into<String>) -> Self {
        Self::NoQualifyingImage(msg.into())
    }

    /// Create a callback delivery error with the given message
    pub fn callback(msg: impl Into<String>) -> Self {
        Self::Callback(msg.into())
    }

    /// Create a malformed-event error with the given message
    pub fn malformed_event(msg: impl Into<String>) -> Self {
        Self::MalformedEvent(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a runtime interface error with the given message
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Short category name, used as the `errorType` of a runtime error document
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Catalog(_) => "Catalog",
            Self::NoQualifyingImage(_) => "NoQualifyingImage",
            Self::Callback(_) => "Callback",
            Self::MalformedEvent(_) => "MalformedEvent",
            Self::Configuration(_) => "Configuration",
            Self::Runtime(_) => "Runtime",
            Self::Serialization(_) => "Serialization",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Story Tests: Error Propagation in a Handler Invocation
    // ==========================================================================
    //
    // Each error category has a distinct fate: catalog and selection errors
    // are reported in the FAILED callback, callback errors kill the
    // invocation, and malformed events can only be reported to the runtime.

    /// Story: a failed DescribeImages call becomes a FAILED callback
    ///
    /// Transport, auth, and permission failures all surface through the same
    /// catalog variant; the handler never retries them.
    #[test]
    fn story_catalog_failures_carry_a_diagnostic() {
        let err = Error::catalog("DescribeImages returned 403: not authorized");
        assert!(err.to_string().contains("catalog query failed"));
        assert!(err.to_string().contains("403"));

        match Error::catalog("any message") {
            Error::Catalog(msg) => assert_eq!(msg, "any message"),
            _ => panic!("Expected Catalog variant"),
        }
    }

    /// Story: unknown architecture and empty result set are the same failure
    ///
    /// Both manifest as an empty filtered result; the handler reports them
    /// identically as a FAILED status with a diagnostic.
    #[test]
    fn story_missing_images_and_unknown_tags_collapse() {
        let unknown = Error::no_qualifying_image("unknown architecture tag: ARM64");
        let empty =
            Error::no_qualifying_image("no image matched pattern amzn-ami-hvm*.x86_64-gp2");

        assert!(unknown.to_string().contains("no qualifying image"));
        assert!(empty.to_string().contains("no qualifying image"));
        assert_eq!(unknown.kind(), empty.kind());
    }

    /// Story: a failed callback PUT is terminal
    ///
    /// Once delivery fails there is no further channel to CloudFormation;
    /// the error propagates to the hosting runtime as an invocation error.
    #[test]
    fn story_callback_failure_is_terminal() {
        let err = Error::callback("PUT returned 403 SignatureDoesNotMatch");
        assert!(err.to_string().contains("callback delivery failed"));
        assert_eq!(err.kind(), "Callback");
    }

    /// Story: error constructors accept both String and &str
    #[test]
    fn story_error_construction_ergonomics() {
        let arch = "HVMG2";
        let err = Error::no_qualifying_image(format!("no image for {arch}"));
        assert!(err.to_string().contains("HVMG2"));

        let err = Error::configuration("AWS_SECRET_ACCESS_KEY is unset");
        assert!(err.to_string().contains("AWS_SECRET_ACCESS_KEY"));
    }

    /// Story: kinds are stable strings for the runtime error document
    #[test]
    fn story_kinds_name_every_variant() {
        let errors = [
            Error::catalog("x"),
            Error::no_qualifying_image("x"),
            Error::callback("x"),
            Error::malformed_event("x"),
            Error::configuration("x"),
            Error::runtime("x"),
            Error::serialization("x"),
        ];
        let kinds: Vec<_> = errors.iter().map(Error::kind).collect();
        assert_eq!(
            kinds,
            [
                "Catalog",
                "NoQualifyingImage",
                "Callback",
                "MalformedEvent",
                "Configuration",
                "Runtime",
                "Serialization",
            ]
        );
    }
}
