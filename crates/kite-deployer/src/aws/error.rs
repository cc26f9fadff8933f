//! AWS error classification and handling
//!
//! Provides typed errors for AWS SDK operations using the `.code()` method
//! instead of string matching on Debug format. The one deliberate substring
//! check — CloudFormation's "stack does not exist" ValidationError — lives
//! in [`stack_not_exist`] and nowhere else.

use thiserror::Error;

/// AWS error categories for retry and teardown logic
#[derive(Debug, Error)]
pub enum AwsError {
    /// Resource no longer exists (success when the goal is deletion)
    #[error("resource not found: {resource_type} {resource_id:?}")]
    NotFound {
        resource_type: &'static str,
        resource_id: String,
    },

    /// Resource already exists (safe to ignore in create operations)
    #[error("resource already exists")]
    AlreadyExists,

    /// Rate limit exceeded (retryable with backoff)
    #[error("rate limit exceeded")]
    Throttled,

    /// Resource has dependent objects (retryable, e.g. SG with attached ENI)
    #[error("resource has dependent objects")]
    DependencyViolation,

    /// A stack reached a failing terminal while a non-failing one was
    /// expected; carries the last human-readable status reason.
    #[error("stack {stack_id} reached {status} while waiting for {desired}: {reason}")]
    StackTerminalUnexpected {
        stack_id: String,
        status: String,
        desired: String,
        reason: String,
    },

    /// Deadline, caller stop, or OS signal ended the operation.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Generic AWS SDK error with code and message
    #[error("AWS error: {message}")]
    Sdk {
        code: Option<String>,
        message: String,
    },
}

impl AwsError {
    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, AwsError::NotFound { .. })
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(self, AwsError::Throttled | AwsError::DependencyViolation)
    }

    /// Check if this is an "already exists" error
    pub fn is_already_exists(&self) -> bool {
        matches!(self, AwsError::AlreadyExists)
    }
}

/// Known AWS error codes for "not found" conditions
const NOT_FOUND_CODES: &[&str] = &[
    "InvalidInstanceID.NotFound",
    "InvalidGroup.NotFound",
    "InvalidKeyPair.NotFound",
    "InvalidVpcID.NotFound",
    "NoSuchBucket",
    "NoSuchKey",
    "NoSuchEntity",
    "NoSuchLifecycleConfiguration",
    "LoadBalancerNotFound",
    "TargetGroupNotFound",
    "ListenerNotFound",
    "InvalidDocument",
];

/// Known AWS error codes for "already exists" conditions
const ALREADY_EXISTS_CODES: &[&str] = &[
    "InvalidPermission.Duplicate",
    "InvalidGroup.Duplicate",
    "InvalidKeyPair.Duplicate",
    "EntityAlreadyExists",
    "AlreadyExistsException",
    "BucketAlreadyOwnedByYou",
    "DuplicateLoadBalancerName",
    "DuplicateTargetGroupName",
];

/// Known AWS error codes for throttling/rate limiting
const THROTTLING_CODES: &[&str] = &["Throttling", "ThrottlingException", "RequestLimitExceeded"];

/// Known AWS error codes for dependency violations (resource still in use)
const DEPENDENCY_CODES: &[&str] = &["DependencyViolation", "ResourceInUse"];

/// Classify an AWS SDK error using the error code.
pub fn classify_aws_error(code: Option<&str>, message: Option<&str>) -> AwsError {
    let message = message.unwrap_or("unknown error").to_string();

    match code {
        Some(c) if NOT_FOUND_CODES.contains(&c) => AwsError::NotFound {
            resource_type: "resource",
            resource_id: message.clone(),
        },
        Some(c) if ALREADY_EXISTS_CODES.contains(&c) => AwsError::AlreadyExists,
        Some(c) if THROTTLING_CODES.contains(&c) => AwsError::Throttled,
        Some(c) if DEPENDENCY_CODES.contains(&c) => AwsError::DependencyViolation,
        _ => AwsError::Sdk {
            code: code.map(|s| s.to_string()),
            message,
        },
    }
}

/// Classify an error from an anyhow::Error by extracting the AWS error code.
///
/// Walks the error chain using `ProvideErrorMetadata` to extract `.code()`
/// and `.message()` from any AWS SDK service error. Falls back to extracting
/// a code from the Debug representation if no typed error is found.
pub fn classify_anyhow_error(error: &anyhow::Error) -> AwsError {
    for cause in error.chain() {
        if let Some(meta) = provide_metadata(cause) {
            return classify_aws_error(meta.0.as_deref(), meta.1.as_deref());
        }
    }

    let debug_str = format!("{:?}", error);
    if let Some(code) = extract_error_code(&debug_str) {
        return classify_aws_error(Some(&code), Some(&debug_str));
    }

    AwsError::Sdk {
        code: None,
        message: error.to_string(),
    }
}

/// Pull `(code, message)` out of any AWS service error in the chain.
fn provide_metadata(cause: &(dyn std::error::Error + 'static)) -> Option<(Option<String>, Option<String>)> {
    use aws_sdk_cloudformation::error::ProvideErrorMetadata;

    macro_rules! try_unhandled {
        ($ty:ty) => {
            if let Some(e) = cause.downcast_ref::<$ty>() {
                let meta = ProvideErrorMetadata::meta(e);
                return Some((
                    meta.code().map(str::to_string),
                    meta.message().map(str::to_string),
                ));
            }
        };
    }

    // Service-level error metadata containers cover every operation of the
    // respective service.
    try_unhandled!(aws_sdk_cloudformation::Error);
    try_unhandled!(aws_sdk_ec2::Error);
    try_unhandled!(aws_sdk_s3::Error);
    try_unhandled!(aws_sdk_ssm::Error);
    try_unhandled!(aws_sdk_elasticloadbalancingv2::Error);
    None
}

/// All known AWS error codes for extraction from debug strings (flat list)
const ALL_KNOWN_CODES: &[&str] = &[
    "InvalidInstanceID.NotFound",
    "InvalidGroup.NotFound",
    "InvalidKeyPair.NotFound",
    "InvalidVpcID.NotFound",
    "NoSuchBucket",
    "NoSuchKey",
    "NoSuchEntity",
    "NoSuchLifecycleConfiguration",
    "LoadBalancerNotFound",
    "TargetGroupNotFound",
    "ListenerNotFound",
    "InvalidDocument",
    "InvalidPermission.Duplicate",
    "InvalidGroup.Duplicate",
    "InvalidKeyPair.Duplicate",
    "EntityAlreadyExists",
    "AlreadyExistsException",
    "BucketAlreadyOwnedByYou",
    "DuplicateLoadBalancerName",
    "DuplicateTargetGroupName",
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "DependencyViolation",
    "ResourceInUse",
    "ValidationError",
];

/// Extract an AWS error code from a debug string representation
fn extract_error_code(debug_str: &str) -> Option<String> {
    for code in ALL_KNOWN_CODES {
        if debug_str.contains(code) {
            return Some((*code).to_string());
        }
    }

    // Try to extract any code from `code: Some("...")` pattern
    if let Some(start) = debug_str.find("code: Some(\"") {
        let rest = &debug_str[start + 12..];
        if let Some(end) = rest.find('"') {
            return Some(rest[..end].to_string());
        }
    }

    None
}

/// True when a DescribeStacks error means the stack has already been
/// deleted. CloudFormation reports this as a ValidationError whose message
/// ends in "does not exist"; there is no dedicated code.
pub fn stack_not_exist(error: &anyhow::Error) -> bool {
    let classified = classify_anyhow_error(error);
    let (code, message) = match &classified {
        AwsError::Sdk { code, message } => (code.as_deref(), message.as_str()),
        _ => return false,
    };
    code == Some("ValidationError") && message.contains("does not exist")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_codes() {
        for code in NOT_FOUND_CODES {
            let err = classify_aws_error(Some(code), Some("some message"));
            assert!(err.is_not_found(), "expected NotFound for code: {code}");
        }
    }

    #[test]
    fn already_exists_codes() {
        for code in ALREADY_EXISTS_CODES {
            let err = classify_aws_error(Some(code), Some("msg"));
            assert!(
                err.is_already_exists(),
                "expected AlreadyExists for code: {code}"
            );
        }
    }

    #[test]
    fn throttling_and_dependency_are_retryable() {
        for code in THROTTLING_CODES {
            let err = classify_aws_error(Some(code), Some("msg"));
            assert!(err.is_retryable(), "expected retryable for code: {code}");
        }
        let err = classify_aws_error(Some("DependencyViolation"), Some("ENI attached"));
        assert!(err.is_retryable());
    }

    #[test]
    fn unknown_and_missing_codes() {
        let err = classify_aws_error(Some("SomeNewError"), Some("details"));
        assert!(matches!(err, AwsError::Sdk { .. }));

        let err2 = classify_aws_error(None, Some("something failed"));
        assert!(matches!(err2, AwsError::Sdk { code: None, .. }));
    }

    #[test]
    fn extract_known_codes_from_debug_string() {
        for code in ALL_KNOWN_CODES {
            let debug_str = format!("SdkError {{ code: Some(\"{code}\"), message: \"fail\" }}");
            assert!(
                extract_error_code(&debug_str).is_some(),
                "failed to extract any code from string containing: {code}"
            );
        }
    }

    #[test]
    fn extract_code_from_code_field() {
        let debug_str = r#"SdkError { code: Some("SomeRandomCode"), message: "fail" }"#;
        assert_eq!(
            extract_error_code(debug_str).as_deref(),
            Some("SomeRandomCode")
        );
        assert!(extract_error_code("connection refused").is_none());
    }

    #[test]
    fn stack_not_exist_requires_validation_error() {
        let gone = anyhow::anyhow!(
            "SdkError {{ code: Some(\"ValidationError\"), message: \"Stack with id x does not exist\" }}"
        );
        assert!(stack_not_exist(&gone));

        let other = anyhow::anyhow!(
            "SdkError {{ code: Some(\"ValidationError\"), message: \"template malformed\" }}"
        );
        assert!(!stack_not_exist(&other));

        let unrelated = anyhow::anyhow!("connection refused");
        assert!(!stack_not_exist(&unrelated));
    }

    #[test]
    fn cancelled_and_terminal_render_context() {
        let err = AwsError::StackTerminalUnexpected {
            stack_id: "arn:stack/x".into(),
            status: "ROLLBACK_COMPLETE".into(),
            desired: "CREATE_COMPLETE".into(),
            reason: "resource creation cancelled".into(),
        };
        let s = err.to_string();
        assert!(s.contains("ROLLBACK_COMPLETE"));
        assert!(s.contains("CREATE_COMPLETE"));
        assert!(s.contains("resource creation cancelled"));
    }
}
