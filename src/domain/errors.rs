use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid pull request reference, expected a PR URL or owner/repo#number: {0}")]
    InvalidPullRequestReference(String),
}

/// Why an inbound event was not turned into a pull request target.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("no pull request reference found")]
    NoTargetFound,
    #[error("malformed pull request reference: {0}")]
    MalformedTarget(String),
    #[error("review requested from {requested:?}, configured actor is {expected}")]
    NotAddressedToActor {
        expected: String,
        requested: Option<String>,
    },
    #[error("event was authored by the acting identity")]
    SelfAuthored,
    #[error("unsupported event: {0}")]
    UnsupportedEvent(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReasoningError {
    #[error("reasoning engine timed out after {0:?}")]
    Timeout(Duration),
    #[error("reasoning engine rate limited: {0}")]
    RateLimited(String),
    #[error("reasoning engine failed: {0}")]
    UpstreamError(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("failed to write review comment: {0}")]
    WriteError(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("signature header is missing")]
    Missing,
    #[error("signature header is malformed: {0}")]
    Malformed(String),
    #[error("signature does not match payload")]
    Invalid,
}
