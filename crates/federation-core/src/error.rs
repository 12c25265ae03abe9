//! The closed error taxonomy every federation component surfaces through.
//!
//! `spark-core::error` splits a stable code from a free-form message and an
//! optional cause chain so that logging, alerting, and retry policy can all
//! key off the code without parsing strings. `FederationError` follows the
//! same split, but with a closed `ErrorCode` enum instead of `&'static str`
//! codes: the wire-level taxonomy in the spec is a fixed, closed set, so an
//! enum lets the compiler check exhaustiveness at every match site.

use std::error::Error as StdError;
use std::fmt;

/// The closed error codes a federation component may return, matching the
/// taxonomy every component surfaces through messages or return values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ErrorCode {
    #[error("addressed node id does not match the local node")]
    P2PNodeDoesNotMatchFault,
    #[error("addressed node instance does not match the routed target")]
    RoutingNodeDoesNotMatchFault,

    #[error("this replica is not the voter-store primary")]
    NotPrimary,
    #[error("this replica is not yet ready to serve the voter store")]
    NotReady,
    #[error("the write's check_sequence no longer matches the committed sequence")]
    StoreWriteConflict,
    #[error("a configuration change is already in progress")]
    UpdatePending,
    #[error("not enough live secondaries acknowledged to form a write quorum")]
    NoWriteQuorum,
    #[error("the request's view of cluster state is stale")]
    StaleRequest,
    #[error("the entity already exists")]
    AlreadyExists,

    #[error("the operation was canceled")]
    OperationCanceled,
    #[error("the operation timed out")]
    Timeout,
    #[error("the object has already been closed")]
    ObjectClosed,
    #[error("the configuration is invalid")]
    InvalidConfiguration,

    #[error("no endpoint was found for the requested actor")]
    EndpointNotFound,
    #[error("the service communication layer could not connect")]
    ServiceCommunicationCannotConnect,

    #[error("the address is already in use")]
    AddressAlreadyInUse,
    #[error("the address is invalid")]
    InvalidAddress,
    #[error("an argument was invalid")]
    InvalidArgument,
    #[error("the message exceeds the maximum allowed size")]
    MessageTooLarge,
    #[error("the service is too busy to accept the request")]
    ServiceTooBusy,

    #[error("the receiver does not recognize the message for its actor")]
    InvalidMessage,
}

/// Drives automatic retry/backoff policy the way `spark-core::ErrorCategory`
/// drives its pipeline's default handlers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transient network failure; the caller's async operation should retry
    /// within its overall timeout.
    Retryable,
    /// A stale view of cluster state; the caller should refresh routing
    /// state from the reply and re-route.
    RoutingStale,
    /// A semantic rejection that the caller (or its read-modify-write
    /// helper) must handle explicitly; bare reads/writes do not auto-retry.
    Semantic,
    /// Fatal: surfaced with no retry, all pending requests on the context
    /// complete with this error.
    Fatal,
}

impl ErrorCode {
    /// Maps a code to its handling category. Every arm is listed explicitly
    /// (spec §7's four buckets) rather than falling back to a default, so a
    /// newly added variant forces a decision here.
    pub const fn category(self) -> ErrorCategory {
        use ErrorCode::*;
        match self {
            Timeout | ServiceCommunicationCannotConnect | ServiceTooBusy => {
                ErrorCategory::Retryable
            }
            P2PNodeDoesNotMatchFault | RoutingNodeDoesNotMatchFault => ErrorCategory::RoutingStale,
            NotPrimary | NotReady | StoreWriteConflict | UpdatePending | NoWriteQuorum
            | StaleRequest | AlreadyExists | EndpointNotFound | InvalidMessage => {
                ErrorCategory::Semantic
            }
            OperationCanceled | ObjectClosed | InvalidConfiguration | AddressAlreadyInUse
            | InvalidAddress | InvalidArgument | MessageTooLarge => ErrorCategory::Fatal,
        }
    }
}

/// Boxed cause chain, kept `Send + Sync + 'static` so errors cross task
/// boundaries freely.
pub type ErrorCause = Box<dyn StdError + Send + Sync + 'static>;

/// The error type returned by every federation component.
#[derive(Debug)]
pub struct FederationError {
    code: ErrorCode,
    message: String,
    cause: Option<ErrorCause>,
}

impl FederationError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    /// Builds from just the code, using the code's own `Display` as the
    /// message. Convenient at call sites that have no extra context to add.
    pub fn from_code(code: ErrorCode) -> Self {
        let message = code.to_string();
        Self {
            code,
            message,
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl StdError + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Retryable)
    }
}

impl fmt::Display for FederationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message)
    }
}

impl StdError for FederationError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn StdError + 'static))
    }
}

impl From<ErrorCode> for FederationError {
    fn from(code: ErrorCode) -> Self {
        FederationError::from_code(code)
    }
}

/// Crate-wide result alias, mirroring `spark_core::Result`.
pub type Result<T, E = FederationError> = std::result::Result<T, E>;
