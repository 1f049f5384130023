use std::any::Any;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::async_ref::AsyncRef;

/// The type-erased payload of a successful [`Present`].
pub type Value = Arc<dyn Any + Send + Sync>;

/// The reason a [`Present`] does not hold a value.
///
/// Failures are stored inside records and shared with every subscriber, so this type is cheap to
/// clone.
#[derive(Debug, Clone, Error)]
pub enum ComputationError {
    /// The computation returned an error.
    #[error("computation failed: {0:#}")]
    Failed(Arc<anyhow::Error>),
    /// The computation panicked. The attached string contains the panic message.
    #[error("computation panicked: {0}")]
    Panicked(Arc<str>),
    /// The computation was withdrawn before it started.
    #[error("computation canceled")]
    Canceled,
    /// The computation succeeded, but produced a value of a different type than requested.
    #[error("computation produced an unexpected value, expected `{0}`")]
    UnexpectedType(&'static str),
}

impl ComputationError {
    pub fn failed(err: impl Into<anyhow::Error>) -> Self {
        Self::Failed(Arc::new(err.into()))
    }

    /// Returns the original error of a [`Failed`](Self::Failed) computation.
    pub fn inner(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).into()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.as_str().into()
        } else {
            "unknown panic payload".into()
        };
        Self::Panicked(message)
    }
}

/// The realized outcome of a [`Future`](super::Future).
#[derive(Clone)]
pub enum Present {
    Success(Value),
    Failure(ComputationError),
    Canceled,
}

impl fmt::Debug for Present {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(_) => f.write_str("Success(..)"),
            Self::Failure(err) => f.debug_tuple("Failure").field(err).finish(),
            Self::Canceled => f.write_str("Canceled"),
        }
    }
}

impl Present {
    pub fn success<T: Any + Send + Sync>(value: T) -> Self {
        Self::Success(Arc::new(value))
    }

    pub fn failure(err: impl Into<anyhow::Error>) -> Self {
        Self::Failure(ComputationError::failed(err))
    }

    /// Converts the result of a fallible computation.
    pub fn from_result<T, E>(result: Result<T, E>) -> Self
    where
        T: Any + Send + Sync,
        E: Into<anyhow::Error>,
    {
        match result {
            Ok(value) => Self::success(value),
            Err(err) => Self::failure(err),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn downcast_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.value()?.downcast_ref()
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(self.value()?).downcast().ok()
    }

    /// The [`AsyncRef`] produced by an asynchronous future, if this is one.
    pub fn as_async_ref(&self) -> Option<&AsyncRef> {
        self.downcast_ref()
    }

    pub fn into_result(self) -> Result<Value, ComputationError> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failure(err) => Err(err),
            Self::Canceled => Err(ComputationError::Canceled),
        }
    }

    /// Converts into a typed result, failing if the value has a different type.
    pub fn into_typed<T: Any + Send + Sync>(self) -> Result<Arc<T>, ComputationError> {
        self.into_result()?
            .downcast()
            .map_err(|_| ComputationError::UnexpectedType(std::any::type_name::<T>()))
    }

    /// A short status tag for metrics.
    pub fn status(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::Failure(ComputationError::Panicked(_)) => "panicked",
            Self::Failure(_) => "failure",
            Self::Canceled => "canceled",
        }
    }
}
