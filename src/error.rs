use thiserror::Error;

/// Errors raised while building or driving a computation graph.
///
/// Layer builders validate eagerly and fail before registering any node;
/// runtime failures surface from `feed_forward`/`feed_backward` and abort the
/// training loop, they are never retried here.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid layer or optimizer hyperparameters.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Declared shapes are incompatible, or an operation would produce a
    /// non-positive output dimension.
    #[error("shape error: {0}")]
    Shape(String),

    /// An operation was invoked before a required binding, or a graph-level
    /// invariant (single feeder, single cost) was violated.
    #[error("invalid graph state: {0}")]
    State(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    pub(crate) fn shape(msg: impl Into<String>) -> Self {
        Error::Shape(msg.into())
    }

    pub(crate) fn state(msg: impl Into<String>) -> Self {
        Error::State(msg.into())
    }
}
