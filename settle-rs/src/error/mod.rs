use std::fmt;

/// Boxed error returned by timeout hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors synthesized by this crate.
///
/// Caller error types opt in with `From<Error>`, so that a timeout or a
/// cancellation can surface through the same `Result` as the operation's own
/// failures. `Box<dyn std::error::Error + Send + Sync>` works out of the box.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A timer fired before the raced operation settled.
    #[error("{0}")]
    Timeout(String),
    /// A retry session was cancelled through its handle.
    #[error("{0}")]
    Cancelled(String),
}

impl Error {
    /// The error used when a timer fires without an explicit [`ErrorSpec`].
    pub fn timeout() -> Self {
        Error::Timeout("timeout".to_string())
    }

    /// The error used when a retry session is cancelled without an explicit error.
    pub fn cancelled() -> Self {
        Error::Cancelled("retry cancelled".to_string())
    }
}

/// Describes the error a timer produces when it fires.
///
/// The description is only turned into a concrete error when the timer
/// actually fires: a [`ErrorSpec::Factory`] is never invoked for a timer that
/// was cancelled first.
///
/// # Examples
/// ```
/// use settle_rs::error::{Error, ErrorSpec};
///
/// let spec: ErrorSpec<Error> = "upstream too slow".into();
/// assert_eq!(spec.resolve(), Error::Timeout("upstream too slow".to_string()));
///
/// let spec = ErrorSpec::factory(|| Error::Timeout("built lazily".to_string()));
/// assert_eq!(spec.resolve().to_string(), "built lazily");
/// ```
pub enum ErrorSpec<E> {
    /// A timeout error with the message `"timeout"`.
    Default,
    /// An already-built error, returned as-is.
    Literal(E),
    /// A timeout error carrying the given message.
    Message(String),
    /// A function building the error at fire time.
    Factory(Box<dyn FnOnce() -> E + Send>),
}

impl<E> ErrorSpec<E> {
    pub fn error(error: E) -> Self {
        ErrorSpec::Literal(error)
    }

    pub fn message(message: impl Into<String>) -> Self {
        ErrorSpec::Message(message.into())
    }

    pub fn factory<F>(factory: F) -> Self
    where
        F: FnOnce() -> E + Send + 'static,
    {
        ErrorSpec::Factory(Box::new(factory))
    }

    /// Builds the concrete error, consuming the description.
    pub fn resolve(self) -> E
    where
        E: From<Error>,
    {
        match self {
            ErrorSpec::Default => Error::timeout().into(),
            ErrorSpec::Literal(error) => error,
            ErrorSpec::Message(message) => Error::Timeout(message).into(),
            ErrorSpec::Factory(factory) => factory(),
        }
    }
}

impl<E> Default for ErrorSpec<E> {
    fn default() -> Self {
        ErrorSpec::Default
    }
}

impl<E> From<&str> for ErrorSpec<E> {
    fn from(message: &str) -> Self {
        ErrorSpec::Message(message.to_string())
    }
}

impl<E> From<String> for ErrorSpec<E> {
    fn from(message: String) -> Self {
        ErrorSpec::Message(message)
    }
}

impl<E: fmt::Debug> fmt::Debug for ErrorSpec<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSpec::Default => f.write_str("Default"),
            ErrorSpec::Literal(error) => f.debug_tuple("Literal").field(error).finish(),
            ErrorSpec::Message(message) => f.debug_tuple("Message").field(message).finish(),
            ErrorSpec::Factory(_) => f.write_str("Factory(<fn>)"),
        }
    }
}
