use bytes::Bytes;
use tokio::sync::mpsc;

/// Where a session's raw stream comes from.
#[derive(Debug)]
pub enum InputSource {
    /// The worker pulls the stream itself (e.g. an `rtmp://` URL served by
    /// an external RTMP server).
    Locator(String),
    /// Bytes pushed by the publisher, piped to each worker's stdin. The
    /// receiver outlives individual workers.
    Stream(mpsc::Receiver<Bytes>),
}

impl InputSource {
    /// Value bound to `{input}` in the command template.
    pub fn binding(&self) -> InputBinding<'_> {
        match self {
            InputSource::Locator(locator) => InputBinding::Locator(locator),
            InputSource::Stream(_) => InputBinding::Pipe,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InputSource::Locator(_) => "locator",
            InputSource::Stream(_) => "stream",
        }
    }
}

/// How a worker receives its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputBinding<'a> {
    Locator(&'a str),
    Pipe,
}

impl InputBinding<'_> {
    pub fn as_arg(&self) -> &str {
        match self {
            InputBinding::Locator(locator) => locator,
            InputBinding::Pipe => "pipe:0",
        }
    }
}
