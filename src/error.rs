use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Access of a time index below the oldest retained one.
    TooOld,
    /// A terminate-style signal was observed while waiting.
    Interrupted,
    /// A follower could not locate leader metadata for its segment.
    FollowerWithoutLeader,
    /// A segment's metadata or backing file is absent.
    NotFound,
    /// The operation is not available for this element type or flavor.
    NotSupported,
    Usage,
    Corrupt,
    Internal,
    Io,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    segment: Option<String>,
    timeindex: Option<i64>,
    oldest: Option<i64>,
    path: Option<PathBuf>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            segment: None,
            timeindex: None,
            oldest: None,
            path: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn segment(&self) -> Option<&str> {
        self.segment.as_deref()
    }

    pub fn timeindex(&self) -> Option<i64> {
        self.timeindex
    }

    pub fn oldest(&self) -> Option<i64> {
        self.oldest
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_segment(mut self, segment: impl Into<String>) -> Self {
        self.segment = Some(segment.into());
        self
    }

    pub fn with_timeindex(mut self, timeindex: i64) -> Self {
        self.timeindex = Some(timeindex);
        self
    }

    pub fn with_oldest(mut self, oldest: i64) -> Self {
        self.oldest = Some(oldest);
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(segment) = &self.segment {
            write!(f, " (segment: {segment})")?;
        }
        if let Some(timeindex) = self.timeindex {
            write!(f, " (timeindex: {timeindex})")?;
        }
        if let Some(oldest) = self.oldest {
            write!(f, " (oldest: {oldest})")?;
        }
        if let Some(path) = &self.path {
            write!(f, " (path: {})", path.display())?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}
