// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use arrow_schema::ArrowError;
use snafu::{Location, Snafu};

type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Allocates error on the heap and then places `e` into it.
#[inline]
pub fn box_error(e: impl std::error::Error + Send + Sync + 'static) -> BoxedError {
    Box::new(e)
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Invalid user input: {source}, {location}"))]
    InvalidInput {
        source: BoxedError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Encountered corrupt file {path}: {source}, {location}"))]
    CorruptFile {
        path: object_store::path::Path,
        source: BoxedError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Schema violation: {message}, {location}"))]
    SchemaViolation {
        message: String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Primary index inconsistency: {message}, {location}"))]
    Index {
        message: String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Memory budget exceeded: {message}, {location}"))]
    ResourceExhausted {
        message: String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Encountered internal error. {message}, {location}"))]
    Internal {
        message: String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("A prerequisite task failed: {message}, {location}"))]
    PrerequisiteFailed {
        message: String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Arrow error: {message}, {location}"))]
    Arrow {
        message: String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Not found: {uri}, {location}"))]
    NotFound {
        uri: String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("IO error: {source}, {location}"))]
    IO {
        source: BoxedError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Cloned error: {message}, {location}"))]
    Cloned {
        message: String,
        #[snafu(implicit)]
        location: Location,
    },
}

impl Error {
    pub fn corrupt_file(
        path: object_store::path::Path,
        message: impl Into<String>,
        location: Location,
    ) -> Self {
        let message: String = message.into();
        Self::CorruptFile {
            path,
            source: message.into(),
            location,
        }
    }

    pub fn invalid_input(message: impl Into<String>, location: Location) -> Self {
        let message: String = message.into();
        Self::InvalidInput {
            source: message.into(),
            location,
        }
    }

    pub fn io(message: impl Into<String>, location: Location) -> Self {
        let message: String = message.into();
        Self::IO {
            source: message.into(),
            location,
        }
    }

    pub fn schema_violation(message: impl Into<String>, location: Location) -> Self {
        Self::SchemaViolation {
            message: message.into(),
            location,
        }
    }

    pub fn index(message: impl Into<String>, location: Location) -> Self {
        Self::Index {
            message: message.into(),
            location,
        }
    }

    pub fn internal(message: impl Into<String>, location: Location) -> Self {
        Self::Internal {
            message: message.into(),
            location,
        }
    }

    pub fn prerequisite_failed(message: impl Into<String>, location: Location) -> Self {
        Self::PrerequisiteFailed {
            message: message.into(),
            location,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<ArrowError> for Error {
    #[track_caller]
    fn from(e: ArrowError) -> Self {
        match e {
            ArrowError::ExternalError(err) => match err.downcast::<Self>() {
                Ok(err) => *err,
                Err(err) => Self::Arrow {
                    message: err.to_string(),
                    location: std::panic::Location::caller().to_snafu_location(),
                },
            },
            e => Self::Arrow {
                message: e.to_string(),
                location: std::panic::Location::caller().to_snafu_location(),
            },
        }
    }
}

impl From<std::io::Error> for Error {
    #[track_caller]
    fn from(e: std::io::Error) -> Self {
        Self::IO {
            source: box_error(e),
            location: std::panic::Location::caller().to_snafu_location(),
        }
    }
}

impl From<object_store::Error> for Error {
    #[track_caller]
    fn from(e: object_store::Error) -> Self {
        let location = std::panic::Location::caller().to_snafu_location();
        match e {
            object_store::Error::NotFound { path, .. } => Self::NotFound {
                uri: path,
                location,
            },
            e => Self::IO {
                source: box_error(e),
                location,
            },
        }
    }
}

impl From<object_store::path::Error> for Error {
    #[track_caller]
    fn from(e: object_store::path::Error) -> Self {
        Self::InvalidInput {
            source: box_error(e),
            location: std::panic::Location::caller().to_snafu_location(),
        }
    }
}

impl From<serde_json::Error> for Error {
    #[track_caller]
    fn from(e: serde_json::Error) -> Self {
        use serde_json::error::Category;
        let location = std::panic::Location::caller().to_snafu_location();
        match e.classify() {
            Category::Io => Self::IO {
                source: box_error(e),
                location,
            },
            Category::Data | Category::Syntax | Category::Eof => Self::InvalidInput {
                source: box_error(e),
                location,
            },
        }
    }
}

impl From<Error> for ArrowError {
    fn from(value: Error) -> Self {
        Self::ExternalError(Box::new(value))
    }
}

// Some object_store functions only accept Stream<Result<T, ObjectStoreError>>,
// so fault-injection policies need to surface through the store's own error type.
impl From<Error> for object_store::Error {
    fn from(err: Error) -> Self {
        Self::Generic {
            store: "pkupdate",
            source: Box::new(err),
        }
    }
}

trait ToSnafuLocation {
    fn to_snafu_location(&'static self) -> snafu::Location;
}

impl ToSnafuLocation for std::panic::Location<'static> {
    fn to_snafu_location(&'static self) -> snafu::Location {
        snafu::Location::new(self.file(), self.line(), self.column())
    }
}

/// Wrap an error in a new error type that implements Clone
///
/// This is useful when a failure has to be reported more than once, e.g. a
/// failed load that is replayed to later callers. Clones only keep the
/// rendered message; the cause is lost.
pub struct CloneableError(pub Error);

impl Clone for CloneableError {
    #[track_caller]
    fn clone(&self) -> Self {
        Self(Error::Cloned {
            message: self.0.to_string(),
            location: std::panic::Location::caller().to_snafu_location(),
        })
    }
}

impl std::fmt::Debug for CloneableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
