// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Errors reported by the publisher and the subscriber.
//!
//! All operations in this crate return [Error][crate::Error]. The error
//! carries a kind, which applications can query with the `is_*()`
//! predicates, and an optional source with more details.

pub use gax::error::rpc;

use rpc::Status;
use std::error::Error as StdError;

type BoxError = Box<dyn StdError + Send + Sync>;

/// The core error returned by all operations in this crate.
///
/// # Example
/// ```
/// # use pubsub_core::Error;
/// fn handle(e: &Error) {
///     if e.is_closed() {
///         println!("the publisher was stopped, no more messages are accepted");
///     } else if let Some(status) = e.status() {
///         println!("the service rejected the request: {status:?}");
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: Option<BoxError>,
}

impl Error {
    /// Creates an error with the status returned by the service.
    ///
    /// Transport implementations use this to report errors decoded from the
    /// service responses.
    pub fn service(status: Status) -> Self {
        Self {
            kind: ErrorKind::Service(Box::new(status)),
            source: None,
        }
    }

    /// Creates an error representing an I/O problem talking to the service.
    ///
    /// The request may or may not have reached the service.
    pub fn io<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Io,
            source: Some(source.into()),
        }
    }

    /// The operation did not complete before its deadline.
    pub fn timeout<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Timeout,
            source: Some(source.into()),
        }
    }

    /// The operation was cancelled before it completed.
    pub fn cancelled<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Cancelled,
            source: Some(source.into()),
        }
    }

    /// A message handler failed while processing a message.
    pub fn handler<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Handler,
            source: Some(source.into()),
        }
    }

    /// The publisher or the subscriber no longer accepts work.
    pub fn closed<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Closed,
            source: Some(source.into()),
        }
    }

    /// A previous batch for this ordering key failed, and publishing on the
    /// key is paused until the application resumes it.
    pub fn ordering_key_paused<T: Into<String>>(ordering_key: T) -> Self {
        Self {
            kind: ErrorKind::OrderingKeyPaused(ordering_key.into()),
            source: None,
        }
    }

    /// The status returned by the service, if any.
    pub fn status(&self) -> Option<&Status> {
        match &self.kind {
            ErrorKind::Service(s) => Some(s.as_ref()),
            _ => None,
        }
    }

    /// The error was returned by the service or the transport could not
    /// complete the request.
    pub fn is_transport(&self) -> bool {
        matches!(self.kind, ErrorKind::Service(_) | ErrorKind::Io)
    }

    /// The request could not reach the service.
    pub fn is_io(&self) -> bool {
        matches!(self.kind, ErrorKind::Io)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    pub fn is_handler(&self) -> bool {
        matches!(self.kind, ErrorKind::Handler)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.kind, ErrorKind::Closed)
    }

    pub fn is_ordering_key_paused(&self) -> bool {
        matches!(self.kind, ErrorKind::OrderingKeyPaused(_))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.kind, &self.source) {
            (ErrorKind::Service(s), _) => write!(
                f,
                "the service reports an error with code {} described as: {}",
                s.code, s.message
            ),
            (ErrorKind::Io, Some(e)) => {
                write!(f, "cannot send the request to the service: {e}")
            }
            (ErrorKind::Timeout, Some(e)) => {
                write!(f, "the operation did not complete in time: {e}")
            }
            (ErrorKind::Cancelled, Some(e)) => write!(f, "the operation was cancelled: {e}"),
            (ErrorKind::Handler, Some(e)) => write!(f, "the message handler failed: {e}"),
            (ErrorKind::Closed, Some(e)) => write!(f, "no longer accepting work: {e}"),
            (ErrorKind::OrderingKeyPaused(key), _) => write!(
                f,
                "publishing on ordering key {key:?} is paused after a failed batch"
            ),
            (_, None) => unreachable!("no constructor allows this"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &dyn StdError)
    }
}

#[derive(Debug)]
enum ErrorKind {
    Service(Box<Status>),
    Io,
    Timeout,
    Cancelled,
    Handler,
    Closed,
    OrderingKeyPaused(String),
}
