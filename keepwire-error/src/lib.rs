// Copyright 2024 Cloudflare, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![warn(clippy::all)]
//! The error type shared by the keepwire crates.
//!
//! Errors are passed around boxed as [BError]. Each error carries a predefined
//! [ErrorType], where it came from ([ErrorSource]), an optional context string and an optional
//! cause, which allows a chain of errors to be displayed in one line.

pub use std::error::Error as ErrorTrait;
use std::borrow::Cow;
use std::fmt;
use std::result::Result as StdResult;

/// The boxed [Error], the desired way to pass [Error]
pub type BError = Box<Error>;
/// Syntax sugar for `std::Result<T, BError>`
pub type Result<T, E = BError> = StdResult<T, E>;

/// Context attached to an error, static strings are not allocated
pub type ErrorContext = Cow<'static, str>;

type Cause = Box<dyn ErrorTrait + Send + Sync>;

/// The struct that represents an error
#[derive(Debug)]
pub struct Error {
    /// the type of error
    pub etype: ErrorType,
    /// who caused the error: the remote peer or this side
    pub esource: ErrorSource,
    /// chain to the cause of this error
    pub cause: Option<Cause>,
    /// an arbitrary string that explains the context when the error happens
    pub context: Option<ErrorContext>,
}

/// The source of the error
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ErrorSource {
    /// The remote endpoint did something: closed the channel, sent an unexpected frame
    Remote,
    /// Our own logic or the local resource failed
    Local,
    /// Error source unknown or to be set
    Unset,
}

impl ErrorSource {
    /// for displaying the error source
    pub fn as_str(&self) -> &str {
        match self {
            Self::Remote => "Remote",
            Self::Local => "Local",
            Self::Unset => "",
        }
    }
}

/// Predefined type of errors
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrorType {
    // resource teardown
    DisposeError,
    DisposePanic,
    // stream adapter, capability violations
    StreamDisposed,
    ConnectionClosed,
    UnexpectedMessage,
    // IO on an established channel
    ReadError,
    WriteError,
    ReadCancelled,
    CloseTimedout,
    // configuration
    InvalidConfig,
    // other errors
    InternalError,
    // catch all
    UnknownError,
    /// Custom error with static string.
    /// Runtime generated strings belong in the context rather than the type.
    Custom(&'static str),
}

impl ErrorType {
    /// create a new type of error. Users should try to make `name` unique.
    pub const fn new(name: &'static str) -> Self {
        ErrorType::Custom(name)
    }

    /// for displaying the error type
    pub fn as_str(&self) -> &str {
        match self {
            ErrorType::DisposeError => "DisposeError",
            ErrorType::DisposePanic => "DisposePanic",
            ErrorType::StreamDisposed => "StreamDisposed",
            ErrorType::ConnectionClosed => "ConnectionClosed",
            ErrorType::UnexpectedMessage => "UnexpectedMessage",
            ErrorType::ReadError => "ReadError",
            ErrorType::WriteError => "WriteError",
            ErrorType::ReadCancelled => "ReadCancelled",
            ErrorType::CloseTimedout => "CloseTimedout",
            ErrorType::InvalidConfig => "InvalidConfig",
            ErrorType::InternalError => "InternalError",
            ErrorType::UnknownError => "UnknownError",
            ErrorType::Custom(s) => s,
        }
    }

    /// Whether this error means the caller used a stream it no longer may use.
    pub fn is_capability_violation(&self) -> bool {
        matches!(
            self,
            ErrorType::StreamDisposed | ErrorType::ConnectionClosed | ErrorType::UnexpectedMessage
        )
    }
}

impl Error {
    /// Simply create the error. See other functions that provide less verbose interfaces.
    #[inline]
    pub fn create(
        etype: ErrorType,
        esource: ErrorSource,
        context: Option<ErrorContext>,
        cause: Option<Cause>,
    ) -> BError {
        Box::new(Error {
            etype,
            esource,
            cause,
            context,
        })
    }

    /// Create an error with the given type
    #[inline]
    pub fn new(e: ErrorType) -> BError {
        Self::create(e, ErrorSource::Unset, None, None)
    }

    /// Create an error caused by the remote endpoint
    #[inline]
    pub fn new_remote(e: ErrorType) -> BError {
        Self::create(e, ErrorSource::Remote, None, None)
    }

    /// Create an error caused locally
    #[inline]
    pub fn new_local(e: ErrorType) -> BError {
        Self::create(e, ErrorSource::Local, None, None)
    }

    /// Create an error with the given type, a context string and the causing error.
    /// ```
    /// use keepwire_error::{Error, ErrorType, Result};
    ///
    /// fn close_socket() -> Result<()> {
    ///     Ok(())
    /// }
    /// fn dispose() -> Result<()> {
    ///     close_socket().map_err(|e| Error::because(ErrorType::DisposeError, "closing socket", e))
    /// }
    /// ```
    /// Only use `because()` when there is extra context that is not captured by
    /// the causing error itself.
    #[inline]
    pub fn because<S: Into<ErrorContext>, E: Into<Cause>>(
        e: ErrorType,
        context: S,
        cause: E,
    ) -> BError {
        Self::create(
            e,
            ErrorSource::Unset,
            Some(context.into()),
            Some(cause.into()),
        )
    }

    /// Short for Err(Self::because)
    #[inline]
    pub fn e_because<T, S: Into<ErrorContext>, E: Into<Cause>>(
        e: ErrorType,
        context: S,
        cause: E,
    ) -> Result<T> {
        Err(Self::because(e, context, cause))
    }

    /// Create an error with context but no direct causing error
    #[inline]
    pub fn explain<S: Into<ErrorContext>>(e: ErrorType, context: S) -> BError {
        Self::create(e, ErrorSource::Unset, Some(context.into()), None)
    }

    /// Short for Err(Self::explain)
    #[inline]
    pub fn e_explain<T, S: Into<ErrorContext>>(e: ErrorType, context: S) -> Result<T> {
        Err(Self::explain(e, context))
    }

    #[inline]
    pub fn err<T>(e: ErrorType) -> Result<T> {
        Err(Self::new(e))
    }

    pub fn etype(&self) -> &ErrorType {
        &self.etype
    }

    pub fn esource(&self) -> &ErrorSource {
        &self.esource
    }

    pub fn reason_str(&self) -> &str {
        self.etype.as_str()
    }

    pub fn context_str(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn into_remote(mut self: BError) -> BError {
        self.esource = ErrorSource::Remote;
        self
    }

    pub fn into_local(mut self: BError) -> BError {
        self.esource = ErrorSource::Local;
        self
    }

    pub fn into_err<T>(self: BError) -> Result<T> {
        Err(self)
    }

    pub fn set_cause<C: Into<Cause>>(&mut self, cause: C) {
        self.cause = Some(cause.into());
    }

    pub fn set_context<T: Into<ErrorContext>>(&mut self, context: T) {
        self.context = Some(context.into());
    }

    /// Wrap self into a new error of the same type and source with extra context
    pub fn more_context<T: Into<ErrorContext>>(self: BError, context: T) -> BError {
        let esource = self.esource;
        let mut e = Self::because(self.etype.clone(), context, self);
        e.esource = esource;
        e
    }

    // Display error but skip the elements repeated from the previous hop
    fn chain_display(&self, previous: Option<&Error>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if previous.map(|p| p.esource != self.esource).unwrap_or(true) {
            write!(f, "{}", self.esource.as_str())?
        }
        if previous.map(|p| p.etype != self.etype).unwrap_or(true) {
            write!(f, " {}", self.etype.as_str())?
        }

        if let Some(c) = self.context.as_ref() {
            write!(f, " context: {}", c)?;
        }
        match self.cause.as_ref() {
            Some(c) => match c.downcast_ref::<BError>() {
                Some(e) => {
                    write!(f, " cause: ")?;
                    e.chain_display(Some(self), f)
                }
                None => write!(f, " cause: {}", c),
            },
            None => Ok(()),
        }
    }

    /// Return the ErrorType of the root Error
    pub fn root_etype(&self) -> &ErrorType {
        self.cause.as_ref().map_or(&self.etype, |c| {
            c.downcast_ref::<BError>()
                .map_or(&self.etype, |e| e.root_etype())
        })
    }

    pub fn root_cause(&self) -> &(dyn ErrorTrait + Send + Sync + 'static) {
        self.cause.as_deref().map_or(self, |c| {
            c.downcast_ref::<BError>().map_or(c, |e| e.root_cause())
        })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.chain_display(None, f)
    }
}

impl ErrorTrait for Error {}

/// Helper trait to add more context to a given error
pub trait Context<T> {
    /// Wrap the `Err(E)` in [Result] with more context, the existing E will be the cause.
    fn err_context<C: Into<ErrorContext>, F: FnOnce() -> C>(self, context: F) -> Result<T>;
}

impl<T> Context<T> for Result<T, BError> {
    fn err_context<C: Into<ErrorContext>, F: FnOnce() -> C>(self, context: F) -> Result<T> {
        self.map_err(|e| e.more_context(context()))
    }
}

/// Helper trait to chain foreign errors into an [Error]
pub trait OrErr<T, E> {
    /// Wrap the E in [Result] with new [ErrorType] and context, the existing E will be the cause.
    fn or_err(self, et: ErrorType, context: &'static str) -> Result<T>
    where
        E: Into<Cause>;

    /// Similar to or_err(), but takes a closure, which is useful for constructing String.
    fn or_err_with<C: Into<ErrorContext>, F: FnOnce() -> C>(
        self,
        et: ErrorType,
        context: F,
    ) -> Result<T>
    where
        E: Into<Cause>;

    /// Replace the E in [Result] with a new [Error] built from it.
    ///
    /// Useful when E does not implement [std::error::Error].
    fn explain_err<C: Into<ErrorContext>, F: FnOnce(E) -> C>(
        self,
        et: ErrorType,
        context: F,
    ) -> Result<T>;

    /// Surface a foreign error as an [ErrorType::InternalError].
    fn or_fail(self) -> Result<T>
    where
        E: Into<Cause>;
}

impl<T, E> OrErr<T, E> for StdResult<T, E> {
    fn or_err(self, et: ErrorType, context: &'static str) -> Result<T>
    where
        E: Into<Cause>,
    {
        self.map_err(|e| Error::because(et, context, e))
    }

    fn or_err_with<C: Into<ErrorContext>, F: FnOnce() -> C>(
        self,
        et: ErrorType,
        context: F,
    ) -> Result<T>
    where
        E: Into<Cause>,
    {
        self.map_err(|e| Error::because(et, context(), e))
    }

    fn explain_err<C: Into<ErrorContext>, F: FnOnce(E) -> C>(
        self,
        et: ErrorType,
        exp: F,
    ) -> Result<T> {
        self.map_err(|e| Error::explain(et, exp(e)))
    }

    fn or_fail(self) -> Result<T>
    where
        E: Into<Cause>,
    {
        self.map_err(|e| Error::because(ErrorType::InternalError, "", e))
    }
}

/// Helper trait to convert an [Option] to an [Error] with context.
pub trait OkOrErr<T> {
    fn or_err(self, et: ErrorType, context: &'static str) -> Result<T>;

    fn or_err_with<C: Into<ErrorContext>, F: FnOnce() -> C>(
        self,
        et: ErrorType,
        context: F,
    ) -> Result<T>;
}

impl<T> OkOrErr<T> for Option<T> {
    fn or_err(self, et: ErrorType, context: &'static str) -> Result<T> {
        self.ok_or_else(|| Error::explain(et, context))
    }

    fn or_err_with<C: Into<ErrorContext>, F: FnOnce() -> C>(
        self,
        et: ErrorType,
        context: F,
    ) -> Result<T> {
        self.ok_or_else(|| Error::explain(et, context()))
    }
}
