//! Success-or-diagnostics results.

use std::fmt;

use crate::error::ComputeError;

/// A diagnostic attached to an [`Outcome`].
#[derive(Debug, Clone)]
pub enum Diagnostic {
    /// Informational problem that did not prevent a value.
    Warning(String),
    /// An error; usually (but not necessarily) paired with an absent value.
    Error(ComputeError),
}

impl Diagnostic {
    /// Create a warning diagnostic.
    pub fn warning(message: impl Into<String>) -> Self {
        Diagnostic::Warning(message.into())
    }

    /// Returns the error if this is an `Error` diagnostic.
    pub fn error(&self) -> Option<&ComputeError> {
        match self {
            Diagnostic::Error(e) => Some(e),
            Diagnostic::Warning(_) => None,
        }
    }

    /// Returns `true` if this diagnostic records a cancellation or timeout.
    pub fn is_cancellation(&self) -> bool {
        self.error().is_some_and(ComputeError::is_cancellation)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::Warning(message) => write!(f, "warning: {}", message),
            Diagnostic::Error(e) => write!(f, "error: {}", e),
        }
    }
}

impl From<ComputeError> for Diagnostic {
    fn from(err: ComputeError) -> Self {
        Diagnostic::Error(err)
    }
}

/// The result of a computation: an optional value plus every diagnostic
/// accumulated while producing it.
///
/// An outcome with a value is a success, even when it carries warnings or
/// errors inherited from tolerated dependencies. An outcome without a value is
/// a soft failure; its diagnostics say why. Diagnostics are never dropped when
/// outcomes are combined.
#[derive(Clone)]
pub struct Outcome<T> {
    value: Option<T>,
    diagnostics: Vec<Diagnostic>,
}

impl<T> Outcome<T> {
    /// A successful outcome without diagnostics.
    pub fn ok(value: T) -> Self {
        Self {
            value: Some(value),
            diagnostics: Vec::new(),
        }
    }

    /// An outcome from its parts.
    pub fn new(value: Option<T>, diagnostics: Vec<Diagnostic>) -> Self {
        Self { value, diagnostics }
    }

    /// An absent outcome without diagnostics.
    pub fn empty() -> Self {
        Self {
            value: None,
            diagnostics: Vec::new(),
        }
    }

    /// An absent outcome carrying the given diagnostics.
    pub fn failed(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            value: None,
            diagnostics,
        }
    }

    /// An absent outcome carrying a single error.
    pub fn error(err: impl Into<ComputeError>) -> Self {
        Self::failed(vec![Diagnostic::Error(err.into())])
    }

    /// An absent outcome marking a cancellation.
    pub fn cancelled() -> Self {
        Self::error(ComputeError::Cancelled)
    }

    /// Returns `true` if a value is present.
    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }

    /// Returns `true` if the outcome records a cancellation (or timeout) and no value.
    pub fn is_cancelled(&self) -> bool {
        self.value.is_none() && self.diagnostics.iter().any(Diagnostic::is_cancellation)
    }

    /// Borrow the value, if present.
    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Take the value, dropping the diagnostics.
    pub fn into_value(self) -> Option<T> {
        self.value
    }

    /// Split into value and diagnostics.
    pub fn into_parts(self) -> (Option<T>, Vec<Diagnostic>) {
        (self.value, self.diagnostics)
    }

    /// All diagnostics in the order they were recorded.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Iterate over the error diagnostics only.
    pub fn errors(&self) -> impl Iterator<Item = &ComputeError> + '_ {
        self.diagnostics.iter().filter_map(Diagnostic::error)
    }

    /// Append a diagnostic.
    pub fn push(&mut self, diagnostic: impl Into<Diagnostic>) {
        self.diagnostics.push(diagnostic.into());
    }

    /// Builder-style [`push`](Self::push).
    #[must_use]
    pub fn with(mut self, diagnostic: impl Into<Diagnostic>) -> Self {
        self.push(diagnostic);
        self
    }

    /// Insert `earlier` diagnostics before the ones already recorded.
    #[must_use]
    pub fn after(mut self, mut earlier: Vec<Diagnostic>) -> Self {
        earlier.append(&mut self.diagnostics);
        self.diagnostics = earlier;
        self
    }

    /// Transform the value, keeping the diagnostics.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            value: self.value.map(f),
            diagnostics: self.diagnostics,
        }
    }

    /// Chain a fallible step; diagnostics of both sides are kept in order.
    pub fn and_then<U>(self, f: impl FnOnce(T) -> Outcome<U>) -> Outcome<U> {
        match self.value {
            Some(value) => f(value).after(self.diagnostics),
            None => Outcome::failed(self.diagnostics),
        }
    }

    /// Borrowing view of the outcome.
    pub fn as_ref(&self) -> Outcome<&T> {
        Outcome {
            value: self.value.as_ref(),
            diagnostics: self.diagnostics.clone(),
        }
    }

    /// Convert to a `Result`, failing with the first error diagnostic
    /// (or `Missing` when the outcome has none).
    pub fn into_result(self) -> Result<T, ComputeError> {
        match self.value {
            Some(value) => Ok(value),
            None => Err(self
                .diagnostics
                .into_iter()
                .find_map(|d| match d {
                    Diagnostic::Error(e) => Some(e),
                    Diagnostic::Warning(_) => None,
                })
                .unwrap_or(ComputeError::Missing {
                    description: "outcome has no value".to_string(),
                })),
        }
    }
}

impl<T> From<Result<T, ComputeError>> for Outcome<T> {
    fn from(result: Result<T, ComputeError>) -> Self {
        match result {
            Ok(value) => Outcome::ok(value),
            Err(e) => Outcome::error(e),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Outcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) => write!(f, "Outcome::Present({:?}", v)?,
            None => write!(f, "Outcome::Absent(")?,
        }
        if !self.diagnostics.is_empty() {
            write!(f, ", {:?}", self.diagnostics)?;
        }
        write!(f, ")")
    }
}

/// Conjunctive merge: present only if every input is present.
///
/// Values keep input order. Diagnostics of every input are concatenated in
/// input order whether or not the merge succeeds.
pub fn merge_all<T>(outcomes: Vec<Outcome<T>>) -> Outcome<Vec<T>> {
    let mut values = Vec::with_capacity(outcomes.len());
    let mut diagnostics = Vec::new();
    let mut complete = true;
    for outcome in outcomes {
        let (value, mut diags) = outcome.into_parts();
        diagnostics.append(&mut diags);
        match value {
            Some(v) if complete => values.push(v),
            Some(_) => {}
            None => complete = false,
        }
    }
    Outcome::new(complete.then_some(values), diagnostics)
}
