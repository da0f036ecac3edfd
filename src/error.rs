//! Error types and the accumulating error-handler sink.
//!
//! Two mechanisms coexist, serving different phases:
//!
//! - [`RouterError`] is the crate's typed error for API boundaries (loading
//!   a configuration, driving a router from the binary).
//! - [`ErrorHandler`] is the accumulating sink threaded through element
//!   configuration and initialization. Configure errors must not abort the
//!   remaining elements — every element gets a chance to report before the
//!   router gives up — so those paths report into a sink and return a bare
//!   status instead of propagating early. Sinks count errors and warnings;
//!   decorators add a context line or a prefix to every message.

use std::fmt;
use thiserror::Error;
use tracing::{error, info, warn};

/// Typed errors surfaced at the crate's API boundary.
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("{landmark}: syntax error: {message}")]
    Parse { landmark: String, message: String },

    #[error("configuration failed with {0} error(s)")]
    ConfigureFailed(usize),

    #[error("initialization failed: {0}")]
    InitializeFailed(String),

    #[error("router has no elements")]
    Empty,

    #[error("unknown element class `{0}`")]
    UnknownElementClass(String),

    #[error("no element named `{0}`")]
    NoSuchElement(String),

    #[error("no handler named `{0}`")]
    NoSuchHandler(String),

    #[error("handler `{0}` is not {1}")]
    HandlerPermission(String, &'static str),

    #[error("write to handler `{0}` failed")]
    HandlerWriteFailed(String),

    #[error("unsatisfied requirement `{0}`")]
    UnsatisfiedRequirement(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Message severities understood by every sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Message,
    Warning,
    Error,
    Fatal,
}

/// An accumulating sink for configuration-time diagnostics.
///
/// All reporting functions are infallible; `error` returns `Err(())` so a
/// failing path can end with `return errh.error("...")`.
pub trait ErrorHandler {
    fn n_errors(&self) -> usize;
    fn n_warnings(&self) -> usize;
    fn reset_counts(&mut self);

    /// Delivers one formatted message. Implementations count it according
    /// to its severity and forward it somewhere useful.
    fn vmessage(&mut self, severity: Severity, landmark: &str, message: &str);

    fn message(&mut self, msg: &str) {
        self.vmessage(Severity::Message, "", msg);
    }

    fn warning(&mut self, msg: &str) {
        self.vmessage(Severity::Warning, "", msg);
    }

    fn error(&mut self, msg: &str) -> Result<(), ()> {
        self.vmessage(Severity::Error, "", msg);
        Err(())
    }

    fn fatal(&mut self, msg: &str) -> Result<(), ()> {
        self.vmessage(Severity::Fatal, "", msg);
        Err(())
    }

    /// Like `error`, with a source landmark (`file:line`) prefix.
    fn lerror(&mut self, landmark: &str, msg: &str) -> Result<(), ()> {
        self.vmessage(Severity::Error, landmark, msg);
        Err(())
    }

    fn lwarning(&mut self, landmark: &str, msg: &str) {
        self.vmessage(Severity::Warning, landmark, msg);
    }
}

fn render(landmark: &str, message: &str) -> String {
    if landmark.is_empty() {
        message.to_string()
    } else {
        format!("{landmark}: {message}")
    }
}

/// The standard sink: counts diagnostics and emits them through `tracing`.
#[derive(Default)]
pub struct BaseErrorHandler {
    n_errors: usize,
    n_warnings: usize,
}

impl BaseErrorHandler {
    pub fn new() -> BaseErrorHandler {
        BaseErrorHandler::default()
    }
}

impl ErrorHandler for BaseErrorHandler {
    fn n_errors(&self) -> usize {
        self.n_errors
    }

    fn n_warnings(&self) -> usize {
        self.n_warnings
    }

    fn reset_counts(&mut self) {
        self.n_errors = 0;
        self.n_warnings = 0;
    }

    fn vmessage(&mut self, severity: Severity, landmark: &str, message: &str) {
        let text = render(landmark, message);
        match severity {
            Severity::Message => info!("{text}"),
            Severity::Warning => {
                self.n_warnings += 1;
                warn!("{text}");
            }
            Severity::Error | Severity::Fatal => {
                self.n_errors += 1;
                error!("{text}");
            }
        }
    }
}

/// A sink that counts diagnostics but says nothing.
#[derive(Default)]
pub struct SilentErrorHandler {
    n_errors: usize,
    n_warnings: usize,
}

impl SilentErrorHandler {
    pub fn new() -> SilentErrorHandler {
        SilentErrorHandler::default()
    }
}

impl ErrorHandler for SilentErrorHandler {
    fn n_errors(&self) -> usize {
        self.n_errors
    }

    fn n_warnings(&self) -> usize {
        self.n_warnings
    }

    fn reset_counts(&mut self) {
        self.n_errors = 0;
        self.n_warnings = 0;
    }

    fn vmessage(&mut self, severity: Severity, _landmark: &str, _message: &str) {
        match severity {
            Severity::Message => {}
            Severity::Warning => self.n_warnings += 1,
            Severity::Error | Severity::Fatal => self.n_errors += 1,
        }
    }
}

/// A sink that collects rendered messages, for tests and handler output.
#[derive(Default)]
pub struct CollectingErrorHandler {
    n_errors: usize,
    n_warnings: usize,
    messages: Vec<String>,
}

impl CollectingErrorHandler {
    pub fn new() -> CollectingErrorHandler {
        CollectingErrorHandler::default()
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }
}

impl ErrorHandler for CollectingErrorHandler {
    fn n_errors(&self) -> usize {
        self.n_errors
    }

    fn n_warnings(&self) -> usize {
        self.n_warnings
    }

    fn reset_counts(&mut self) {
        self.n_errors = 0;
        self.n_warnings = 0;
        self.messages.clear();
    }

    fn vmessage(&mut self, severity: Severity, landmark: &str, message: &str) {
        match severity {
            Severity::Message => {}
            Severity::Warning => self.n_warnings += 1,
            Severity::Error | Severity::Fatal => self.n_errors += 1,
        }
        self.messages.push(render(landmark, message));
    }
}

/// Decorator that prints a context line (once) before the first message it
/// forwards, and indents everything under it.
///
/// The router wraps each element's configure/initialize sink in one of
/// these, so diagnostics read as
/// `While configuring e :: Class (file:3): ...`.
pub struct ContextErrorHandler<'a> {
    parent: &'a mut dyn ErrorHandler,
    context: String,
    printed: bool,
}

impl<'a> ContextErrorHandler<'a> {
    pub fn new(parent: &'a mut dyn ErrorHandler, context: String) -> ContextErrorHandler<'a> {
        ContextErrorHandler { parent, context, printed: false }
    }
}

impl ErrorHandler for ContextErrorHandler<'_> {
    fn n_errors(&self) -> usize {
        self.parent.n_errors()
    }

    fn n_warnings(&self) -> usize {
        self.parent.n_warnings()
    }

    fn reset_counts(&mut self) {
        self.parent.reset_counts();
    }

    fn vmessage(&mut self, severity: Severity, landmark: &str, message: &str) {
        if !self.printed {
            self.printed = true;
            self.parent.vmessage(Severity::Message, "", &self.context);
        }
        let indented = format!("  {message}");
        self.parent.vmessage(severity, landmark, &indented);
    }
}

/// Decorator that prepends a fixed prefix to every message.
pub struct PrefixErrorHandler<'a> {
    parent: &'a mut dyn ErrorHandler,
    prefix: String,
}

impl<'a> PrefixErrorHandler<'a> {
    pub fn new(parent: &'a mut dyn ErrorHandler, prefix: String) -> PrefixErrorHandler<'a> {
        PrefixErrorHandler { parent, prefix }
    }
}

impl ErrorHandler for PrefixErrorHandler<'_> {
    fn n_errors(&self) -> usize {
        self.parent.n_errors()
    }

    fn n_warnings(&self) -> usize {
        self.parent.n_warnings()
    }

    fn reset_counts(&mut self) {
        self.parent.reset_counts();
    }

    fn vmessage(&mut self, severity: Severity, landmark: &str, message: &str) {
        let prefixed = format!("{}{}", self.prefix, message);
        self.parent.vmessage(severity, landmark, &prefixed);
    }
}

impl fmt::Debug for dyn ErrorHandler + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ErrorHandler({} errors, {} warnings)", self.n_errors(), self.n_warnings())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accumulate() {
        let mut errh = SilentErrorHandler::new();
        errh.warning("w");
        assert!(errh.error("e").is_err());
        assert!(errh.error("e2").is_err());
        assert_eq!(errh.n_errors(), 2);
        assert_eq!(errh.n_warnings(), 1);
        errh.reset_counts();
        assert_eq!(errh.n_errors(), 0);
    }

    #[test]
    fn context_prints_header_once() {
        let mut base = CollectingErrorHandler::new();
        {
            let mut ctx = ContextErrorHandler::new(&mut base, "While configuring q:".into());
            let _ = ctx.error("first");
            let _ = ctx.error("second");
        }
        assert_eq!(base.messages().len(), 3);
        assert_eq!(base.messages()[0], "While configuring q:");
        assert_eq!(base.messages()[1], "  first");
        assert_eq!(base.n_errors(), 2);
    }

    #[test]
    fn prefix_applies_to_every_message() {
        let mut base = CollectingErrorHandler::new();
        {
            let mut p = PrefixErrorHandler::new(&mut base, "queue: ".into());
            let _ = p.error("full");
        }
        assert_eq!(base.messages()[0], "queue: full");
    }
}
