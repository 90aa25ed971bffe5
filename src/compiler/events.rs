//! Diagnostics and transformation events for the compilation pipeline.
//!
//! Every component reports through an [`EventLog`]: unresolved references are
//! recorded as [`EventKind::Error`] diagnostics at a [`CallLocation`] instead of
//! being raised, and passes record what they changed. The log is append-only and
//! safe to share between threads.
//!
//! # Architecture
//!
//! - [`Event`] - a single recorded event
//! - [`EventLog`] - collection of events with query and summary helpers
//! - [`EventBuilder`] - fluent API, the event is committed when the builder drops
//!
//! # Example
//!
//! ```rust,ignore
//! use aotflow::compiler::{EventKind, EventLog};
//!
//! let log = EventLog::new();
//! log.record(EventKind::Error)
//!     .at(&location)
//!     .message("substitutor for bootstrap method was not found");
//!
//! assert_eq!(log.errors().count(), 1);
//! ```

use std::{
    collections::{HashMap, HashSet},
    fmt,
    time::Duration,
};

use crate::model::{CallLocation, MethodReference, TextLocation};

/// Categories of events that can be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A call site was replaced with the callee's body.
    MethodInlined,
    /// A block was split to insert control flow.
    BlockSplit,
    /// Try/catch regions of a method were lowered to shadow stack dispatch.
    ExceptionsLowered,
    /// An `InitClass` marker was lowered to a guarded initializer call.
    ClassInitLowered,
    /// An unreferenced method was removed by the linker.
    MethodRemoved,
    /// A referenced but never invoked method lost its body.
    MethodStripped,
    /// An unaccessed field was removed by the linker.
    FieldRemoved,
    /// A dynamic call site was replaced by a bootstrap substitutor.
    BootstrapSubstituted,
    /// A method body was converted to SSA form.
    SsaConstructed,

    /// A method became reachable.
    MethodReached,
    /// A class became reachable.
    ClassReached,
    /// A field became reachable.
    FieldReached,
    /// A new virtual call target was discovered.
    VirtualTargetFound,

    /// A pipeline stage started.
    PassStarted,
    /// A pipeline stage completed.
    PassCompleted,
    /// A program was served from the cache.
    CacheHit,
    /// A program was not found in the cache.
    CacheMiss,

    /// Informational message.
    Info,
    /// Warning (something unexpected but recoverable).
    Warning,
    /// Error (something failed, the build will fail).
    Error,
}

impl EventKind {
    /// Returns a human-readable description of this event kind.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            // Transformations
            Self::MethodInlined => "method inlined",
            Self::BlockSplit => "block split",
            Self::ExceptionsLowered => "exceptions lowered",
            Self::ClassInitLowered => "class init lowered",
            Self::MethodRemoved => "method removed",
            Self::MethodStripped => "method stripped",
            Self::FieldRemoved => "field removed",
            Self::BootstrapSubstituted => "bootstrap substituted",
            Self::SsaConstructed => "ssa constructed",
            // Analysis
            Self::MethodReached => "method reached",
            Self::ClassReached => "class reached",
            Self::FieldReached => "field reached",
            Self::VirtualTargetFound => "virtual target found",
            // Engine
            Self::PassStarted => "pass started",
            Self::PassCompleted => "pass completed",
            Self::CacheHit => "cache hit",
            Self::CacheMiss => "cache miss",
            // Diagnostic
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// Returns true if this event represents a code transformation.
    #[must_use]
    pub fn is_transformation(&self) -> bool {
        matches!(
            self,
            Self::MethodInlined
                | Self::BlockSplit
                | Self::ExceptionsLowered
                | Self::ClassInitLowered
                | Self::MethodRemoved
                | Self::MethodStripped
                | Self::FieldRemoved
                | Self::BootstrapSubstituted
                | Self::SsaConstructed
        )
    }

    /// Returns true if this is a diagnostic event (info/warning/error).
    #[must_use]
    pub fn is_diagnostic(&self) -> bool {
        matches!(self, Self::Info | Self::Warning | Self::Error)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A single logged event.
#[derive(Debug, Clone)]
pub struct Event {
    /// The type of event.
    pub kind: EventKind,
    /// The method where the event occurred (if applicable).
    pub method: Option<MethodReference>,
    /// Source position inside the method.
    pub location: Option<TextLocation>,
    /// Human-readable description.
    pub message: String,
    /// Associated pass name (if from a pass).
    pub pass: Option<String>,
}

impl Event {
    fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            method: None,
            location: None,
            message: message.into(),
            pass: None,
        }
    }

    /// The method and position of this event, if it was recorded with a method.
    #[must_use]
    pub fn call_location(&self) -> Option<CallLocation> {
        self.method
            .as_ref()
            .map(|method| CallLocation::new(method.clone(), self.location.clone()))
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.kind)?;
        if let Some(method) = &self.method {
            write!(f, "{method}")?;
            if let Some(location) = &self.location {
                write!(f, " at {location}")?;
            }
            f.write_str(": ")?;
        }
        f.write_str(&self.message)
    }
}

/// Builder for creating events with a fluent API.
///
/// Created by [`EventLog::record`]. The event is added to the log when the
/// builder is dropped.
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    kind: EventKind,
    method: Option<MethodReference>,
    location: Option<TextLocation>,
    message: Option<String>,
    pass: Option<String>,
}

impl<'a> EventBuilder<'a> {
    fn new(log: &'a EventLog, kind: EventKind) -> Self {
        Self {
            log,
            kind,
            method: None,
            location: None,
            message: None,
            pass: None,
        }
    }

    /// Sets the method and source position where the event occurred.
    pub fn at(mut self, location: &CallLocation) -> Self {
        self.method = Some(location.method.clone());
        self.location.clone_from(&location.location);
        self
    }

    /// Sets only the method (for method-level events without a position).
    pub fn method(mut self, method: &MethodReference) -> Self {
        self.method = Some(method.clone());
        self
    }

    /// Sets the source position.
    pub fn location(mut self, location: Option<TextLocation>) -> Self {
        self.location = location;
        self
    }

    /// Sets a custom message describing the event.
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Associates this event with a specific pass.
    pub fn pass(mut self, pass_name: impl Into<String>) -> Self {
        self.pass = Some(pass_name.into());
        self
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        let message = self
            .message
            .take()
            .unwrap_or_else(|| self.kind.description().to_string());

        let event = Event {
            kind: self.kind,
            method: self.method.take(),
            location: self.location.take(),
            message,
            pass: self.pass.take(),
        };

        self.log.events.push(event);
    }
}

/// Collection of events from one compilation.
///
/// This type is thread-safe: events can be appended concurrently from multiple
/// threads using shared references (`&self`).
#[derive(Debug, Default)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl Clone for EventLog {
    fn clone(&self) -> Self {
        let new_log = Self::new();
        for (_, event) in &self.events {
            new_log.events.push(event.clone());
        }
        new_log
    }
}

impl EventLog {
    /// Creates an empty event log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: boxcar::Vec::new(),
        }
    }

    /// Returns true if no events have been logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.count() == 0
    }

    /// Returns the total number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Starts building a new event of the given kind.
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder::new(self, kind)
    }

    /// Records an informational message.
    pub fn info(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Info, message));
    }

    /// Records a warning message.
    pub fn warn(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Warning, message));
    }

    /// Records an error at a call location.
    pub fn error_at(&self, location: &CallLocation, message: impl Into<String>) {
        self.record(EventKind::Error).at(location).message(message);
    }

    /// Records a warning at a call location.
    pub fn warn_at(&self, location: &CallLocation, message: impl Into<String>) {
        self.record(EventKind::Warning).at(location).message(message);
    }

    /// Appends every event of `other`.
    pub fn merge(&self, other: &EventLog) {
        for (_, event) in &other.events {
            self.events.push(event.clone());
        }
    }

    /// Returns true if any event of the given kind exists.
    #[must_use]
    pub fn has(&self, kind: EventKind) -> bool {
        self.events.iter().any(|(_, e)| e.kind == kind)
    }

    /// Counts events of the given kind.
    #[must_use]
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|(_, e)| e.kind == kind).count()
    }

    /// Returns an iterator over all events.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, e)| e)
    }

    /// Returns an iterator over events of a specific kind.
    pub fn filter_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> + '_ {
        self.events
            .iter()
            .filter_map(move |(_, e)| if e.kind == kind { Some(e) } else { None })
    }

    /// Returns an iterator over events for a specific method.
    pub fn filter_method<'a>(
        &'a self,
        method: &'a MethodReference,
    ) -> impl Iterator<Item = &'a Event> + 'a {
        self.events
            .iter()
            .filter_map(move |(_, e)| (e.method.as_ref() == Some(method)).then_some(e))
    }

    /// Returns an iterator over transformation events only.
    pub fn transformations(&self) -> impl Iterator<Item = &Event> + '_ {
        self.events
            .iter()
            .filter_map(|(_, e)| e.kind.is_transformation().then_some(e))
    }

    /// Returns an iterator over warning events.
    pub fn warnings(&self) -> impl Iterator<Item = &Event> + '_ {
        self.filter_kind(EventKind::Warning)
    }

    /// Returns an iterator over error events.
    pub fn errors(&self) -> impl Iterator<Item = &Event> + '_ {
        self.filter_kind(EventKind::Error)
    }

    /// Returns true if an error was recorded.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.has(EventKind::Error)
    }

    /// Counts events grouped by kind.
    #[must_use]
    pub fn count_by_kind(&self) -> HashMap<EventKind, usize> {
        let mut counts = HashMap::new();
        for (_, event) in &self.events {
            *counts.entry(event.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Returns the number of unique methods with transformation events.
    #[must_use]
    pub fn methods_affected(&self) -> usize {
        self.transformations()
            .filter_map(|e| e.method.as_ref())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Generates a human-readable summary of the transformation events.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "no events".to_string();
        }

        let mut parts: Vec<String> = self
            .count_by_kind()
            .iter()
            .filter(|(k, _)| k.is_transformation())
            .map(|(kind, count)| format!("{} {}", count, kind.description()))
            .collect();

        if parts.is_empty() {
            return format!("{} events", self.len());
        }

        parts.sort();
        parts.join(", ")
    }
}

impl Extend<Event> for EventLog {
    fn extend<T: IntoIterator<Item = Event>>(&mut self, iter: T) {
        for event in iter {
            self.events.push(event);
        }
    }
}

/// Statistics derived from an [`EventLog`].
#[derive(Debug, Clone, Default)]
pub struct DerivedStats {
    /// Number of methods that had any transformations.
    pub methods_transformed: usize,
    /// Number of methods reached by the dependency analysis.
    pub methods_reached: usize,
    /// Number of classes reached by the dependency analysis.
    pub classes_reached: usize,
    /// Number of inlined call sites.
    pub methods_inlined: usize,
    /// Number of methods removed or stripped by the linker.
    pub methods_removed: usize,
    /// Number of methods whose exception handling was lowered.
    pub exceptions_lowered: usize,
    /// Number of lowered class initialization markers.
    pub class_inits_lowered: usize,
    /// Number of warnings.
    pub warnings: usize,
    /// Number of errors.
    pub errors: usize,
    /// Processing time.
    pub total_time: Duration,
}

impl DerivedStats {
    /// Computes statistics from an event log.
    #[must_use]
    pub fn from_log(log: &EventLog) -> Self {
        let counts = log.count_by_kind();
        let get = |kind: EventKind| counts.get(&kind).copied().unwrap_or(0);

        Self {
            methods_transformed: log.methods_affected(),
            methods_reached: get(EventKind::MethodReached),
            classes_reached: get(EventKind::ClassReached),
            methods_inlined: get(EventKind::MethodInlined),
            methods_removed: get(EventKind::MethodRemoved) + get(EventKind::MethodStripped),
            exceptions_lowered: get(EventKind::ExceptionsLowered),
            class_inits_lowered: get(EventKind::ClassInitLowered),
            warnings: get(EventKind::Warning),
            errors: get(EventKind::Error),
            total_time: Duration::ZERO,
        }
    }

    /// Sets the total processing time.
    #[must_use]
    pub fn with_time(mut self, time: Duration) -> Self {
        self.total_time = time;
        self
    }

    /// Generates a human-readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        if self.methods_reached > 0 {
            parts.push(format!("{} methods reached", self.methods_reached));
        }
        if self.classes_reached > 0 {
            parts.push(format!("{} classes reached", self.classes_reached));
        }
        if self.methods_inlined > 0 {
            parts.push(format!("{} inlined", self.methods_inlined));
        }
        if self.methods_removed > 0 {
            parts.push(format!("{} removed", self.methods_removed));
        }
        if self.exceptions_lowered > 0 {
            parts.push(format!("{} exception lowerings", self.exceptions_lowered));
        }
        if self.class_inits_lowered > 0 {
            parts.push(format!("{} class inits", self.class_inits_lowered));
        }
        if self.errors > 0 {
            parts.push(format!("{} errors", self.errors));
        }
        if self.warnings > 0 {
            parts.push(format!("{} warnings", self.warnings));
        }

        let stats = if parts.is_empty() {
            "no transformations".to_string()
        } else {
            parts.join(", ")
        };

        if self.total_time.as_millis() > 0 {
            format!("{} in {:?}", stats, self.total_time)
        } else {
            stats
        }
    }
}

impl fmt::Display for DerivedStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}
