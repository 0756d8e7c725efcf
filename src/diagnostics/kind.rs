//! Diagnostic kinds and predefined codes.

/// The severity level of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// Something is definitely wrong.
    Error,
    /// Something is probably wrong or suboptimal.
    Warning,
}

impl DiagnosticKind {
    /// Get the display prefix for this kind.
    pub fn prefix(&self) -> &'static str {
        match self {
            DiagnosticKind::Error => "error",
            DiagnosticKind::Warning => "warning",
        }
    }
}

/// A diagnostic message with code, message, and optional context.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Severity level.
    pub kind: DiagnosticKind,
    /// Diagnostic code (e.g., "GH001").
    pub code: &'static str,
    /// Primary message.
    pub message: &'static str,
    /// Optional additional context.
    pub note: Option<&'static str>,
    /// Optional fix suggestion.
    pub help: Option<&'static str>,
}

impl Diagnostic {
    /// Create a new error diagnostic.
    pub const fn error(code: &'static str, message: &'static str) -> Self {
        Self {
            kind: DiagnosticKind::Error,
            code,
            message,
            note: None,
            help: None,
        }
    }

    /// Create a new warning diagnostic.
    pub const fn warning(code: &'static str, message: &'static str) -> Self {
        Self {
            kind: DiagnosticKind::Warning,
            code,
            message,
            note: None,
            help: None,
        }
    }

    /// Add a note to this diagnostic.
    pub const fn with_note(mut self, note: &'static str) -> Self {
        self.note = Some(note);
        self
    }

    /// Add a help message to this diagnostic.
    pub const fn with_help(mut self, help: &'static str) -> Self {
        self.help = Some(help);
        self
    }
}

// =============================================================================
// Predefined diagnostics (GH0xx - Resident heap)
// =============================================================================

/// GH001: Heap cannot grow any further.
pub const GH001: Diagnostic = Diagnostic::warning(
    "GH001",
    "resident heap reached its maximum backing store count"
).with_note("stores double in size, so the cap bounds the total heap size")
 .with_help("raise max_store_count in HeapConfig, or free long-lived allocations");

/// GH002: Request larger than a freshly grown store.
pub const GH002: Diagnostic = Diagnostic::warning(
    "GH002",
    "allocation does not fit in a newly grown backing store"
).with_note("an allocation can never span two backing stores")
 .with_help("split the resource, or raise min_store_size in HeapConfig");

/// GH003: Free of an address no store owns.
pub const GH003: Diagnostic = Diagnostic::error(
    "GH003",
    "freed an address that does not belong to this heap"
).with_note("the address falls outside every backing store's range")
 .with_help("free with the same heap, address and size returned by alloc()");

// =============================================================================
// Predefined diagnostics (GH1xx - Upload queue)
// =============================================================================

/// GH101: Device context lost.
pub const GH101: Diagnostic = Diagnostic::error(
    "GH101",
    "device context lost; upload queue disabled"
).with_note("every later operation fails with DeviceLost without touching hardware")
 .with_help("recreate the device");

/// GH102: Timeline counter exhausted.
pub const GH102: Diagnostic = Diagnostic::error(
    "GH102",
    "upload timeline counter exhausted"
);
