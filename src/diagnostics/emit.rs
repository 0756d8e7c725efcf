//! Diagnostic emission backend.

use std::sync::atomic::{AtomicBool, Ordering};

use super::kind::{Diagnostic, DiagnosticKind};

/// Global flag to suppress diagnostic output (for testing).
static DIAGNOSTICS_SUPPRESSED: AtomicBool = AtomicBool::new(false);

/// Suppress all diagnostic output.
pub fn suppress_diagnostics(suppress: bool) {
    DIAGNOSTICS_SUPPRESSED.store(suppress, Ordering::Relaxed);
}

/// Check if diagnostics are suppressed.
pub fn is_suppressed() -> bool {
    DIAGNOSTICS_SUPPRESSED.load(Ordering::Relaxed)
}

/// Emit a diagnostic through the `log` facade.
pub fn emit(diag: &Diagnostic) {
    if is_suppressed() {
        return;
    }

    match diag.kind {
        DiagnosticKind::Error => log::error!("[{}] {}", diag.code, diag.message),
        DiagnosticKind::Warning => log::warn!("[{}] {}", diag.code, diag.message),
    }
    emit_details(diag);
}

/// Emit a diagnostic with additional runtime context.
pub fn emit_with_context(diag: &Diagnostic, context: &str) {
    if is_suppressed() {
        return;
    }

    match diag.kind {
        DiagnosticKind::Error => {
            log::error!("[{}] {}: {}", diag.code, diag.message, context)
        }
        DiagnosticKind::Warning => {
            log::warn!("[{}] {}: {}", diag.code, diag.message, context)
        }
    }
    emit_details(diag);
}

fn emit_details(diag: &Diagnostic) {
    if let Some(note) = diag.note {
        log::info!("  {}: note: {}", diag.kind.prefix(), note);
    }
    if let Some(help) = diag.help {
        log::info!("  {}: help: {}", diag.kind.prefix(), help);
    }
}
