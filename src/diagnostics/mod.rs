//! Runtime diagnostics.
//!
//! Coded, rustc-style messages for the conditions a driver author usually
//! wants to grep logs for. Everything is routed through the `log` facade.
//!
//! ## Diagnostic Codes
//!
//! | Code  | Meaning                        |
//! |-------|--------------------------------|
//! | GH0xx | Resident heap issues           |
//! | GH1xx | Upload queue / device issues   |

pub mod emit;
pub mod kind;

pub use emit::{emit, emit_with_context, is_suppressed, suppress_diagnostics};
pub use kind::{Diagnostic, DiagnosticKind};
pub use kind::{GH001, GH002, GH003, GH101, GH102};
