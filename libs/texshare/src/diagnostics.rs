// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Structured failure records for an injected logging sink.
//!
//! Every fallible operation reports `(operation, kind, reason)` to a
//! [`DiagnosticSink`] before returning its error. The crate defines no file
//! or console format; [`TracingSink`] forwards to `tracing` and is the
//! default.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{ErrorKind, Result, ShareError};

/// Operation a diagnostic event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    EnumerateAdapters,
    AdapterName,
    AdapterInfo,
    SelectAdapter,
    CreateDevice,
    CreateLegacyObject,
    CreateLegacyDevice,
    CreateSharedTexture,
    OpenSharedTexture,
    ReleaseTexture,
    ReleaseDevice,
    Flush,
    FlushAndWait,
    Wait,
    ClearTexture,
    WritePixels,
    ReadPixels,
    CreateSurface,
    WriteToTexture,
    WriteToSurface,
    LoadConfig,
    Preferences,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EnumerateAdapters => "enumerate_adapters",
            Self::AdapterName => "adapter_name",
            Self::AdapterInfo => "adapter_info",
            Self::SelectAdapter => "select_adapter",
            Self::CreateDevice => "create_device",
            Self::CreateLegacyObject => "create_legacy_object",
            Self::CreateLegacyDevice => "create_legacy_device",
            Self::CreateSharedTexture => "create_shared_texture",
            Self::OpenSharedTexture => "open_shared_texture",
            Self::ReleaseTexture => "release_texture",
            Self::ReleaseDevice => "release_device",
            Self::Flush => "flush",
            Self::FlushAndWait => "flush_and_wait",
            Self::Wait => "wait",
            Self::ClearTexture => "clear_texture",
            Self::WritePixels => "write_pixels",
            Self::ReadPixels => "read_pixels",
            Self::CreateSurface => "create_surface",
            Self::WriteToTexture => "write_to_texture",
            Self::WriteToSurface => "write_to_surface",
            Self::LoadConfig => "load_config",
            Self::Preferences => "preferences",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One failed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticEvent {
    pub operation: Operation,
    pub kind: ErrorKind,
    pub reason: String,
}

/// Receives diagnostic events. Implementations must be cheap and must not
/// call back into the crate.
pub trait DiagnosticSink: Send + Sync {
    fn record(&self, event: &DiagnosticEvent);
}

/// Forwards events to `tracing`. Device loss is logged at error level,
/// everything else at warn.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, event: &DiagnosticEvent) {
        if event.kind == ErrorKind::DeviceLost {
            tracing::error!(
                operation = %event.operation,
                kind = ?event.kind,
                "{}",
                event.reason
            );
        } else {
            tracing::warn!(
                operation = %event.operation,
                kind = ?event.kind,
                "{}",
                event.reason
            );
        }
    }
}

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<DiagnosticEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.events.lock().clone()
    }

    /// Drain all recorded events.
    pub fn take(&self) -> Vec<DiagnosticEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn count_for(&self, operation: Operation) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.operation == operation)
            .count()
    }

    pub fn last(&self) -> Option<DiagnosticEvent> {
        self.events.lock().last().cloned()
    }
}

impl DiagnosticSink for MemorySink {
    fn record(&self, event: &DiagnosticEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Cloneable handle to the injected sink.
#[derive(Clone)]
pub struct Diagnostics {
    sink: Arc<dyn DiagnosticSink>,
}

impl Diagnostics {
    pub fn new(sink: Arc<dyn DiagnosticSink>) -> Self {
        Self { sink }
    }

    pub fn tracing() -> Self {
        Self::new(Arc::new(TracingSink))
    }

    pub fn report(&self, operation: Operation, error: &ShareError) {
        self.sink.record(&DiagnosticEvent {
            operation,
            kind: error.kind(),
            reason: error.to_string(),
        });
    }

    /// Report the error of `result`, if any, and hand the result back.
    pub fn check<T>(&self, operation: Operation, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.report(operation, e);
        }
        result
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::tracing()
    }
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostics").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_records_only_errors() {
        let sink = Arc::new(MemorySink::new());
        let diagnostics = Diagnostics::new(sink.clone());

        let ok: Result<u32> = Ok(1);
        assert_eq!(diagnostics.check(Operation::Flush, ok).unwrap(), 1);
        assert!(sink.events().is_empty());

        let err: Result<u32> = Err(ShareError::DeviceLost("hung".into()));
        assert!(diagnostics.check(Operation::FlushAndWait, err).is_err());

        let event = sink.last().unwrap();
        assert_eq!(event.operation, Operation::FlushAndWait);
        assert_eq!(event.kind, ErrorKind::DeviceLost);
        assert!(event.reason.contains("hung"));
        assert_eq!(sink.take().len(), 1);
        assert!(sink.events().is_empty());
    }
}
