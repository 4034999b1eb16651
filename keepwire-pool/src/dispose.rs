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

//! Resource teardown and how its failures are surfaced

use keepwire_error::{BError, Error, ErrorType::*, Result};
use log::{log, Level};
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::PooledResource;

/// Where disposal failures go when nobody is waiting on a result.
pub trait DiagnosticSink: Send + Sync {
    /// Record one failure event.
    fn record(&self, level: Level, message: &str, error: &Error);
}

/// A [DiagnosticSink] that writes to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn record(&self, level: Level, message: &str, error: &Error) {
        log!(level, "{message}: {error}");
    }
}

impl<F> DiagnosticSink for F
where
    F: Fn(Level, &str, &Error) + Send + Sync,
{
    fn record(&self, level: Level, message: &str, error: &Error) {
        self(level, message, error)
    }
}

/// The outcome of destroying a batch of resources.
///
/// A failing resource never stops the rest of the batch. `disposed` counts every resource
/// that was torn down, whether its disposal succeeded or not.
#[derive(Debug, Default)]
pub struct DisposeReport {
    pub disposed: usize,
    pub failures: Vec<BError>,
}

impl DisposeReport {
    /// Whether every disposal in the batch succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn merge(&mut self, other: DisposeReport) {
        self.disposed += other.disposed;
        self.failures.extend(other.failures);
    }

    /// Turn the report into the number of disposed resources, or the first failure.
    pub fn into_result(self) -> Result<usize> {
        let total = self.disposed;
        let failed = self.failures.len();
        match self.failures.into_iter().next() {
            None => Ok(total),
            Some(e) => Err(e.more_context(format!("{failed} of {total} disposals failed"))),
        }
    }
}

pub(crate) const DISPOSE_FAILED: &str = "Failed to dispose pooled connection";

/// Dispose one resource, turning a panic into an error.
pub(crate) fn destroy<R: PooledResource>(mut resource: R) -> Result<()> {
    match catch_unwind(AssertUnwindSafe(|| resource.dispose())) {
        Ok(res) => res.map_err(|e| e.into_local()),
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Error::e_explain(DisposePanic, msg)
        }
    }
    // resource dropped here
}

/// Dispose every resource of the batch and report failures to `sink`.
pub(crate) fn destroy_all<R, I>(resources: I, sink: Option<&dyn DiagnosticSink>) -> DisposeReport
where
    R: PooledResource,
    I: IntoIterator<Item = R>,
{
    let mut report = DisposeReport::default();
    for resource in resources {
        report.disposed += 1;
        if let Err(e) = destroy(resource) {
            if let Some(sink) = sink {
                sink.record(Level::Error, DISPOSE_FAILED, &e);
            }
            report.failures.push(e);
        }
    }
    report
}
