//! Recording pruner.

use std::path::PathBuf;
use std::sync::Mutex;

use crate::prune::{PruneError, Pruner};

/// One recorded prune call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneCall {
    pub store_url: String,
    pub indexes: Vec<PathBuf>,
}

/// Pruner that only records its invocations.
#[derive(Debug, Default)]
pub struct RecordingPruner {
    calls: Mutex<Vec<PruneCall>>,
    exit_code: Option<i32>,
}

impl RecordingPruner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a failed prune with the given exit code on every call.
    pub fn failing(exit_code: i32) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            exit_code: Some(exit_code),
        }
    }

    pub fn calls(&self) -> Vec<PruneCall> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Pruner for RecordingPruner {
    fn prune(&self, store_url: &str, indexes: &[PathBuf]) -> Result<(), PruneError> {
        let call = PruneCall {
            store_url: store_url.to_string(),
            indexes: indexes.to_vec(),
        };
        match self.calls.lock() {
            Ok(mut calls) => calls.push(call),
            Err(poisoned) => poisoned.into_inner().push(call),
        }

        match self.exit_code {
            Some(code) => Err(PruneError::Failed {
                program: "recording-pruner".to_string(),
                status: format!("exit status: {}", code),
            }),
            None => Ok(()),
        }
    }
}
