// src/exec/batch.rs

//! Batch payloads and the dispatcher boundary.
//!
//! A batch of tasks is serialized into a single JSON payload and handed to a
//! [`BatchDispatcher`], which executes it somewhere (a local process pool, a
//! remote worker) and returns one [`TaskResult`] per task id.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::Result;
use crate::exec::task::{TaskRequest, TaskResult};

/// Per-task results of one dispatched batch.
pub type BatchResults = HashMap<Uuid, TaskResult>;

/// Everything a dispatcher needs to run one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPayload {
    pub batch_id: Uuid,
    pub job_id: Uuid,
    pub tasks: Vec<TaskRequest>,
}

impl BatchPayload {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Executes serialized batches.
///
/// An `Err` means the batch as a whole could not be executed; the backend
/// then fails every task of that batch.
pub trait BatchDispatcher: Send + Sync + Debug + 'static {
    fn dispatch(
        &self,
        payload: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<BatchResults>> + Send + '_>>;
}
