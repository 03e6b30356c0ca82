use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use anyhow::anyhow;
use packflow::exec::{BatchDispatcher, BatchPayload, BatchResults, TaskRequest, TaskResult};
use parking_lot::Mutex;

#[derive(Debug, Clone)]
enum Failure {
    Error(String),
    Panic,
}

/// A fake dispatcher that:
/// - records every batch it receives
/// - answers each task with the exit code / stdout configured for its
///   `execute` (default: exit 0, empty stdout)
/// - can be told to fail or panic on every batch.
#[derive(Debug, Default)]
pub struct FakeDispatcher {
    exit_codes: HashMap<String, i32>,
    stdout: HashMap<String, String>,
    failure: Option<Failure>,
    delay: Option<Duration>,
    batches: Mutex<Vec<BatchPayload>>,
}

impl FakeDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every batch fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(Failure::Error(message.to_string())),
            ..Self::default()
        }
    }

    /// Every batch panics inside the dispatcher.
    pub fn panicking() -> Self {
        Self {
            failure: Some(Failure::Panic),
            ..Self::default()
        }
    }

    pub fn with_exit_code(mut self, execute: &str, code: i32) -> Self {
        self.exit_codes.insert(execute.to_string(), code);
        self
    }

    pub fn with_stdout(mut self, execute: &str, stdout: &str) -> Self {
        self.stdout.insert(execute.to_string(), stdout.to_string());
        self
    }

    /// Sleep this long before answering each batch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn batches(&self) -> Vec<BatchPayload> {
        self.batches.lock().clone()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().iter().map(|b| b.tasks.len()).collect()
    }

    /// Every task request seen so far, in dispatch order.
    pub fn requests(&self) -> Vec<TaskRequest> {
        self.batches
            .lock()
            .iter()
            .flat_map(|b| b.tasks.iter().cloned())
            .collect()
    }

    /// Executed script names, in dispatch order.
    pub fn executed(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.execute).collect()
    }

    fn answer(&self, request: &TaskRequest) -> TaskResult {
        let code = self.exit_codes.get(&request.execute).copied().unwrap_or(0);
        let stdout = if request.wants_output {
            self.stdout.get(&request.execute).cloned().unwrap_or_default()
        } else {
            String::new()
        };
        TaskResult::new(code, stdout, String::new())
    }
}

impl BatchDispatcher for FakeDispatcher {
    fn dispatch(
        &self,
        payload: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<BatchResults>> + Send + '_>> {
        Box::pin(async move {
            let batch = BatchPayload::from_bytes(&payload)?;
            self.batches.lock().push(batch.clone());

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            match &self.failure {
                Some(Failure::Error(message)) => return Err(anyhow!("{message}")),
                Some(Failure::Panic) => panic!("fake dispatcher panicked"),
                None => {}
            }

            Ok(batch
                .tasks
                .iter()
                .map(|request| (request.id, self.answer(request)))
                .collect())
        })
    }
}
