// src/exec/task_runner.rs

//! Local process dispatcher: runs client scripts with `tokio::process`.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::exec::batch::{BatchDispatcher, BatchPayload, BatchResults};
use crate::exec::task::{TaskRequest, TaskResult};
use crate::fs::FileSystem;

/// Dispatcher that executes every task of a batch as a local shell command.
///
/// - The script is resolved under `scripts_dir` when one is configured and
///   `execute` is a bare name.
/// - At most `max_parallel_tasks` commands of a batch run at once.
/// - stdout is returned only when the task wants output; stderr also when
///   the task failed.
#[derive(Debug, Clone)]
pub struct ProcessDispatcher {
    scripts_dir: Option<PathBuf>,
    limit: Arc<Semaphore>,
    fs: Arc<dyn FileSystem>,
}

impl ProcessDispatcher {
    pub fn new(
        scripts_dir: Option<PathBuf>,
        max_parallel_tasks: usize,
        fs: Arc<dyn FileSystem>,
    ) -> Self {
        Self {
            scripts_dir,
            limit: Arc::new(Semaphore::new(max_parallel_tasks.max(1))),
            fs,
        }
    }

    /// Full shell command line for a task.
    pub fn command_line(&self, request: &TaskRequest) -> String {
        let script = match &self.scripts_dir {
            Some(dir) if !request.execute.contains('/') => {
                dir.join(&request.execute).to_string_lossy().into_owned()
            }
            _ => request.execute.clone(),
        };

        if request.arguments.trim().is_empty() {
            script
        } else {
            format!("{} {}", script, request.arguments)
        }
    }
}

impl BatchDispatcher for ProcessDispatcher {
    fn dispatch(
        &self,
        payload: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<BatchResults>> + Send + '_>> {
        Box::pin(async move {
            let batch = BatchPayload::from_bytes(&payload)?;
            debug!(batch = %batch.batch_id, tasks = batch.tasks.len(), "running batch locally");

            let mut running = JoinSet::new();
            for request in batch.tasks {
                let limit = Arc::clone(&self.limit);
                let fs = Arc::clone(&self.fs);
                let command = self.command_line(&request);

                running.spawn(async move {
                    let _permit = limit.acquire_owned().await.ok();
                    let result = run_client_script(&request, &command, fs.as_ref()).await;
                    (request.id, result)
                });
            }

            let mut results = HashMap::new();
            while let Some(joined) = running.join_next().await {
                let (id, result) =
                    joined.map_err(|e| anyhow!("client script runner panicked: {e}"))?;
                results.insert(id, result);
            }

            Ok(results)
        })
    }
}

/// Run one client script to completion.
///
/// Spawn failures are reported as a failed task, not as a batch failure.
async fn run_client_script(request: &TaskRequest, command: &str, fs: &dyn FileSystem) -> TaskResult {
    info!(
        task = %request.id,
        execute = %request.execute,
        cmd = %command,
        "starting client script"
    );

    // Build a shell command appropriate for the platform.
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command);
        c
    };

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env("PACKFLOW_TASK_ID", request.id.to_string())
        .kill_on_drop(true);

    let output = match cmd.output().await {
        Ok(output) => output,
        Err(e) => {
            error!(task = %request.id, error = %e, "failed to spawn client script");
            return TaskResult::failed(format!(
                "spawning client script '{}': {e}",
                request.execute
            ));
        }
    };

    // No exit code means the process was killed by a signal.
    let exit_code = output.status.code().unwrap_or(1);

    if let Some(path) = &request.stdout_file {
        if let Err(e) = fs.write(path, &output.stdout) {
            warn!(task = %request.id, path = %path.display(), error = %e, "unable to write stdout file");
        }
    }
    if let Some(path) = &request.stderr_file {
        if let Err(e) = fs.write(path, &output.stderr) {
            warn!(task = %request.id, path = %path.display(), error = %e, "unable to write stderr file");
        }
    }

    info!(
        task = %request.id,
        exit_code,
        success = output.status.success(),
        "client script exited"
    );

    let stdout = if request.wants_output {
        String::from_utf8_lossy(&output.stdout).into_owned()
    } else {
        String::new()
    };
    let stderr = if request.wants_output || exit_code != 0 {
        String::from_utf8_lossy(&output.stderr).into_owned()
    } else {
        String::new()
    };

    TaskResult::new(exit_code, stdout, stderr)
}
