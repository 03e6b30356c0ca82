// src/jobs/client_script.rs

//! Jobs that run client scripts through the task backend.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobMatcher};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::{Context, Replacements};
use crate::errors::{PackflowError, Result};
use crate::exec::Task;
use crate::jobs::decision::Choice;
use crate::jobs::{Job, JobOutcome, JobServices};
use crate::store::{TaskRecord, retrying};

/// Highest task exit code; a job without tasks succeeded.
pub fn aggregate_exit_code(tasks: &[Task]) -> i32 {
    tasks
        .iter()
        .map(|task| task.exit_code.unwrap_or(1))
        .max()
        .unwrap_or(0)
}

/// File-level replacement values for one file of a package.
pub fn file_replacements(package_dir: &Path, file: &Path) -> Context {
    let relative = file.strip_prefix(package_dir).unwrap_or(file);
    let extension = file
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();
    let with_dot = if extension.is_empty() {
        String::new()
    } else {
        format!(".{extension}")
    };

    let mut values = Context::new();
    values.insert("%fileUUID%", Uuid::new_v4().to_string());
    values.insert("%relativeLocation%", relative.to_string_lossy());
    values.insert("%inputFile%", file.to_string_lossy());
    values.insert(
        "%fileName%",
        file.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
    );
    values.insert("%fileExtension%", extension);
    values.insert("%fileExtensionWithDot%", with_dot);
    values.insert(
        "%fileDirectory%",
        file.parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default(),
    );
    values
}

impl Job {
    pub(crate) async fn run_directory(&mut self, services: &JobServices) -> Result<JobOutcome> {
        let replacements = self.replacements(services);
        let task = self.build_task(services, &replacements, false)?;
        let tasks = self.submit_and_wait(services, vec![task]).await?;
        let exit_code = aggregate_exit_code(&tasks);

        if services.settings.stage_transition_link.as_deref() == Some(self.link.id.as_str()) {
            let package_id = self.package_id();
            info!(package = %package_id, link = %self.link.id, "transitioning package stage");
            retrying(&services.settings.retry, "transition_stage", || {
                services.store.transition_stage(package_id)
            })
            .await;
        }

        Ok(JobOutcome::Completed(exit_code))
    }

    pub(crate) async fn run_files(&mut self, services: &JobServices) -> Result<JobOutcome> {
        let config = &self.link.config;
        let package_dir = self.package().current_path();
        let root = match &config.filter_subdir {
            Some(sub) => package_dir.join(sub),
            None => package_dir.clone(),
        };

        let matcher = config
            .filter_pattern
            .as_deref()
            .map(compile_filter)
            .transpose()?;

        let choices_file = services.choices.source_file(&package_dir);
        let files: Vec<PathBuf> = services
            .fs
            .walk_files(&root)?
            .into_iter()
            .filter(|file| choices_file.as_ref() != Some(file))
            .filter(|file| {
                matcher.as_ref().is_none_or(|m| {
                    m.is_match(file.strip_prefix(&package_dir).unwrap_or(file))
                })
            })
            .collect();

        if files.is_empty() {
            info!(
                job = %self.id,
                link = %self.link.id,
                root = %root.display(),
                "no files to process"
            );
            return Ok(JobOutcome::Completed(0));
        }

        debug!(job = %self.id, files = files.len(), "building one task per file");

        let base = self.replacements(services);
        let tasks = files
            .iter()
            .map(|file| {
                let replacements = base.with_overlay(&file_replacements(&package_dir, file));
                self.build_task(services, &replacements, false)
            })
            .collect::<Result<Vec<_>>>()?;

        let tasks = self.submit_and_wait(services, tasks).await?;
        Ok(JobOutcome::Completed(aggregate_exit_code(&tasks)))
    }

    /// Runs one task whose stdout (a JSON object of value -> description)
    /// becomes the choices of a later output decision.
    pub(crate) async fn run_output_client_script(
        &mut self,
        services: &JobServices,
    ) -> Result<JobOutcome> {
        let replacements = self.replacements(services);
        let task = self.build_task(services, &replacements, true)?;
        let tasks = self.submit_and_wait(services, vec![task]).await?;
        let mut exit_code = aggregate_exit_code(&tasks);

        if exit_code == 0 {
            let stdout = tasks.first().map(|t| t.stdout.trim()).unwrap_or_default();
            match serde_json::from_str::<BTreeMap<String, String>>(stdout) {
                Ok(generated) => {
                    let choices: Vec<Choice> = generated
                        .into_iter()
                        .map(|(value, description)| Choice { value, description })
                        .collect();
                    debug!(job = %self.id, choices = choices.len(), "stored generated choices");
                    self.chain.set_generated_choices(choices);
                }
                Err(e) => {
                    warn!(
                        job = %self.id,
                        link = %self.link.id,
                        error = %e,
                        "client script output is not a choice map"
                    );
                    exit_code = 1;
                }
            }
        }

        Ok(JobOutcome::Completed(exit_code))
    }

    /// Package replacements with the chain context layered on top.
    fn replacements(&self, services: &JobServices) -> Replacements {
        let package_values = self
            .package()
            .replacement_values(&services.settings.shared_path);
        Replacements::new(&package_values, self.chain.context())
    }

    fn build_task(
        &self,
        services: &JobServices,
        replacements: &Replacements,
        wants_output: bool,
    ) -> Result<Task> {
        let config = &self.link.config;
        let execute = config.execute.as_deref().ok_or_else(|| {
            PackflowError::WorkflowError(format!("link '{}' has no execute", self.link.id))
        })?;

        let arguments = replacements.render_arguments(config.arguments.as_deref().unwrap_or(""));
        let capture = |template: &Option<String>| {
            template
                .as_deref()
                .map(|t| PathBuf::from(replacements.render_path(t)))
        };

        Ok(Task::new(self.id, execute, arguments)
            .with_capture_files(capture(&config.stdout_file), capture(&config.stderr_file))
            .with_context(replacements.as_context())
            .with_wants_output(wants_output || services.settings.capture_output))
    }

    /// Hand `tasks` to the backend, wait for all of them and persist the
    /// results.
    async fn submit_and_wait(
        &mut self,
        services: &JobServices,
        tasks: Vec<Task>,
    ) -> Result<Vec<Task>> {
        let count = tasks.len();
        let mut submit_error = None;
        for task in tasks {
            if let Err(e) = services.backend.submit_task(self.id, task) {
                submit_error = Some(e);
                break;
            }
        }

        if let Some(e) = submit_error {
            // Release whatever the backend already holds for this job.
            let _ = services.backend.wait_for_results(self.id).await;
            return Err(e);
        }

        debug!(job = %self.id, tasks = count, "tasks submitted; waiting for results");
        let finished = services.backend.wait_for_results(self.id).await?;

        let records: Vec<TaskRecord> = finished.iter().map(TaskRecord::from).collect();
        let job_id = self.id;
        retrying(&services.settings.retry, "tasks_finished", || {
            services.store.tasks_finished(job_id, &records)
        })
        .await;
        self.tasks.extend(records);

        Ok(finished)
    }
}

fn compile_filter(pattern: &str) -> Result<GlobMatcher> {
    Glob::new(pattern)
        .map(|glob| glob.compile_matcher())
        .map_err(|e| PackflowError::WorkflowError(format!("invalid filter_pattern '{pattern}': {e}")))
}
