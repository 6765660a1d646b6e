//! Run the configured command once per work unit.
//!
//! Meta values reach the command as environment variables named
//! `<PREFIX>_<lowercased key>`, following the Nomad runtime convention for
//! parameterized jobs (`NOMAD_META_<key>`). The rest of the parent
//! environment is inherited and the child's output goes straight to ours.

use super::Consumer;
use crate::config::JobConfig;
use crate::error::{Error, Result};
use crate::meta::stringify;
use crate::model::WorkUnit;
use crate::telemetry::metrics;
use async_trait::async_trait;
use opentelemetry::KeyValue;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, info, warn};

pub struct CommandConsumer {
    name: String,
    job: JobConfig,
}

impl CommandConsumer {
    pub fn new(job: JobConfig) -> Self {
        Self::named("command", job)
    }

    /// A consumer with a distinct name, for running several side by side.
    pub fn named(name: impl Into<String>, job: JobConfig) -> Self {
        Self {
            name: name.into(),
            job,
        }
    }

    /// Environment variables derived from the unit's meta mapping.
    pub fn meta_env(&self, work: &WorkUnit) -> Vec<(String, String)> {
        work.meta()
            .map(|meta| {
                meta.iter()
                    .map(|(k, v)| {
                        (
                            format!("{}_{}", self.job.env_prefix, k.to_lowercase()),
                            stringify(v),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn command(&self, work: &WorkUnit) -> Command {
        let mut cmd = Command::new(&self.job.cmd);
        cmd.args(&self.job.args)
            .envs(self.meta_env(work))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        terminate_with_parent(&mut cmd);
        cmd
    }
}

#[async_trait]
impl Consumer for CommandConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<()> {
        // Stateless.
        Ok(())
    }

    async fn consume_work(&self, work: WorkUnit) -> Result<()> {
        info!(id = %work.id, consumer = %self.name, cmd = %self.job.cmd, "consuming work");

        let start = Instant::now();
        let result = match self.command(&work).status().await {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(Error::CommandFailed {
                command: self.job.cmd.clone(),
                status,
            }),
            Err(e) => Err(Error::Io(e)),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let label = if result.is_ok() { "ok" } else { "error" };
        metrics::executions().add(
            1,
            &[
                KeyValue::new("consumer", self.name.clone()),
                KeyValue::new("result", label),
            ],
        );
        metrics::execution_duration_ms().record(
            duration_ms as f64,
            &[KeyValue::new("consumer", self.name.clone())],
        );

        match &result {
            Ok(()) => debug!(id = %work.id, duration_ms, "command completed"),
            Err(e) => warn!(id = %work.id, duration_ms, error = %e, "command failed"),
        }
        result
    }
}

/// Ask the kernel to send SIGTERM to the child when this process dies.
#[cfg(target_os = "linux")]
fn terminate_with_parent(cmd: &mut Command) {
    // SAFETY: prctl is async-signal-safe and touches no parent state.
    unsafe {
        cmd.pre_exec(|| {
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(target_os = "linux"))]
fn terminate_with_parent(_cmd: &mut Command) {}
