//! Docker orchestration over SSH.
//!
//! Images are built and containers run by assembling `docker` CLI
//! invocations and executing them on the target host through the
//! session manager. There is no local Docker daemon involved.

use std::time::Duration;

use serde::Deserialize;

use crate::config::CONFIG;
use crate::models::host;
use crate::services::ssh::{shell_quote, CommandError, ExecOutput, SessionManager};

#[derive(Debug, Clone, Deserialize)]
pub struct BuildSpec {
    pub image: String,
    #[serde(default)]
    pub tag: Option<String>,
    /// Path to the Dockerfile relative to the build context; the
    /// daemon default is used when absent.
    #[serde(default)]
    pub dockerfile: Option<String>,
    pub context: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunSpec {
    pub image: String,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// "host:container" publish mappings
    #[serde(default)]
    pub ports: Vec<String>,
    /// "KEY=VALUE" environment entries
    #[serde(default)]
    pub envs: Vec<String>,
    /// "host_path:container_path" bind mounts
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default = "default_detach")]
    pub detach: bool,
}

fn default_detach() -> bool {
    true
}

fn image_ref(image: &str, tag: &Option<String>) -> String {
    let tag = tag.as_deref().filter(|t| !t.is_empty()).unwrap_or("latest");
    format!("{}:{}", image, tag)
}

/// Assemble the `docker build` command line for a build spec.
pub fn build_command(spec: &BuildSpec) -> String {
    let mut cmd = format!(
        "docker build -t {}",
        shell_quote(&image_ref(&spec.image, &spec.tag))
    );
    if let Some(dockerfile) = spec.dockerfile.as_deref().filter(|f| !f.is_empty()) {
        cmd.push_str(&format!(" -f {}", shell_quote(dockerfile)));
    }
    cmd.push_str(&format!(" {}", shell_quote(&spec.context)));
    cmd
}

/// Assemble the `docker run` command line for a run spec.
pub fn run_command(spec: &RunSpec) -> String {
    let mut cmd = String::from("docker run");
    if spec.detach {
        cmd.push_str(" -d");
    }
    if let Some(name) = spec.name.as_deref().filter(|n| !n.is_empty()) {
        cmd.push_str(&format!(" --name {}", shell_quote(name)));
    }
    for port in &spec.ports {
        cmd.push_str(&format!(" -p {}", shell_quote(port)));
    }
    for env in &spec.envs {
        cmd.push_str(&format!(" -e {}", shell_quote(env)));
    }
    for volume in &spec.volumes {
        cmd.push_str(&format!(" -v {}", shell_quote(volume)));
    }
    cmd.push_str(&format!(" {}", shell_quote(&image_ref(&spec.image, &spec.tag))));
    cmd
}

fn command_timeout() -> Duration {
    Duration::from_secs(CONFIG.command_timeout_secs)
}

/// Query the daemon on the target host. Returns the parsed `docker
/// info` JSON when the daemon answers, or the raw output on a nonzero
/// exit so the caller can surface what went wrong.
pub async fn info(
    sessions: &SessionManager,
    host: &host::Model,
) -> Result<Result<serde_json::Value, ExecOutput>, CommandError> {
    let output = sessions
        .execute(host, "docker info --format '{{json .}}'", command_timeout())
        .await?;

    if output.exit_code != 0 {
        return Ok(Err(output));
    }

    match serde_json::from_str(&output.stdout) {
        Ok(value) => Ok(Ok(value)),
        Err(_) => Ok(Err(output)),
    }
}

pub async fn build(
    sessions: &SessionManager,
    host: &host::Model,
    spec: &BuildSpec,
) -> Result<ExecOutput, CommandError> {
    let cmd = build_command(spec);
    tracing::info!(host = %host.address(), image = %image_ref(&spec.image, &spec.tag), "Building image");
    sessions.execute(host, &cmd, command_timeout()).await
}

pub async fn run(
    sessions: &SessionManager,
    host: &host::Model,
    spec: &RunSpec,
) -> Result<ExecOutput, CommandError> {
    let cmd = run_command(spec);
    tracing::info!(host = %host.address(), image = %image_ref(&spec.image, &spec.tag), "Running container");
    sessions.execute(host, &cmd, command_timeout()).await
}

/// Run an arbitrary command inside a running container.
pub async fn exec_in_container(
    sessions: &SessionManager,
    host: &host::Model,
    container: &str,
    command: &str,
) -> Result<ExecOutput, CommandError> {
    let cmd = format!(
        "docker exec {} sh -c {}",
        shell_quote(container),
        shell_quote(command)
    );
    sessions.execute(host, &cmd, command_timeout()).await
}
