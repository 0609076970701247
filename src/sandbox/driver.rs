//! Container Driver (C3): the concrete backend is the Docker Engine API
//! over the local UNIX socket, via `bollard`.
//!
//! Operations here are responsibility-level, not 1:1 RPC wrappers — the
//! shape (pull progress as a lazy sequence, attach as a duplex byte stream,
//! wait resolving on exit) mirrors how the teacher's `ProcessSupervisor`
//! exposes a child process, generalized to a real container boundary.

use std::collections::HashMap;

use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config as ContainerConfig,
    CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding, PortMap};
use bollard::Docker;
use chrono::{DateTime, Utc};
use futures::stream::{Stream, StreamExt};

use crate::error::AgentError;
use crate::sandbox::types::PortMapping;

const WORKDIR: &str = "/home/hightd";
const LOG_MAX_SIZE: &str = "70k";

/// Opaque reference to one container. The id is the Docker container id
/// (or name, pre-create); callers never interpret it.
#[derive(Debug, Clone)]
pub struct ContainerHandle(pub String);

#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: String,
    pub sandbox_path: std::path::PathBuf,
    pub memory_limit_mb: Option<u64>,
    pub cpu_limit: Option<f64>,
    pub env: HashMap<String, String>,
    pub ports: Vec<PortMapping>,
}

#[derive(Debug, Clone)]
pub struct InspectResult {
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct RawStats {
    pub cpu_total_usage: u64,
    pub precpu_total_usage: u64,
    pub cpu_system_usage: u64,
    pub precpu_system_usage: u64,
    pub online_cpus: u64,
    pub memory_usage_bytes: u64,
    pub memory_limit_bytes: u64,
}

pub struct ContainerDriver {
    docker: Docker,
}

impl ContainerDriver {
    pub fn connect() -> Result<Self, AgentError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| AgentError::RuntimeFailed(format!("docker connect failed: {e}")))?;
        Ok(Self { docker })
    }

    /// Streams pull progress events. Each yielded item is the image tag and
    /// status/progress text reported by the engine; the caller feeds these
    /// into the Live Event Bus under category `pull`.
    pub fn pull(
        &self,
        image: &str,
    ) -> impl Stream<Item = Result<(String, Option<String>), AgentError>> + '_ {
        let options = Some(CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        });
        self.docker.create_image(options, None, None).map(|item| {
            item.map(|info| (info.status.unwrap_or_default(), info.progress))
                .map_err(|e| AgentError::RuntimeFailed(format!("pull failed: {e}")))
        })
    }

    pub async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle, AgentError> {
        let mut port_bindings: PortMap = HashMap::new();
        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
        for mapping in &spec.ports {
            for proto in ["tcp", "udp"] {
                let key = format!("{}/{proto}", mapping.container_port);
                exposed_ports.insert(key.clone(), HashMap::new());
                port_bindings.insert(
                    key,
                    Some(vec![PortBinding {
                        host_ip: Some("0.0.0.0".to_string()),
                        host_port: Some(mapping.host_port.to_string()),
                    }]),
                );
            }
        }

        let mut log_config_options = HashMap::new();
        log_config_options.insert("max-size".to_string(), LOG_MAX_SIZE.to_string());
        log_config_options.insert("max-file".to_string(), "1".to_string());

        let host_config = HostConfig {
            binds: Some(vec![format!(
                "{}:{}",
                spec.sandbox_path.display(),
                WORKDIR
            )]),
            memory: spec.memory_limit_mb.map(|mb| (mb * 1024 * 1024) as i64),
            nano_cpus: spec.cpu_limit.map(|cores| (cores * 1_000_000_000.0) as i64),
            port_bindings: Some(port_bindings),
            log_config: Some(bollard::models::HostConfigLogConfig {
                typ: Some("json-file".to_string()),
                config: Some(log_config_options),
            }),
            ..Default::default()
        };

        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();

        let config = ContainerConfig {
            image: Some(spec.image.clone()),
            cmd: Some(vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                spec.command.clone(),
            ]),
            working_dir: Some(WORKDIR.to_string()),
            env: Some(env),
            tty: Some(true),
            open_stdin: Some(true),
            stdin_once: Some(false),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| AgentError::RuntimeFailed(format!("create failed: {e}")))?;

        Ok(ContainerHandle(response.id))
    }

    pub async fn start(&self, handle: &ContainerHandle) -> Result<(), AgentError> {
        self.docker
            .start_container(&handle.0, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| AgentError::RuntimeFailed(format!("start failed: {e}")))
    }

    pub async fn inspect(&self, handle: &ContainerHandle) -> Result<InspectResult, AgentError> {
        let info = self
            .docker
            .inspect_container(&handle.0, None)
            .await
            .map_err(|e| AgentError::RuntimeFailed(format!("inspect failed: {e}")))?;

        let state = info.state.unwrap_or_default();
        let running = state.running.unwrap_or(false);
        let started_at = state
            .started_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(InspectResult { running, started_at })
    }

    pub async fn stats(&self, handle: &ContainerHandle) -> Result<RawStats, AgentError> {
        let options = bollard::container::StatsOptions {
            stream: false,
            one_shot: true,
        };
        let mut stream = self.docker.stats(&handle.0, Some(options));
        let snapshot = stream
            .next()
            .await
            .ok_or_else(|| AgentError::RuntimeFailed("no stats snapshot available".to_string()))?
            .map_err(|e| AgentError::RuntimeFailed(format!("stats failed: {e}")))?;

        let cpu = snapshot.cpu_stats;
        let precpu = snapshot.precpu_stats;
        let memory = snapshot.memory_stats;

        Ok(RawStats {
            cpu_total_usage: cpu.cpu_usage.total_usage,
            precpu_total_usage: precpu.cpu_usage.total_usage,
            cpu_system_usage: cpu.system_cpu_usage.unwrap_or(0),
            precpu_system_usage: precpu.system_cpu_usage.unwrap_or(0),
            online_cpus: cpu.online_cpus.unwrap_or(1) as u64,
            memory_usage_bytes: memory.usage.unwrap_or(0),
            memory_limit_bytes: memory.limit.unwrap_or(0),
        })
    }

    /// Single shared duplex stdio stream — TTY means stdout/stderr are not
    /// framed by stream id, matching the combined-stream semantics the
    /// console and sendCommand paths expect.
    pub async fn attach(
        &self,
        handle: &ContainerHandle,
    ) -> Result<AttachContainerResults, AgentError> {
        let options = AttachContainerOptions::<String> {
            stdin: Some(true),
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(false),
            ..Default::default()
        };
        self.docker
            .attach_container(&handle.0, Some(options))
            .await
            .map_err(|e| AgentError::RuntimeFailed(format!("attach failed: {e}")))
    }

    pub fn logs(
        &self,
        handle: &ContainerHandle,
        follow: bool,
        tail: Option<u32>,
    ) -> impl Stream<Item = Result<LogOutput, AgentError>> + '_ {
        let options = LogsOptions::<String> {
            follow,
            stdout: true,
            stderr: true,
            tail: tail.map(|n| n.to_string()).unwrap_or_else(|| "all".to_string()),
            ..Default::default()
        };
        self.docker
            .logs(&handle.0, Some(options))
            .map(|item| item.map_err(|e| AgentError::RuntimeFailed(format!("logs failed: {e}"))))
    }

    pub async fn wait(&self, handle: &ContainerHandle) -> Result<i64, AgentError> {
        let mut stream = self
            .docker
            .wait_container(&handle.0, None::<WaitContainerOptions<String>>);
        match stream.next().await {
            Some(Ok(result)) => Ok(result.status_code),
            Some(Err(e)) => Err(AgentError::RuntimeFailed(format!("wait failed: {e}"))),
            None => Ok(0),
        }
    }

    pub async fn kill(&self, handle: &ContainerHandle) {
        let options = KillContainerOptions { signal: "SIGKILL" };
        if let Err(e) = self.docker.kill_container(&handle.0, Some(options)).await {
            tracing::warn!(container = %handle.0, error = %e, "kill failed, ignoring");
        }
    }

    pub async fn remove(&self, handle: &ContainerHandle, force: bool) -> Result<(), AgentError> {
        let options = RemoveContainerOptions {
            force,
            v: true,
            ..Default::default()
        };
        match self.docker.remove_container(&handle.0, Some(options)).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
                Ok(())
            }
            Err(e) => Err(AgentError::RuntimeFailed(format!("remove failed: {e}"))),
        }
    }

    /// Looks up a container by the registry's `{prefix}{id}` naming
    /// convention, for boot-time reconciliation.
    pub async fn find_by_name(&self, name: &str) -> Result<Option<ContainerHandle>, AgentError> {
        match self.docker.inspect_container(name, None).await {
            Ok(info) => Ok(info.id.map(ContainerHandle)),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
                Ok(None)
            }
            Err(e) => Err(AgentError::RuntimeFailed(format!("inspect failed: {e}"))),
        }
    }
}
