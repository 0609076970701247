//! Server Instance (C4): the per-server lifecycle state machine.
//!
//! `start`/`stop`/`restart`/`delete`/reattach are serialized per instance
//! through `lifecycle_lock`; `sendCommand`/`getStatus`/`getUsages` and live
//! emission may run concurrently with one another, guarded only by the
//! short, non-blocking `state` critical section.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::stream::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::AbortHandle;

use crate::error::AgentError;
use crate::sandbox::driver::{ContainerDriver, ContainerHandle, ContainerSpec};
use crate::sandbox::events::EventBus;
use crate::sandbox::logs::LineSplitter;
use crate::sandbox::render::{compose_command, render, template_vars, write_config_file};
use crate::sandbox::types::{EventCategory, LiveEvent, LogCategory, PortMapping, ServerId, StartData, UsageStats};

pub const CONTAINER_PREFIX: &str = "dockhand_";

const START_POLL_ATTEMPTS: u32 = 15;
const START_POLL_INTERVAL_MS: u64 = 200;

struct InstanceState {
    handle: Option<ContainerHandle>,
    running: bool,
    started_at: Option<DateTime<Utc>>,
    stdin: Option<Box<dyn tokio::io::AsyncWrite + Send + Unpin>>,
}

impl Default for InstanceState {
    fn default() -> Self {
        Self {
            handle: None,
            running: false,
            started_at: None,
            stdin: None,
        }
    }
}

pub struct ServerInstance {
    pub id: ServerId,
    sandbox_root: PathBuf,
    driver: Arc<ContainerDriver>,
    events: Arc<EventBus>,
    lifecycle_lock: AsyncMutex<()>,
    state: Mutex<InstanceState>,
}

impl ServerInstance {
    pub fn new(id: ServerId, sandbox_root: PathBuf, driver: Arc<ContainerDriver>) -> Self {
        Self {
            id,
            sandbox_root,
            driver,
            events: Arc::new(EventBus::new()),
            lifecycle_lock: AsyncMutex::new(()),
            state: Mutex::new(InstanceState::default()),
        }
    }

    pub fn container_name(&self) -> String {
        format!("{CONTAINER_PREFIX}{}", self.id)
    }

    pub fn sandbox_root(&self) -> &std::path::Path {
        &self.sandbox_root
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    /// Adopts a running container found during boot-time reconciliation.
    pub fn adopt(&self, handle: ContainerHandle, started_at: Option<DateTime<Utc>>) {
        let mut state = self.state.lock().unwrap();
        state.handle = Some(handle);
        state.running = true;
        state.started_at = Some(started_at.unwrap_or_else(Utc::now));
    }

    pub async fn start(self: &Arc<Self>, start_data: StartData) -> Result<(), AgentError> {
        self.start_inner(start_data).await
    }

    async fn start_inner(self: &Arc<Self>, start_data: StartData) -> Result<(), AgentError> {
        let _guard = self.lifecycle_lock.lock().await;

        if let Some(existing) = self.state.lock().unwrap().handle.clone() {
            let _ = self.driver.remove(&existing, true).await;
        }
        {
            let mut state = self.state.lock().unwrap();
            *state = InstanceState::default();
        }

        let vars = template_vars(&start_data);
        for (name, template) in start_data.core.config_system.iter().chain(start_data.core.startup_parser.iter()) {
            let rendered = render(template, &vars);
            let path = self.sandbox_root.join(name);
            write_config_file(&path, &rendered)?;
        }

        let rendered_install = render(&start_data.core.install_script, &vars);
        let rendered_startup = render(&start_data.core.startup_command, &vars);
        let command = compose_command(&rendered_install, &rendered_startup);

        let mut pull_stream = Box::pin(self.driver.pull(&start_data.image));
        while let Some(progress) = pull_stream.next().await {
            match progress {
                Ok((status, detail)) => {
                    let message = match detail {
                        Some(d) => format!("{status} {d}"),
                        None => status,
                    };
                    self.events.emit(LiveEvent::new(EventCategory::Pull, message));
                }
                Err(e) => {
                    self.emit_error(format!("pull failed: {e}"));
                    return Err(e);
                }
            }
        }
        drop(pull_stream);

        let ports: Vec<PortMapping> = start_data
            .all_allocations()
            .into_iter()
            .map(|a| PortMapping {
                container_port: a.port,
                host_port: a.port,
                protocol: "tcp".to_string(),
            })
            .collect();

        let spec = ContainerSpec {
            name: self.container_name(),
            image: start_data.image.clone(),
            command,
            sandbox_path: self.sandbox_root.clone(),
            memory_limit_mb: Some(start_data.memory),
            cpu_limit: Some(start_data.cpu_cores()),
            env: start_data.environment.clone(),
            ports,
        };

        let handle = match self.driver.create(&spec).await {
            Ok(h) => h,
            Err(e) => {
                self.emit_error(format!("create failed: {e}"));
                return Err(e);
            }
        };

        if let Err(e) = self.driver.start(&handle).await {
            let _ = self.driver.remove(&handle, true).await;
            self.emit_error(format!("start failed: {e}"));
            return Err(e);
        }

        let mut became_running = false;
        for _ in 0..START_POLL_ATTEMPTS {
            match self.driver.inspect(&handle).await {
                Ok(info) if info.running => {
                    became_running = true;
                    self.state.lock().unwrap().started_at =
                        Some(info.started_at.unwrap_or_else(Utc::now));
                    break;
                }
                _ => tokio::time::sleep(std::time::Duration::from_millis(START_POLL_INTERVAL_MS)).await,
            }
        }

        if !became_running {
            let _ = self.driver.remove(&handle, true).await;
            let message = "container did not reach running state".to_string();
            self.emit_error(message.clone());
            return Err(AgentError::RuntimeFailed(message));
        }

        {
            let mut state = self.state.lock().unwrap();
            state.handle = Some(handle.clone());
            state.running = true;
        }
        self.emit_status("Servidor em execução.".to_string());

        match self.driver.attach(&handle).await {
            Ok(attached) => {
                self.state.lock().unwrap().stdin = Some(attached.input);
                self.spawn_attach_drain(attached.output);
            }
            Err(e) => {
                tracing::warn!(server = %self.id, error = %e, "stdio attach failed after start, commands will fail until reattach");
            }
        }

        self.spawn_wait(handle);
        Ok(())
    }

    fn spawn_attach_drain(
        self: &Arc<Self>,
        mut output: std::pin::Pin<Box<dyn futures::Stream<Item = Result<bollard::container::LogOutput, bollard::errors::Error>> + Send>>,
    ) {
        tokio::spawn(async move { while output.next().await.is_some() {} });
    }

    fn spawn_wait(self: &Arc<Self>, handle: ContainerHandle) {
        let this = self.clone();
        tokio::spawn(async move {
            let _ = this.driver.wait(&handle).await;
            let mut state = this.state.lock().unwrap();
            state.running = false;
            state.started_at = None;
            state.stdin = None;
            drop(state);
            this.emit_status("Servidor marcado como desligado".to_string());
        });
    }

    fn emit_status(&self, message: String) {
        self.events.emit(LiveEvent::new(EventCategory::Status, message));
    }

    fn emit_error(&self, message: String) {
        self.events.emit(LiveEvent::new(EventCategory::Error, message));
    }

    pub async fn send_command(self: &Arc<Self>, command: &str) -> Result<(), AgentError> {
        let needs_reattach = self.state.lock().unwrap().stdin.is_none();
        if needs_reattach {
            self.reattach().await?;
        }

        let line = if command.ends_with('\n') {
            command.to_string()
        } else {
            format!("{command}\n")
        };

        let mut stdin = {
            let mut state = self.state.lock().unwrap();
            state.stdin.take()
        }
        .ok_or(AgentError::StdinUnavailable)?;

        let result = stdin.write_all(line.as_bytes()).await;
        self.state.lock().unwrap().stdin = Some(stdin);
        result.map_err(|e| AgentError::RuntimeFailed(format!("write to stdin failed: {e}")))?;

        self.events.emit(LiveEvent::new(EventCategory::Command, command.to_string()));
        Ok(())
    }

    async fn reattach(self: &Arc<Self>) -> Result<(), AgentError> {
        let handle = self
            .state
            .lock()
            .unwrap()
            .handle
            .clone()
            .ok_or(AgentError::StdinUnavailable)?;
        let attached = self.driver.attach(&handle).await.map_err(|_| AgentError::StdinUnavailable)?;
        self.state.lock().unwrap().stdin = Some(attached.input);
        self.spawn_attach_drain(attached.output);
        Ok(())
    }

    pub async fn stop(self: &Arc<Self>, command: Option<&str>) {
        let _guard = self.lifecycle_lock.lock().await;
        self.emit_status("parando servidor".to_string());

        let stop_cmd = command.unwrap_or("stop");
        if self.send_command(stop_cmd).await.is_err() {
            self.kill_inner().await;
        }
    }

    pub async fn kill(self: &Arc<Self>) {
        let _guard = self.lifecycle_lock.lock().await;
        self.kill_inner().await;
    }

    async fn kill_inner(&self) {
        let handle = self.state.lock().unwrap().handle.clone();
        if let Some(handle) = handle {
            self.driver.kill(&handle).await;
        }
    }

    pub async fn restart(self: &Arc<Self>, start_data: StartData) -> Result<(), AgentError> {
        self.stop(None).await;
        self.start_inner(start_data).await
    }

    pub async fn delete(self: &Arc<Self>) -> Result<(), AgentError> {
        let _guard = self.lifecycle_lock.lock().await;
        self.kill_inner().await;

        let handle = self.state.lock().unwrap().handle.clone();
        if let Some(handle) = handle {
            let _ = self.driver.remove(&handle, true).await;
        }

        {
            let mut state = self.state.lock().unwrap();
            *state = InstanceState::default();
        }

        if self.sandbox_root.exists() {
            std::fs::remove_dir_all(&self.sandbox_root)
                .map_err(|e| AgentError::RuntimeFailed(format!("removing sandbox dir: {e}")))?;
        }
        Ok(())
    }

    /// Authoritative: inspects the runtime, synchronizing `running` and
    /// `started_at`. On inspect failure treats the instance as stopped and
    /// drops the handle.
    pub async fn get_status(&self) -> bool {
        let handle = self.state.lock().unwrap().handle.clone();
        let Some(handle) = handle else { return false };

        match self.driver.inspect(&handle).await {
            Ok(info) => {
                let mut state = self.state.lock().unwrap();
                state.running = info.running;
                state.started_at = if info.running { info.started_at.or(state.started_at) } else { None };
                info.running
            }
            Err(_) => {
                let mut state = self.state.lock().unwrap();
                state.running = false;
                state.started_at = None;
                state.handle = None;
                false
            }
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().unwrap().started_at
    }

    pub async fn get_usages(&self) -> Result<UsageStats, AgentError> {
        let handle = self
            .state
            .lock()
            .unwrap()
            .handle
            .clone()
            .ok_or_else(|| AgentError::NotFound(self.id.clone()))?;

        let raw = self.driver.stats(&handle).await?;

        let cpu_delta = raw.cpu_total_usage as i64 - raw.precpu_total_usage as i64;
        let sys_delta = raw.cpu_system_usage as i64 - raw.precpu_system_usage as i64;
        let cpu_percent = if cpu_delta > 0 && sys_delta > 0 {
            let pct = (cpu_delta as f64 / sys_delta as f64) * raw.online_cpus as f64 * 100.0;
            (pct * 100.0).round() / 100.0
        } else {
            0.0
        };

        Ok(UsageStats {
            cpu_percent,
            memory_bytes: raw.memory_usage_bytes,
            memory_limit_bytes: raw.memory_limit_bytes,
            network_in_bytes: None,
            network_out_bytes: None,
            disk_bytes: None,
        })
    }

    /// Starts following container logs; `on_line` is invoked for each
    /// complete line in arrival order. Returns a handle whose `stop()` is
    /// idempotent cleanup.
    pub fn stream_docker_logs(
        self: &Arc<Self>,
        tail: u32,
        on_line: impl Fn(LogCategory, String) + Send + Sync + 'static,
    ) -> LogStreamHandle {
        let this = self.clone();
        let cleanup = crate::sandbox::logs::CleanupOnce::new();
        let cleanup_clone = cleanup.clone();

        let join = tokio::spawn(async move {
            let handle = match this.state.lock().unwrap().handle.clone() {
                Some(h) => h,
                None => return,
            };
            let mut stream = Box::pin(this.driver.logs(&handle, true, Some(tail)));
            let mut splitter = LineSplitter::new();

            while let Some(item) = stream.next().await {
                match item {
                    Ok(output) => {
                        let (category, bytes) = classify_log_output(&output);
                        for line in splitter.feed(category, bytes) {
                            on_line(category, line);
                        }
                    }
                    Err(_) => break,
                }
            }
            cleanup_clone.fire();
        });

        LogStreamHandle {
            abort: join.abort_handle(),
            cleanup,
        }
    }
}

fn classify_log_output(output: &bollard::container::LogOutput) -> (LogCategory, &[u8]) {
    use bollard::container::LogOutput;
    match output {
        LogOutput::StdOut { message } => (LogCategory::Stdout, message.as_ref()),
        LogOutput::Console { message } => (LogCategory::Stdout, message.as_ref()),
        LogOutput::StdErr { message } => (LogCategory::Stderr, message.as_ref()),
        LogOutput::StdIn { message } => (LogCategory::Stdout, message.as_ref()),
    }
}

pub struct LogStreamHandle {
    abort: AbortHandle,
    cleanup: crate::sandbox::logs::CleanupOnce,
}

impl LogStreamHandle {
    /// Idempotent: safe to call from multiple cancellation paths.
    pub fn stop(&self) {
        if self.cleanup.fire() {
            self.abort.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_start_data() -> StartData {
        StartData {
            memory: 1024,
            cpu: 1000,
            disk: 2048,
            environment: HashMap::new(),
            primary_allocation: crate::sandbox::types::Allocation {
                ip: "0.0.0.0".to_string(),
                port: 25565,
            },
            additional_allocations: vec![],
            image: "itzg/minecraft-server".to_string(),
            core: crate::sandbox::types::Core {
                install_script: String::new(),
                startup_command: "java -jar server.jar".to_string(),
                stop_command: Some("stop".to_string()),
                config_system: HashMap::new(),
                startup_parser: HashMap::new(),
            },
        }
    }

    #[test]
    fn cpu_cores_converts_from_tenths_of_percent() {
        let data = sample_start_data();
        assert_eq!(data.cpu_cores(), 1.0);
    }

    #[test]
    fn all_allocations_includes_primary_first() {
        let mut data = sample_start_data();
        data.additional_allocations.push(crate::sandbox::types::Allocation {
            ip: "0.0.0.0".to_string(),
            port: 25566,
        });
        let allocations = data.all_allocations();
        assert_eq!(allocations.len(), 2);
        assert_eq!(allocations[0].port, 25565);
    }
}
