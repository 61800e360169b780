//! Node process lifecycle
//!
//! [`NodeFleet`] launches one OS process per node with the node command-line
//! contract:
//!
//! ```text
//! <node-binary> -n <name> -p <host:port> <peer1-address> <peer2-address> ...
//! ```
//!
//! and tears the fleet down with SIGTERM, a bounded number of wait rounds,
//! then SIGKILL for anything still alive.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::{HarnessConfig, ShutdownConfig};
use crate::error::ProcessStartError;
use crate::topology::{NodeSpec, Topology};

/// Lifecycle of a node process as seen by the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Launched, not yet confirmed ready
    Starting,
    Running,
    /// Graceful signal sent
    Terminating,
    Exited,
}

/// How to launch node processes.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub binary: PathBuf,
    /// Append each node's stderr to `<dir>/<name>.stderr.log` instead of inheriting it
    pub stderr_dir: Option<PathBuf>,
}

impl LaunchOptions {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        LaunchOptions {
            binary: binary.into(),
            stderr_dir: None,
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        LaunchOptions {
            binary: config.node_binary.clone(),
            stderr_dir: config.launch.stderr_dir.clone(),
        }
    }

    pub fn with_stderr_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.stderr_dir = Some(dir.into());
        self
    }

    /// Arguments passed to the node binary for `spec`
    pub fn args_for(spec: &NodeSpec) -> Vec<String> {
        let mut args = vec![
            "-n".to_string(),
            spec.name.clone(),
            "-p".to_string(),
            spec.address.clone(),
        ];
        args.extend(spec.peers.iter().cloned());
        args
    }

    fn stderr_for(&self, name: &str) -> std::io::Result<Stdio> {
        match &self.stderr_dir {
            None => Ok(Stdio::inherit()),
            Some(dir) => {
                fs::create_dir_all(dir)?;
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(dir.join(format!("{}.stderr.log", name)))?;
                Ok(Stdio::from(file))
            }
        }
    }
}

/// Bounded shutdown budget: `wait_rounds` passes over the fleet, each waiting
/// up to `wait_window` per process, before escalating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownPolicy {
    pub wait_rounds: u32,
    pub wait_window: Duration,
}

impl Default for ShutdownPolicy {
    fn default() -> Self {
        Self::from_config(&ShutdownConfig::default())
    }
}

impl ShutdownPolicy {
    pub fn from_config(config: &ShutdownConfig) -> Self {
        ShutdownPolicy {
            wait_rounds: config.wait_rounds,
            wait_window: config.wait_window(),
        }
    }
}

/// Who left how.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Exited within the graceful budget (or had already exited)
    pub graceful: Vec<String>,
    /// Needed SIGKILL
    pub forced: Vec<String>,
    /// Still not reaped after SIGKILL
    pub stragglers: Vec<String>,
}

/// A running node process.
#[derive(Debug)]
pub struct NodeHandle {
    name: String,
    pid: Option<u32>,
    child: Child,
    state: NodeState,
    forced: bool,
    exit_status: Option<ExitStatus>,
}

impl NodeHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Whether a forced kill was issued
    pub fn was_forced(&self) -> bool {
        self.forced
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    fn mark_exited(&mut self, status: Option<ExitStatus>) {
        self.state = NodeState::Exited;
        self.exit_status = status;
    }

    /// Non-blocking exit check; updates state when the process is gone.
    fn poll_exit(&mut self) -> bool {
        if self.state == NodeState::Exited {
            return true;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.mark_exited(Some(status));
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(node = %self.name, error = %e, "cannot query process status");
                false
            }
        }
    }

    /// Wait up to `window` for the process to exit.
    async fn wait_exit(&mut self, window: Duration) -> bool {
        match timeout(window, self.child.wait()).await {
            Ok(Ok(status)) => {
                self.mark_exited(Some(status));
                true
            }
            Ok(Err(e)) => {
                // nothing left to wait on
                warn!(node = %self.name, error = %e, "wait on node process failed");
                self.mark_exited(None);
                true
            }
            Err(_) => false,
        }
    }

    // A straggler has already had its single SIGKILL.
    fn needs_kill_on_drop(&self) -> bool {
        self.state != NodeState::Exited && !self.forced
    }

    fn terminate(&mut self) {
        self.state = NodeState::Terminating;
        match self.pid {
            Some(pid) => send_sigterm(&self.name, pid),
            None => debug!(node = %self.name, "no pid, process already reaped"),
        }
    }

    fn force_kill(&mut self) {
        self.forced = true;
        if let Err(e) = self.child.start_kill() {
            warn!(node = %self.name, error = %e, "forced kill failed");
        }
    }
}

#[cfg(unix)]
fn send_sigterm(name: &str, pid: u32) {
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        debug!(node = %name, pid, error = %err, "SIGTERM not delivered");
    }
}

#[cfg(not(unix))]
fn send_sigterm(name: &str, pid: u32) {
    debug!(node = %name, pid, "no graceful signal on this platform, shutdown will escalate");
}

/// The launched fleet. Owns every node process.
#[derive(Debug)]
pub struct NodeFleet {
    handles: Vec<NodeHandle>,
}

impl NodeFleet {
    /// Launch every node in topology order.
    ///
    /// Launches are fire-and-forget: no readiness is awaited here. If any
    /// launch fails the nodes already started are killed and the error is
    /// returned, since every other node's peer list already names the
    /// missing one.
    pub async fn start_all(
        topology: &Topology,
        options: &LaunchOptions,
    ) -> Result<NodeFleet, ProcessStartError> {
        let mut fleet = NodeFleet {
            handles: Vec::with_capacity(topology.len()),
        };

        for spec in topology.list_nodes() {
            match spawn_node(spec, options) {
                Ok(handle) => {
                    info!(node = %spec.name, address = %spec.address, pid = ?handle.pid, "node started");
                    fleet.handles.push(handle);
                }
                Err(e) => {
                    error!(node = %spec.name, error = %e, "node failed to start, aborting fleet");
                    fleet.abort().await;
                    return Err(e);
                }
            }
        }

        Ok(fleet)
    }

    /// Mark all launched nodes as running once readiness has been established.
    pub fn mark_ready(&mut self) {
        for handle in &mut self.handles {
            if handle.state == NodeState::Starting {
                handle.state = NodeState::Running;
            }
        }
    }

    /// Names of nodes that have exited on their own since the last check.
    pub fn reap_exited(&mut self) -> Vec<String> {
        let mut exited = Vec::new();
        for handle in &mut self.handles {
            let was_live = matches!(handle.state, NodeState::Starting | NodeState::Running);
            if was_live && handle.poll_exit() {
                warn!(node = %handle.name, status = ?handle.exit_status, "node exited unexpectedly");
                exited.push(handle.name.clone());
            }
        }
        exited
    }

    /// Graceful-then-forced shutdown within the policy's wait budget.
    ///
    /// Every handle ends either Exited or with exactly one forced kill
    /// issued. Processes that survive even that are reported as stragglers
    /// and left alone.
    pub async fn stop_all(&mut self, policy: ShutdownPolicy) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        for handle in &mut self.handles {
            if handle.poll_exit() {
                continue;
            }
            info!(node = %handle.name, "sending SIGTERM");
            handle.terminate();
        }

        for round in 0..policy.wait_rounds {
            let mut alive = 0;
            for handle in &mut self.handles {
                if handle.state == NodeState::Terminating && !handle.wait_exit(policy.wait_window).await {
                    alive += 1;
                }
            }
            debug!(round, alive, "shutdown wait round finished");
            if alive == 0 {
                break;
            }
        }

        for handle in &mut self.handles {
            if handle.state == NodeState::Exited {
                if !handle.forced {
                    report.graceful.push(handle.name.clone());
                }
                continue;
            }

            warn!(node = %handle.name, "node ignored SIGTERM, killing it");
            handle.force_kill();
            report.forced.push(handle.name.clone());

            if !handle.wait_exit(policy.wait_window).await {
                error!(node = %handle.name, pid = ?handle.pid, "node still alive after SIGKILL");
                report.stragglers.push(handle.name.clone());
            }
        }

        info!(
            graceful = report.graceful.len(),
            forced = report.forced.len(),
            stragglers = report.stragglers.len(),
            "fleet stopped"
        );
        report
    }

    pub fn handles(&self) -> &[NodeHandle] {
        &self.handles
    }

    pub fn handle(&self, name: &str) -> Option<&NodeHandle> {
        self.handles.iter().find(|h| h.name == name)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    // Cleanup for a partially started fleet.
    async fn abort(&mut self) {
        for handle in &mut self.handles {
            handle.force_kill();
            handle.wait_exit(Duration::from_secs(1)).await;
        }
    }
}

impl Drop for NodeFleet {
    fn drop(&mut self) {
        for handle in &mut self.handles {
            if handle.needs_kill_on_drop() {
                let _ = handle.child.start_kill();
            }
        }
    }
}

fn spawn_node(spec: &NodeSpec, options: &LaunchOptions) -> Result<NodeHandle, ProcessStartError> {
    let start_error = |source| ProcessStartError {
        node: spec.name.clone(),
        binary: options.binary.clone(),
        source,
    };

    let stderr = options.stderr_for(&spec.name).map_err(start_error)?;
    let child = Command::new(resolve_binary(&options.binary))
        .args(LaunchOptions::args_for(spec))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(stderr)
        .spawn()
        .map_err(start_error)?;

    Ok(NodeHandle {
        name: spec.name.clone(),
        pid: child.id(),
        child,
        state: NodeState::Starting,
        forced: false,
        exit_status: None,
    })
}

// Bare relative paths like `./replicaStorage` are taken relative to the
// working directory rather than searched on PATH.
fn resolve_binary(binary: &Path) -> PathBuf {
    if binary.is_relative() && binary.components().count() > 1 {
        std::env::current_dir()
            .map(|cwd| cwd.join(binary))
            .unwrap_or_else(|_| binary.to_path_buf())
    } else {
        binary.to_path_buf()
    }
}
