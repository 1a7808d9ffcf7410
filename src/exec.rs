//! Namespace-scoped iptables command execution
//!
//! This module is the single seam between the reconciliation engine and the
//! external `iptables` binary. Every invocation is attached to the target
//! network namespace with `setns(2)` before exec, so rules are always read
//! and written inside the container's filter table, never the host's.
//!
//! # Execution Strategy
//!
//! - Commands are built with [`tokio::process::Command`]; arguments are
//!   passed directly without shell interpretation
//! - A `pre_exec` hook moves the spawned child into the namespace referenced
//!   by `/proc/<pid>/ns/net` before `iptables` runs
//! - Every invocation carries `-w` so iptables blocks on the xtables lock
//!   instead of failing under concurrent mutation
//!
//! # Environment Variables
//!
//! - `NSGARD_IPTABLES`: Override the iptables binary (absolute path or name
//!   resolved via PATH). Used by the integration tests to substitute a
//!   stateful mock.
//!
//! - `NSGARD_TEST_NO_SETNS`: Skip namespace attachment entirely (for testing
//!   only; the mock iptables has no namespace to enter).
//!
//! # Security
//!
//! Arguments are passed directly to `iptables` without shell interpretation.
//! Callers must validate chain and ipset names before building rule specs;
//! see [`crate::validators`].

use std::os::fd::OwnedFd;
use std::process::Stdio;
use tokio::process::Command;

use crate::netns::NetnsPath;

/// Captured result of one iptables invocation
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Whether the process exited with status zero
    pub success: bool,
    /// Raw exit code, when the process exited normally
    pub exit_code: Option<i32>,
    /// Captured standard output (lossy UTF-8)
    pub stdout: String,
    /// Captured standard error (lossy UTF-8)
    pub stderr: String,
}

impl RunOutput {
    /// Combined stdout + stderr, for diagnostics that iptables may print to
    /// either stream depending on version
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }

    /// Clean success: exit zero and nothing printed on either stream
    pub fn is_clean(&self) -> bool {
        self.success && self.stdout.is_empty() && self.stderr.is_empty()
    }
}

impl From<std::process::Output> for RunOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
        }
    }
}

/// Abstraction over namespace-scoped iptables invocations
///
/// Production code uses [`NetnsRunner`]. Tests substitute a stateful mock so
/// the reconciliation protocol can be exercised without privileges or a real
/// namespace (see `core::test_helpers`).
pub trait IptablesRunner: Send + Sync {
    /// Runs iptables with the given arguments inside the target namespace,
    /// capturing exit status and both output streams.
    fn run(
        &self,
        args: &[&str],
    ) -> impl std::future::Future<Output = std::io::Result<RunOutput>> + Send;

    /// Human-readable label of the namespace all invocations target,
    /// embedded in error context
    fn namespace(&self) -> &str;
}

/// Production [`IptablesRunner`] that attaches each invocation to a network
/// namespace via `setns(2)`
#[derive(Debug, Clone)]
pub struct NetnsRunner {
    netns: NetnsPath,
    binary: String,
}

impl NetnsRunner {
    /// Creates a runner scoped to the given namespace.
    ///
    /// The iptables binary defaults to `iptables` on PATH and can be
    /// overridden with `NSGARD_IPTABLES`.
    pub fn new(netns: NetnsPath) -> Self {
        let binary =
            std::env::var("NSGARD_IPTABLES").unwrap_or_else(|_| "iptables".to_string());
        Self { netns, binary }
    }

    /// The namespace this runner targets
    pub fn netns(&self) -> &NetnsPath {
        &self.netns
    }

    fn attach_namespace(&self, cmd: &mut Command) -> std::io::Result<()> {
        if std::env::var_os("NSGARD_TEST_NO_SETNS").is_some() {
            return Ok(());
        }

        // The namespace file is opened in the parent so a stale path fails
        // here, with a useful error, rather than inside the forked child.
        let ns_file = std::fs::File::open(self.netns.as_path())?;
        let ns_fd: OwnedFd = ns_file.into();

        // SAFETY: setns is async-signal-safe; the closure only consumes the
        // fd captured above and performs no allocation.
        unsafe {
            cmd.pre_exec(move || {
                nix::sched::setns(&ns_fd, nix::sched::CloneFlags::CLONE_NEWNET)
                    .map_err(std::io::Error::from)
            });
        }
        Ok(())
    }
}

impl IptablesRunner for NetnsRunner {
    async fn run(&self, args: &[&str]) -> std::io::Result<RunOutput> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        self.attach_namespace(&mut cmd)?;

        let output = cmd.output().await?;
        Ok(RunOutput::from(output))
    }

    fn namespace(&self) -> &str {
        self.netns.key()
    }
}
