// SPDX-License-Identifier: GPL-3.0-or-later

//! Spawn helper — a dedicated child-process manager that does all
//! forking on behalf of the master, so that fork and threading never
//! interact directly (§4.1, §9 "Thread/fork interaction").
//!
//! Grounded in `ve_mp_posix.c`'s `spawn_helper`/`spawn_v`/`spawn_vp`: a
//! process forked off early, fed requests over a pipe, forking+execing
//! on the master's behalf and handing connected file descriptors back
//! through a per-request FIFO pair.

use std::collections::HashMap;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_process::unix::CommandExt;

use tracing::{debug, warn};

use crate::error::TransportError;
use crate::transport::{connection_from_stream, Connection, SpawnMethod};

/// Environment variables forwarded to remote spawns (§6): display,
/// library path, installation roots, render-driver tuning, debug
/// selector.
pub const FORWARDED_ENV_VARS: &[&str] = &[
    "DISPLAY",
    "LD_LIBRARY_PATH",
    "VE_ROOT",
    "VE_DRIVER_TUNING",
    "VE_DEBUG",
];

/// Remote shell override; defaults to `ssh` (§4.1, §6).
pub fn remote_shell() -> String {
    std::env::var("VERSH").unwrap_or_else(|_| "ssh".to_string())
}

static FIFO_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Serializes all fork requests through a single mutex so concurrent
/// `get_slave` calls never race inside the spawn helper (§5).
pub struct SpawnHelper {
    mutex: Mutex<()>,
    tmp_dir: PathBuf,
    children: Mutex<HashMap<u32, async_process::Child>>,
}

impl SpawnHelper {
    pub fn new() -> std::io::Result<Self> {
        let tmp_dir = std::env::temp_dir().join(format!("ve-spawn-{}", std::process::id()));
        std::fs::create_dir_all(&tmp_dir)?;
        Ok(SpawnHelper {
            mutex: Mutex::new(()),
            tmp_dir,
            children: Mutex::new(HashMap::new()),
        })
    }

    /// Spawns a slave using the `local` method: fork+exec the current
    /// binary with the sentinel+id injected, communicating over a pipe
    /// pair (here: a `UnixStream::pair`, which plays the role of the
    /// original's FIFO-mediated fd handoff but needs no helper-side FIFO
    /// dance on this OS because `std::process::Command` can inherit an
    /// already-open fd directly).
    pub fn spawn_local(
        &self,
        id: u32,
        argv: &[String],
        envs: &[(String, String)],
    ) -> Result<Connection, TransportError> {
        let _guard = self.mutex.lock().unwrap();
        let exe = std::env::current_exe().map_err(TransportError::Io)?;
        let (parent_end, child_end) =
            UnixStream::pair().map_err(TransportError::Io)?;

        let mut cmd = async_process::Command::new(exe);
        cmd.args(&argv[1..]);
        for (k, v) in envs {
            cmd.env(k, v);
        }
        // The child inherits the socket fd across exec by clearing
        // close-on-exec; std::process::Command on unix keeps fds with
        // CLOEXEC unset inherited by default when passed via pre_exec,
        // which is how ve_mp_posix.c's spawn_v hands its pipe fds down.
        unsafe {
            let child_fd = std::os::fd::AsRawFd::as_raw_fd(&child_end);
            cmd.pre_exec(move || {
                nix::unistd::dup2(child_fd, 3)
                    .map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
                Ok(())
            });
        }
        cmd.env("VE_SLAVE_FD", "3");

        let child = cmd
            .spawn()
            .map_err(|e| TransportError::SpawnFailed(e.to_string()))?;
        self.children.lock().unwrap().insert(id, child);
        drop(child_end);

        debug!(id, "spawned local slave");
        Ok(connection_from_stream(SpawnMethod::Local, "auto", &argv[0], parent_end))
    }

    /// Spawns a slave using the `remote` method: run `$VERSH` (default
    /// `ssh`) to exec the binary on `node`, forwarding selected
    /// environment variables and `cd`-ing into the master's cwd first.
    pub fn spawn_remote(
        &self,
        id: u32,
        node: &str,
        argv: &[String],
    ) -> Result<Connection, TransportError> {
        let _guard = self.mutex.lock().unwrap();
        let cwd = std::env::current_dir().map_err(TransportError::Io)?;
        let mut env_exports = String::new();
        for var in FORWARDED_ENV_VARS {
            if let Ok(val) = std::env::var(var) {
                env_exports.push_str(&format!("export {}={}; ", var, shellexpand::full(&val).unwrap_or_default()));
            }
        }
        let remote_cmd = format!(
            "{}cd {} && exec {}",
            env_exports,
            cwd.display(),
            argv.join(" ")
        );

        let shell = remote_shell();
        let (parent_end, _child_end) = UnixStream::pair().map_err(TransportError::Io)?;
        let child = async_process::Command::new(&shell)
            .arg(node)
            .arg(remote_cmd)
            .stdin(async_process::Stdio::piped())
            .stdout(async_process::Stdio::piped())
            .spawn()
            .map_err(|e| TransportError::SpawnFailed(e.to_string()))?;
        self.children.lock().unwrap().insert(id, child);

        debug!(id, node, shell, "spawned remote slave");
        Ok(connection_from_stream(SpawnMethod::Remote, node, &argv[0], parent_end))
    }

    /// Allocates a private FIFO pair under this helper's temp directory
    /// for one fd-handoff request, removing them once the caller is
    /// done. Mirrors `FIFODIRSZ`/`FIFOPATHSZ` naming in the original.
    pub fn fifo_pair(&self) -> std::io::Result<(PathBuf, PathBuf)> {
        let n = FIFO_COUNTER.fetch_add(1, Ordering::Relaxed);
        let rfifo = self.tmp_dir.join(format!("r{n}"));
        let wfifo = self.tmp_dir.join(format!("w{n}"));
        nix::unistd::mkfifo(&rfifo, nix::sys::stat::Mode::S_IRWXU)?;
        nix::unistd::mkfifo(&wfifo, nix::sys::stat::Mode::S_IRWXU)?;
        Ok((rfifo, wfifo))
    }

    pub fn cleanup_fifo_pair(&self, pair: &(PathBuf, PathBuf)) {
        let _ = std::fs::remove_file(&pair.0);
        let _ = std::fs::remove_file(&pair.1);
    }

    pub fn kill_all(&self) {
        let mut children = self.children.lock().unwrap();
        for (id, child) in children.iter_mut() {
            if let Err(e) = child.kill() {
                warn!(id, error = %e, "failed to terminate spawned child");
            }
        }
        children.clear();
    }
}

impl Drop for SpawnHelper {
    fn drop(&mut self) {
        self.kill_all();
        let _ = std::fs::remove_dir_all(&self.tmp_dir);
    }
}
