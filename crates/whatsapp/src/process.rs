//! Lifecycle of the Node sidecar that drives WhatsApp Web.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use {
    tokio::{
        io::{AsyncBufReadExt, BufReader},
        process::{Child, Command},
    },
    tracing::{debug, error, info, warn},
};

use crate::error::{Error, Result};

const SIDECAR_DIR_ENV: &str = "WAGATE_SIDECAR_DIR";
const SIDECAR_REL_PATH: &str = "sidecar/whatsapp-web";
const ENTRY_POINT: &str = "index.js";
const STOP_GRACE: Duration = Duration::from_secs(5);
const STARTUP_PROBE: Duration = Duration::from_millis(500);

/// Handle to a running sidecar process.
pub struct SidecarProcess {
    child: Child,
    port: u16,
}

impl SidecarProcess {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// SIGTERM, then kill if the process is still around after the grace period.
    pub async fn stop(&mut self) {
        info!("stopping WhatsApp sidecar process");

        #[cfg(unix)]
        {
            use nix::{
                sys::signal::{Signal, kill},
                unistd::Pid,
            };

            if let Some(pid) = self.child.id()
                && let Ok(pid) = i32::try_from(pid)
            {
                let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
            }
        }

        #[cfg(not(unix))]
        {
            let _ = self.child.kill().await;
        }

        match tokio::time::timeout(STOP_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(?status, "WhatsApp sidecar process exited");
            },
            Ok(Err(e)) => {
                warn!(error = %e, "error waiting for sidecar process");
            },
            Err(_) => {
                warn!("sidecar process did not exit gracefully, killing");
                let _ = self.child.kill().await;
            },
        }
    }
}

impl Drop for SidecarProcess {
    fn drop(&mut self) {
        if let Some(pid) = self.child.id() {
            debug!(pid, "dropping sidecar process handle");
        }
    }
}

/// How to launch the sidecar.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Directory containing the sidecar's `package.json`.
    pub dir: PathBuf,
    pub port: u16,
    /// Where the sidecar persists the linked-device session.
    pub session_path: PathBuf,
}

/// Locate the sidecar directory.
///
/// Order: explicit path, `WAGATE_SIDECAR_DIR`, next to the executable,
/// then relative to the working directory.
pub fn find_sidecar_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    find_sidecar_dir_with(explicit, std::env::var(SIDECAR_DIR_ENV).ok())
}

fn find_sidecar_dir_with(explicit: Option<&Path>, env_dir: Option<String>) -> Result<PathBuf> {
    let is_sidecar = |p: &Path| p.join("package.json").exists();

    if let Some(path) = explicit {
        if is_sidecar(path) {
            return Ok(path.to_path_buf());
        }
        return Err(Error::Sidecar(format!(
            "sidecar directory does not exist or is missing package.json: {}",
            path.display()
        )));
    }

    if let Some(dir) = env_dir {
        let path = PathBuf::from(&dir);
        if is_sidecar(&path) {
            return Ok(path);
        }
        warn!(path = %dir, "{SIDECAR_DIR_ENV} set but package.json not found");
    }

    if let Ok(exe) = std::env::current_exe()
        && let Some(exe_dir) = exe.parent()
    {
        for prefix in ["..", "../.."] {
            let candidate = exe_dir.join(prefix).join(SIDECAR_REL_PATH);
            if is_sidecar(&candidate) {
                return Ok(candidate);
            }
        }
    }

    for prefix in [".", "..", "../.."] {
        let path = Path::new(prefix).join(SIDECAR_REL_PATH);
        if is_sidecar(&path) {
            return Ok(path.canonicalize().unwrap_or(path));
        }
    }

    Err(Error::Sidecar(format!(
        "WhatsApp sidecar not found. Set {SIDECAR_DIR_ENV} or make sure \
         {SIDECAR_REL_PATH} exists with a package.json"
    )))
}

fn has_node_modules(dir: &Path) -> bool {
    dir.join("node_modules").exists()
}

/// Spawn the sidecar and forward its output into tracing.
pub async fn start_sidecar(opts: &LaunchOptions) -> Result<SidecarProcess> {
    let dir = &opts.dir;
    if !dir.join(ENTRY_POINT).exists() {
        return Err(Error::Sidecar(format!(
            "sidecar entry point {ENTRY_POINT} missing in {}",
            dir.display()
        )));
    }

    if !has_node_modules(dir) {
        run_npm_install(dir).await?;
    }

    info!(
        path = %dir.display(),
        port = opts.port,
        "starting WhatsApp sidecar process"
    );

    let mut child = Command::new("node")
        .arg(ENTRY_POINT)
        .current_dir(dir)
        .env("WAGATE_SIDECAR_PORT", opts.port.to_string())
        .env("WAGATE_SESSION_PATH", &opts.session_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Sidecar(format!("failed to spawn sidecar process: {e}")))?;

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                forward_stdout_line(&line);
            }
        });
    }

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(target: "whatsapp_sidecar", "{}", line);
            }
        });
    }

    tokio::time::sleep(STARTUP_PROBE).await;

    match child.try_wait() {
        Ok(Some(status)) => {
            return Err(Error::Sidecar(format!(
                "sidecar process exited immediately with status: {status}"
            )));
        },
        Ok(None) => {},
        Err(e) => {
            return Err(Error::Sidecar(format!(
                "failed to check sidecar process status: {e}"
            )));
        },
    }

    info!(port = opts.port, "WhatsApp sidecar process started");

    Ok(SidecarProcess {
        child,
        port: opts.port,
    })
}

/// Pino-style JSON lines keep their level; anything else is info.
fn forward_stdout_line(line: &str) {
    if line.starts_with('{')
        && let Ok(log) = serde_json::from_str::<serde_json::Value>(line)
    {
        let msg = log.get("msg").and_then(|v| v.as_str()).unwrap_or(line);
        match pino_level(&log) {
            10 | 20 => debug!(target: "whatsapp_sidecar", "{}", msg),
            30 => info!(target: "whatsapp_sidecar", "{}", msg),
            40 => warn!(target: "whatsapp_sidecar", "{}", msg),
            _ => error!(target: "whatsapp_sidecar", "{}", msg),
        }
        return;
    }
    info!(target: "whatsapp_sidecar", "{}", line);
}

fn pino_level(log: &serde_json::Value) -> u64 {
    log.get("level").and_then(|v| v.as_u64()).unwrap_or(30)
}

async fn run_npm_install(dir: &Path) -> Result<()> {
    info!(path = %dir.display(), "running npm install for sidecar");

    let output = Command::new("npm")
        .arg("install")
        .current_dir(dir)
        .output()
        .await
        .map_err(|e| Error::Sidecar(format!("failed to run npm install: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Sidecar(format!("npm install failed: {stderr}")));
    }

    Ok(())
}
