//! Script task kind: runs a shell script in the scratch directory via a
//! generated launcher and reports its exit status.

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::{FlowgridError, Result};
use crate::task::{CMD_ERR_FILE, CMD_EXIT_FILE, CMD_IN_FILE, CMD_OUT_FILE, CMD_RUN_FILE, CMD_SCRIPT_FILE};

/// Produces the launcher script the shell argv is pointed at. Implementations
/// own the whole wrapping story (stream redirection, containerization);
/// callers only append the returned path to the shell command line.
pub trait WrapperBuilder: Send + Sync {
    fn build(&self, spec: &ScriptSpec, scratch: &Path) -> Result<PathBuf>;
}

/// Wire form of a script task. `environment` is a private copy taken at
/// envelope construction; the caller's map is never touched afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptSpec {
    pub shell: Vec<String>,
    pub container: Option<String>,
    pub executable_container: bool,
    pub environment: HashMap<String, String>,
    pub stdin: Option<Vec<u8>>,
    pub script: String,
}

impl ScriptSpec {
    /// Spawn the wrapped script with cwd = scratch and wait for termination.
    /// On cancellation the subprocess is destroyed and `Cancelled` surfaces.
    pub async fn run(
        &self,
        task_name: &str,
        scratch: &Path,
        wrapper: &dyn WrapperBuilder,
        cancel: &CancellationToken,
    ) -> Result<i32> {
        let launcher = wrapper.build(self, scratch)?;

        let (program, args) = self
            .shell
            .split_first()
            .ok_or_else(|| FlowgridError::Internal("script task has an empty shell argv".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(&launcher)
            .current_dir(scratch)
            .envs(&self.environment)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        tracing::debug!(task = task_name, launcher = %launcher.display(), "Spawning script task");
        let mut child = cmd.spawn()?;

        if let Some(bytes) = &self.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(bytes).await?;
            }
        }

        tokio::select! {
            status = child.wait() => {
                let status = status?;
                let exit_status = status.code().unwrap_or(-1);
                tracing::debug!(task = task_name, exit_status, "Script task finished");
                Ok(exit_status)
            }
            _ = cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    tracing::debug!(task = task_name, error = %e, "Failed to destroy cancelled subprocess");
                }
                Err(FlowgridError::Cancelled)
            }
        }
    }
}

/// Default wrapper: a bash launcher that routes the script's streams into
/// the well-known artifact files and records the exit status. When a
/// container image is set the invocation is wrapped in `docker run`.
pub struct BashWrapper;

impl WrapperBuilder for BashWrapper {
    fn build(&self, spec: &ScriptSpec, scratch: &Path) -> Result<PathBuf> {
        std::fs::write(scratch.join(CMD_SCRIPT_FILE), &spec.script)?;
        if let Some(bytes) = &spec.stdin {
            std::fs::write(scratch.join(CMD_IN_FILE), bytes)?;
        }

        let invocation = match &spec.container {
            Some(image) => {
                let scratch_str = scratch.display();
                if spec.executable_container {
                    // the image's entrypoint is the tool; hand it the script
                    format!(
                        "docker run --rm -v {scratch_str}:{scratch_str} -w {scratch_str} {image} {CMD_SCRIPT_FILE}"
                    )
                } else {
                    format!(
                        "docker run --rm -v {scratch_str}:{scratch_str} -w {scratch_str} {image} /bin/bash {CMD_SCRIPT_FILE}"
                    )
                }
            }
            None => format!("/bin/bash {CMD_SCRIPT_FILE}"),
        };

        let stdin_redirect = if spec.stdin.is_some() {
            format!(" < {CMD_IN_FILE}")
        } else {
            String::new()
        };

        let launcher = scratch.join(CMD_RUN_FILE);
        let body = format!(
            "#!/bin/bash\n{invocation} > {CMD_OUT_FILE} 2> {CMD_ERR_FILE}{stdin_redirect}\nstatus=$?\necho $status > {CMD_EXIT_FILE}\nexit $status\n"
        );
        std::fs::write(&launcher, body)?;
        std::fs::set_permissions(&launcher, std::fs::Permissions::from_mode(0o755))?;
        Ok(launcher)
    }
}
