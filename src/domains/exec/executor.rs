use super::allowlist::Allowlist;
use super::environment::build_environment;
use crate::config::MAX_COMMAND_TIMEOUT_SECS;
use crate::errors::WerkbankError;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

/// Outcome of one external command execution. Produced once, never persisted.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub command: String,
    pub duration: Duration,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }
}

/// The only permitted way to invoke an external process from the engine.
///
/// Guarantees: argv is passed directly to process-create (no shell, so
/// metacharacters are inert bytes), the command name must be on the probed
/// allow-list, the environment is rebuilt from a safe baseline, the working
/// directory is confined to the project root, and every run is bounded by a
/// timeout enforced against the whole process group.
pub struct SecureExecutor {
    allowlist: Allowlist,
    project_root: PathBuf,
    default_timeout: Duration,
    debug: bool,
}

const TERM_GRACE: Duration = Duration::from_millis(500);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

impl SecureExecutor {
    pub fn new(project_root: PathBuf, default_timeout: Duration, debug: bool) -> Self {
        let allowlist = Allowlist::probe(&project_root);
        Self {
            allowlist,
            project_root,
            default_timeout,
            debug,
        }
    }

    pub fn allowed_commands(&self) -> std::collections::BTreeSet<String> {
        self.allowlist.allowed_commands()
    }

    pub fn command_allowed(&self, argv: &[String]) -> bool {
        self.allowlist.command_allowed(argv)
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn execute(
        &self,
        argv: &[String],
        env: &HashMap<String, String>,
        chdir: Option<&Path>,
        timeout: Option<Duration>,
    ) -> Result<CommandResult, WerkbankError> {
        if argv.is_empty() {
            return Err(WerkbankError::invalid_argument(
                "argv",
                "command argument list is empty",
            ));
        }

        let timeout = timeout.unwrap_or(self.default_timeout);
        let secs = timeout.as_secs_f64();
        if secs <= 0.0 || secs > MAX_COMMAND_TIMEOUT_SECS as f64 {
            return Err(WerkbankError::invalid_argument(
                "timeout",
                format!("must be within (0, {MAX_COMMAND_TIMEOUT_SECS}] seconds, got {secs}"),
            ));
        }

        let Some(program) = self.allowlist.resolve(&argv[0]) else {
            log::warn!("Rejected command not on allow-list: {}", argv[0]);
            return Err(WerkbankError::CommandNotAllowed {
                command: argv[0].clone(),
            });
        };

        let sanitized_env = build_environment(env)?;
        let cwd = self.resolve_chdir(chdir)?;
        let display = argv.join(" ");

        log::info!(
            "exec start: '{display}' (cwd: {}, timeout: {}s)",
            cwd.display(),
            timeout.as_secs()
        );
        if self.debug {
            log::debug!("exec env overlay: {} caller pair(s)", env.len());
        }

        let started = Instant::now();
        let mut child = self.spawn(program, &argv[1..], &sanitized_env, &cwd, &display)?;

        let stdout_reader = spawn_pipe_reader(child.stdout.take());
        let stderr_reader = spawn_pipe_reader(child.stderr.take());

        let exit_status = match self.wait_with_deadline(&mut child, started, timeout) {
            Some(status) => status,
            None => {
                // Deadline hit: terminate the whole process group, give it a
                // short grace window, then kill outright. The result on this
                // path is always the timeout error, never partial output.
                self.terminate_group(&mut child);
                let _ = stdout_reader.join();
                let _ = stderr_reader.join();
                let duration = started.elapsed();
                log::warn!(
                    "exec timeout: '{display}' after {}ms (limit {}s)",
                    duration.as_millis(),
                    timeout.as_secs()
                );
                return Err(WerkbankError::CommandTimedOut {
                    command: display,
                    timeout_secs: timeout.as_secs(),
                });
            }
        };

        let stdout = join_pipe_reader(stdout_reader);
        let stderr = join_pipe_reader(stderr_reader);
        let duration = started.elapsed();

        log::info!(
            "exec done: '{display}' exit={exit_status:?} duration={}ms",
            duration.as_millis()
        );

        Ok(CommandResult {
            exit_status,
            stdout,
            stderr,
            command: display,
            duration,
        })
    }

    fn resolve_chdir(&self, chdir: Option<&Path>) -> Result<PathBuf, WerkbankError> {
        let Some(relative) = chdir else {
            return Ok(self.project_root.clone());
        };

        let joined = if relative.is_absolute() {
            relative.to_path_buf()
        } else {
            self.project_root.join(relative)
        };
        let root = self
            .project_root
            .canonicalize()
            .unwrap_or_else(|_| self.project_root.clone());
        let resolved = joined.canonicalize().map_err(|_| {
            WerkbankError::invalid_argument(
                "chdir",
                format!("'{}' does not exist as a directory", joined.display()),
            )
        })?;

        if !resolved.starts_with(&root) {
            return Err(WerkbankError::PathEscape {
                path: relative.display().to_string(),
            });
        }
        if !resolved.is_dir() {
            return Err(WerkbankError::invalid_argument(
                "chdir",
                format!("'{}' is not a directory", resolved.display()),
            ));
        }
        Ok(resolved)
    }

    fn spawn(
        &self,
        program: &Path,
        args: &[String],
        env: &HashMap<String, String>,
        cwd: &Path,
        display: &str,
    ) -> Result<Child, WerkbankError> {
        use std::os::unix::process::CommandExt;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .env_clear()
            .envs(env)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Own process group so the timeout watchdog can signal children
            // the command spawned as well.
            .process_group(0);

        cmd.spawn().map_err(|e| {
            log::warn!("exec spawn failed: '{display}': {e}");
            WerkbankError::CommandFailed {
                command: display.to_string(),
                message: format!("failed to spawn: {e}"),
            }
        })
    }

    fn wait_with_deadline(
        &self,
        child: &mut Child,
        started: Instant,
        timeout: Duration,
    ) -> Option<Option<i32>> {
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Some(status.code()),
                Ok(None) => {
                    if started.elapsed() >= timeout {
                        return None;
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    log::warn!("exec wait error: {e}");
                    return Some(None);
                }
            }
        }
    }

    fn terminate_group(&self, child: &mut Child) {
        let pgid = Pid::from_raw(child.id() as i32);

        // The process may exit between signals; ESRCH here is expected and
        // must not propagate.
        if let Err(e) = killpg(pgid, Signal::SIGTERM) {
            log::debug!("SIGTERM to group {pgid} failed: {e}");
        }

        let grace_deadline = Instant::now() + TERM_GRACE;
        while Instant::now() < grace_deadline {
            if matches!(child.try_wait(), Ok(Some(_))) {
                return;
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        if let Err(e) = killpg(pgid, Signal::SIGKILL) {
            log::debug!("SIGKILL to group {pgid} failed: {e}");
        }
        let _ = child.wait();
    }
}

fn spawn_pipe_reader<R: Read + Send + 'static>(
    pipe: Option<R>,
) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

fn join_pipe_reader(handle: std::thread::JoinHandle<Vec<u8>>) -> String {
    let bytes = handle.join().unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}
