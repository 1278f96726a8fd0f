//! Launch a command as another user and stream its combined output.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, ExitStatus, Stdio};

use crate::cancel::CancelToken;
use crate::users::{self, UserIdentity};
use crate::{Error, Result};

/// The outcome of one [`Runner::run`].
#[derive(Debug)]
pub struct CommandResult {
    /// The (already reaped) child process handle.
    pub child: Child,
    /// Everything the child wrote to stdout and stderr, in order.
    pub output: String,
    /// The child's final exit status, unaltered.
    pub status: ExitStatus,
}

impl CommandResult {
    /// Shell-style exit code: the child's own code, or 1 when it was
    /// killed by a signal and has none.
    pub fn exit_code(&self) -> i32 {
        self.status.code().unwrap_or(1)
    }
}

/// Launch one command, optionally demoted to another user's identity.
///
/// The command string is tokenized with shell word-splitting rules and
/// spawned directly; it is never passed through an interactive shell.
#[derive(Debug)]
pub struct Runner {
    command: String,
    user: Option<String>,
    env_overrides: Vec<(String, String)>,
    cancel: Option<CancelToken>,
}

impl Runner {
    /// A runner for `command`.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            user: None,
            env_overrides: Vec::new(),
            cancel: None,
        }
    }

    /// Run as `name` instead of the current user.
    ///
    /// When the resolved uid equals the caller's effective uid this is a
    /// no-op: no privilege change happens and no identity-derived
    /// environment variables are injected.
    pub fn as_user(mut self, name: impl Into<String>) -> Self {
        self.user = Some(name.into());
        self
    }

    /// Set an extra environment variable for the child. Overrides win over
    /// both the inherited environment and identity-derived variables.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_overrides.push((key.into(), value.into()));
        self
    }

    /// Observe `token` while draining output; on cancellation the child is
    /// sent SIGTERM, its remaining output is drained, and it is reaped.
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Launch the command and observe it to completion.
    ///
    /// `log` is called once with a `Running '<command>' as '<user>'`
    /// announcement before launch, then once per non-blank output line,
    /// trimmed of surrounding whitespace, in the order the child produced
    /// them. Blank lines are skipped in the sink but preserved in
    /// [`CommandResult::output`], which is the exact concatenation of
    /// everything the child wrote to the combined stream.
    pub fn run(self, mut log: impl FnMut(&str)) -> Result<CommandResult> {
        let argv = shlex::split(&self.command)
            .filter(|argv| !argv.is_empty())
            .ok_or_else(|| Error::InvalidCommand(self.command.clone()))?;
        let user_display = self.user.clone().unwrap_or_else(users::current_username);
        log(&announcement(&argv, &user_display));

        let identity = self.user.as_deref().map(users::resolve).transpose()?;
        let euid = rustix::process::geteuid().as_raw();
        let impersonated = identity.filter(|identity| identity.uid != euid);
        let env = build_environment(
            process_environment(),
            impersonated.as_ref(),
            &self.env_overrides,
        );
        tracing::trace!(
            "environment for {:?}: {}",
            argv[0],
            env.keys().map(String::as_str).collect::<Vec<_>>().join(" ")
        );

        let (mut child, output) =
            spawn_combined(&argv, &env, impersonated.as_ref()).map_err(|source| Error::Launch {
                user: user_display,
                command: self.command.clone(),
                source,
            })?;
        let collected = drain(&mut child, output, self.cancel.as_ref(), &mut log)?;
        let status = child.wait()?;
        tracing::debug!("{:?} exited: {status}", argv[0]);
        Ok(CommandResult {
            child,
            output: collected,
            status,
        })
    }
}

/// `Running '<command>' as '<user>'`, the command colored for terminals.
fn announcement(argv: &[String], user: &str) -> String {
    format!(
        "Running '{}{}{}' as '{}'",
        anstyle::AnsiColor::Blue.render_fg(),
        argv.join(" "),
        anstyle::Reset.render(),
        user
    )
}

/// Build the environment for one launch: the current process environment,
/// then `HOME`/`LOGNAME`/`USER` from the impersonated identity (if any),
/// then the caller's overrides. Later sources win.
fn build_environment(
    base: impl IntoIterator<Item = (String, String)>,
    impersonated: Option<&UserIdentity>,
    overrides: &[(String, String)],
) -> BTreeMap<String, String> {
    let mut env: BTreeMap<String, String> = base.into_iter().collect();
    if let Some(identity) = impersonated {
        env.insert("HOME".into(), identity.home.to_string_lossy().into_owned());
        env.insert("LOGNAME".into(), identity.name.clone());
        env.insert("USER".into(), identity.name.clone());
    }
    for (key, value) in overrides {
        env.insert(key.clone(), value.clone());
    }
    env
}

/// The caller's environment, skipping entries that are not valid UTF-8.
fn process_environment() -> impl Iterator<Item = (String, String)> {
    std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
}

/// Install the demotion hook: between fork and exec the child changes its
/// group id, then its user id. The ordering is a contract of this hook;
/// setting the user id first would drop the permission needed to change
/// the group id.
#[allow(unsafe_code)]
fn demote_on_exec(cmd: &mut Command, identity: &UserIdentity) {
    use std::os::unix::process::CommandExt;

    let uid = nix::unistd::Uid::from_raw(identity.uid);
    let gid = nix::unistd::Gid::from_raw(identity.gid);
    unsafe {
        cmd.pre_exec(move || {
            nix::unistd::setgid(gid)
                .and_then(|()| nix::unistd::setuid(uid))
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, format!("{}", e)))
        });
    }
}

/// Spawn `argv` with stdout and stderr merged into a single pipe, stdin
/// null, and exactly `env` as the environment.
///
/// The command object (and with it our copies of the pipe write end) is
/// dropped on return, so the read end sees EOF as soon as the child exits.
fn spawn_combined(
    argv: &[String],
    env: &BTreeMap<String, String>,
    impersonated: Option<&UserIdentity>,
) -> std::io::Result<(Child, os_pipe::PipeReader)> {
    let (read_end, write_end) = os_pipe::pipe()?;
    let stderr_end = write_end.try_clone()?;
    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::from(write_end))
        .stderr(Stdio::from(stderr_end))
        .env_clear()
        .envs(env);
    if let Some(identity) = impersonated {
        demote_on_exec(&mut cmd, identity);
    }
    let child = cmd.spawn()?;
    Ok((child, read_end))
}

/// Read the combined stream line-by-line until it closes, forwarding
/// trimmed non-blank lines to `log` and accumulating raw lines verbatim.
///
/// The stream only closes once the child has exited and every write end
/// is gone, so nothing the child wrote can be missed; the caller joins
/// the exit status afterwards.
fn drain(
    child: &mut Child,
    output: os_pipe::PipeReader,
    cancel: Option<&CancelToken>,
    log: &mut dyn FnMut(&str),
) -> Result<String> {
    let mut reader = BufReader::new(output);
    let mut collected = String::new();
    let mut line = Vec::new();
    let mut terminated = false;
    loop {
        if let Some(token) = cancel {
            if token.is_cancelled() && !terminated {
                terminate(child);
                terminated = true;
            }
        }
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&line);
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            log(trimmed);
        }
        collected.push_str(&text);
    }
    Ok(collected)
}

/// Ask the child to shut down. ESRCH (already gone) is not an error.
fn terminate(child: &Child) {
    let pid = nix::unistd::Pid::from_raw(child.id() as i32);
    match nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => tracing::debug!("terminating child: {e}"),
    }
}
