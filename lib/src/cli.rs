//! # Command line interface for userdo
//!
//! Run a command demoted to another user, or push a desktop notification
//! into a user's session.

use std::ffi::OsString;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use clap::Parser;

use crate::cancel::CancelToken;
use crate::notify;
use crate::runner::Runner;

/// Perform a run operation
#[derive(Debug, Parser)]
pub(crate) struct RunOpts {
    /// Login name of the user to run as; defaults to the current user
    #[clap(long)]
    pub(crate) user: Option<String>,

    /// Extra environment variable for the command
    #[clap(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    pub(crate) env: Vec<(String, String)>,

    /// The command line to execute; quoted substrings form single arguments
    pub(crate) command: String,
}

/// Perform a notify operation
#[derive(Debug, Parser)]
pub(crate) struct NotifyOpts {
    /// Login name of the user whose session receives the notification
    #[clap(long)]
    pub(crate) user: String,

    /// Notification title
    pub(crate) title: String,

    /// Notification body
    pub(crate) message: String,
}

#[derive(Debug, Parser)]
#[clap(name = "userdo")]
#[clap(rename_all = "kebab-case")]
pub(crate) enum Opt {
    /// Run a command, optionally demoted to another user's identity.
    ///
    /// The command's stdout and stderr are merged into one stream and
    /// echoed line-by-line; the process exit code is the command's own.
    Run(RunOpts),
    /// Send a desktop notification into a user's session bus.
    Notify(NotifyOpts),
}

fn parse_env_pair(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got {s:?}"))
}

static INTERRUPT: OnceLock<CancelToken> = OnceLock::new();

extern "C" fn on_interrupt(_: libc::c_int) {
    if let Some(token) = INTERRUPT.get() {
        token.cancel();
    }
}

/// Install a SIGINT handler that trips the returned token instead of
/// killing the whole process, so an in-flight child can be shut down and
/// reaped before we exit.
#[allow(unsafe_code)]
fn interrupt_token() -> CancelToken {
    let token = INTERRUPT.get_or_init(CancelToken::new).clone();
    unsafe {
        let _ = libc::signal(
            libc::SIGINT,
            on_interrupt as extern "C" fn(libc::c_int) as libc::sighandler_t,
        );
    }
    token
}

/// Parse the provided arguments and execute, returning the process exit
/// code: the child's own code, or 130 after an interrupt.
pub fn run_from_iter<I>(args: I) -> Result<i32>
where
    I: IntoIterator,
    I::Item: Into<OsString> + Clone,
{
    run_from_opt(Opt::parse_from(args))
}

/// Internal (non-generic/monomorphized) primary CLI entrypoint
fn run_from_opt(opt: Opt) -> Result<i32> {
    let log = |line: &str| anstream::println!("{line}");
    match opt {
        Opt::Run(opts) => {
            let token = interrupt_token();
            let mut runner = Runner::new(opts.command.as_str()).cancel_token(token.clone());
            if let Some(user) = opts.user.as_deref() {
                runner = runner.as_user(user);
            }
            for (key, value) in opts.env {
                runner = runner.env(key, value);
            }
            let result = runner
                .run(log)
                .with_context(|| format!("running {:?}", opts.command))?;
            if token.is_cancelled() {
                tracing::warn!("interrupted; child shut down");
                return Ok(130);
            }
            Ok(result.exit_code())
        }
        Opt::Notify(opts) => {
            let result = notify::notify(&opts.title, &opts.message, &opts.user, log)
                .with_context(|| format!("notifying user {}", opts.user))?;
            Ok(result.exit_code())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let opt = Opt::parse_from([
            "userdo", "run", "--user", "alice", "--env", "A=1", "--env", "B=two", "echo hi",
        ]);
        let opts = match opt {
            Opt::Run(opts) => opts,
            other => panic!("expected run, got {other:?}"),
        };
        assert_eq!(opts.user.as_deref(), Some("alice"));
        assert_eq!(
            opts.env,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "two".to_string())
            ]
        );
        assert_eq!(opts.command, "echo hi");
    }

    #[test]
    fn test_parse_notify() {
        let opt = Opt::parse_from(["userdo", "notify", "--user", "alice", "Title", "Body text"]);
        let opts = match opt {
            Opt::Notify(opts) => opts,
            other => panic!("expected notify, got {other:?}"),
        };
        assert_eq!(opts.user, "alice");
        assert_eq!(opts.title, "Title");
        assert_eq!(opts.message, "Body text");
    }

    #[test]
    fn test_parse_env_pair() {
        assert_eq!(
            parse_env_pair("K=V").unwrap(),
            ("K".to_string(), "V".to_string())
        );
        assert_eq!(
            parse_env_pair("K=a=b").unwrap(),
            ("K".to_string(), "a=b".to_string())
        );
        assert!(parse_env_pair("novalue").is_err());
        assert!(parse_env_pair("=v").is_err());
    }
}
