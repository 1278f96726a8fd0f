//! Desktop notifications into a user's session bus.

use crate::runner::{CommandResult, Runner};
use crate::users;
use crate::{Error, Result};

/// The session bus address conventionally used by notification daemons,
/// keyed by the user's numeric id.
pub fn session_bus_address(uid: u32) -> String {
    format!("unix:path=/run/user/{uid}/bus")
}

/// The `notify-send` invocation for `title` and `message`, quoted so each
/// survives word splitting as a single argument.
fn notification_command(title: &str, message: &str) -> Result<String> {
    let title = shlex::try_quote(title).map_err(|_| Error::InvalidCommand(title.to_string()))?;
    let message =
        shlex::try_quote(message).map_err(|_| Error::InvalidCommand(message.to_string()))?;
    Ok(format!("notify-send {title} {message}"))
}

/// Send a desktop notification into `user_name`'s session.
///
/// Runs `notify-send` demoted to that user, with
/// `DBUS_SESSION_BUS_ADDRESS` pointing at the session bus derived from
/// the user's uid.
pub fn notify(
    title: &str,
    message: &str,
    user_name: &str,
    log: impl FnMut(&str),
) -> Result<CommandResult> {
    let identity = users::resolve(user_name)?;
    Runner::new(notification_command(title, message)?)
        .as_user(user_name)
        .env("DBUS_SESSION_BUS_ADDRESS", session_bus_address(identity.uid))
        .run(log)
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_session_bus_address() {
        assert_eq!(session_bus_address(1000), "unix:path=/run/user/1000/bus");
    }

    #[test]
    fn test_plain_words_stay_unquoted() {
        assert_eq!(
            notification_command("T", "M").unwrap(),
            "notify-send T M"
        );
    }

    #[test]
    fn test_notification_arguments_stay_single_tokens() {
        let cmd = notification_command("Disk full", "only 1% left on /").unwrap();
        let argv = shlex::split(&cmd).unwrap();
        assert_eq!(argv, vec!["notify-send", "Disk full", "only 1% left on /"]);
    }

    #[test]
    fn test_notify_unknown_user_is_lookup_failure() {
        let e = notify("T", "M", "no-such-login-name", |_| {}).unwrap_err();
        assert!(matches!(e, Error::UserLookup(_)));
    }
}
