//! Resolving login names via the system user database.

use std::path::PathBuf;

use uzers::os::unix::UserExt;

use crate::{Error, Result};

/// An account record resolved from the system user database.
///
/// Looked up once per operation and discarded afterwards; never cached.
#[derive(Debug, Clone)]
pub struct UserIdentity {
    /// Numeric user id.
    pub uid: u32,
    /// Numeric id of the primary group.
    pub gid: u32,
    /// Home directory.
    pub home: PathBuf,
    /// Canonical login name.
    pub name: String,
}

/// Look up `name` in the system user database.
///
/// A missing account is a hard error; privilege demotion depends on the
/// result, so it propagates to the caller instead of being swallowed.
pub fn resolve(name: &str) -> Result<UserIdentity> {
    let user = uzers::get_user_by_name(name).ok_or_else(|| Error::UserLookup(name.to_string()))?;
    Ok(UserIdentity {
        uid: user.uid(),
        gid: user.primary_group_id(),
        home: user.home_dir().to_path_buf(),
        name: user.name().to_string_lossy().into_owned(),
    })
}

/// The login name this process runs as, or `-` if it cannot be determined.
pub(crate) fn current_username() -> String {
    uzers::get_current_username()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_missing_user() {
        let e = resolve("no-such-login-name").unwrap_err();
        assert!(matches!(e, Error::UserLookup(ref name) if name == "no-such-login-name"));
    }

    #[test]
    fn test_resolve_root() {
        let id = resolve("root").unwrap();
        assert_eq!(id.uid, 0);
        assert_eq!(id.name, "root");
    }

    #[test]
    fn test_current_username_is_nonempty() {
        assert!(!current_username().is_empty());
    }
}
