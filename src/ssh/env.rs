//! Environment injection for remote scripts
//!
//! Servers usually refuse `SSH_MSG_CHANNEL_REQUEST "env"` for anything but a
//! handful of variables, so variables are exported by a shell prologue
//! prepended to the script instead.

use std::borrow::Cow;
use std::fmt::Write;

use crate::error::{Result, SshClientError};

/// Prepend `NAME=VALUE` declarations to a script as shell exports
///
/// Each declaration is split on its first `=`; the value may contain further
/// `=` signs. Names must be plain shell identifiers (`[A-Za-z_][A-Za-z0-9_]*`)
/// and values are always quoted, so the prologue binds exactly the given
/// bytes. The first malformed declaration fails the whole call.
///
/// # Examples
/// ```
/// use sshclient::ssh::env::add_env;
///
/// let script = add_env("echo $FOO", &["FOO=bar baz"]).unwrap();
/// assert_eq!(script, "FOO='bar baz'; export FOO\necho $FOO");
///
/// // Names that would need quoting are rejected
/// assert!(add_env("true", &["BAD NAME=x"]).is_err());
/// ```
pub fn add_env<S: AsRef<str>>(script: &str, env: &[S]) -> Result<String> {
    let mut prologue = String::new();

    for (index, declaration) in env.iter().enumerate() {
        let declaration = declaration.as_ref();
        let (name, value) = declaration
            .split_once('=')
            .ok_or_else(|| SshClientError::invalid_env(index, declaration, "missing '='"))?;

        if !is_shell_identifier(name) {
            return Err(SshClientError::invalid_env(
                index,
                name,
                "shell variable name not valid",
            ));
        }

        let _ = writeln!(prologue, "{name}={}; export {name}", quote(value));
    }

    prologue.push_str(script);
    Ok(prologue)
}

/// Quote a value as a single POSIX shell word
pub fn quote(value: &str) -> Cow<'_, str> {
    shell_escape::unix::escape(Cow::Borrowed(value))
}

fn is_shell_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
        && quote(name) == name
}
