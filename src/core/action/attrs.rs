//! Option types and statements shared by the file-like primitives.

use crate::core::action::Kind;
use crate::core::script::quote;
use crate::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt::{self, Display};
use std::sync::OnceLock;

/// A file mode in octal (`0755`) or symbolic (`u=rwx,go-w`) notation.
///
/// YAML integers are taken digit for digit, so `mode: 755` means `0755`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Mode(String);

impl Mode {
    pub fn new(mode: impl Into<String>) -> Self {
        Mode(mode.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fails unless the mode is well formed octal or symbolic notation.
    pub fn check(&self, kind: Kind) -> Result<()> {
        static MODE: OnceLock<Regex> = OnceLock::new();
        let regex = MODE.get_or_init(|| {
            Regex::new(r"^(?:[0-7]{3,4}|[ugoa]*[-+=][rwxXst]*(?:,[ugoa]*[-+=][rwxXst]*)*)$")
                .expect("mode pattern is valid")
        });
        match regex.is_match(&self.0) {
            true => Ok(()),
            false => Err(Error::invalid(
                kind,
                "mode",
                format!("`{}` is neither an octal nor a symbolic mode", self.0),
            )),
        }
    }
}

impl Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Mode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(text) => Mode(text),
            Raw::Number(number) => Mode(number.to_string()),
        })
    }
}

/// Checks an optional [Mode].
pub(crate) fn check_mode(kind: Kind, mode: Option<&Mode>) -> Result<()> {
    mode.map_or(Ok(()), |mode| mode.check(kind))
}

/// `chown` and `chgrp` statements for whichever of `owner` and `group` are set.
pub(crate) fn change_owner(
    path: &str,
    owner: Option<&str>,
    group: Option<&str>,
    flag: Option<&str>,
) -> Vec<String> {
    let flag = flag.map(|f| format!("{f} ")).unwrap_or_default();
    let path = quote(path);
    let mut statements = vec![];
    if let Some(owner) = owner {
        statements.push(format!("chown {flag}{} {path}", quote(owner)));
    }
    if let Some(group) = group {
        statements.push(format!("chgrp {flag}{} {path}", quote(group)));
    }
    statements
}

/// A `chmod` statement if `mode` is set.
pub(crate) fn change_mode(path: &str, mode: Option<&Mode>) -> Option<String> {
    mode.map(|mode| format!("chmod {mode} {}", quote(path)))
}

/// Resolves to `value` or fails with [Error::MissingOption].
pub(crate) fn required<T>(kind: Kind, key: &str, value: Option<T>) -> Result<T> {
    value.ok_or_else(|| Error::missing(kind, key))
}
