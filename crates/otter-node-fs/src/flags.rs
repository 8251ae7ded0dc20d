//! Open-flag translation.
//!
//! Node open flags are symbolic tokens (`"r"`, `"w+"`, ...). Engines take a
//! `{read, write, create}` triple instead.

use tracing::warn;

/// Access intent derived from a symbolic open-flag token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub create: bool,
}

impl OpenFlags {
    /// Read-only, no create. Used by read streams.
    pub const READ_ONLY: Self = Self {
        read: true,
        write: false,
        create: false,
    };

    /// Translate a flag token.
    ///
    /// Unrecognized tokens, append tokens (`a`, `a+`, `ax`, `ax+`) included,
    /// yield the all-false triple instead of an error. Callers relying on
    /// `open` rejecting a bad token get an engine error at best.
    pub fn from_token(flags: &str) -> Self {
        match flags {
            "r" | "rs" => Self::READ_ONLY,
            "r+" | "rs+" => Self {
                read: false,
                write: true,
                create: false,
            },
            "w" => Self {
                read: false,
                write: true,
                create: true,
            },
            "wx" => Self {
                read: false,
                write: true,
                create: false,
            },
            "w+" => Self {
                read: true,
                write: true,
                create: true,
            },
            "wx+" => Self {
                read: true,
                write: true,
                create: false,
            },
            other => {
                warn!(flags = other, "unrecognized open flags, no access granted");
                Self::default()
            }
        }
    }

    /// True if the token granted no access at all.
    pub fn is_empty(&self) -> bool {
        !self.read && !self.write && !self.create
    }
}
