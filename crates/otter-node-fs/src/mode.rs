//! Permission mode translation.
//!
//! Engines take permissions as `rwx` triples (`"rwxr-xr--"`), callers pass
//! numeric octal modes. The table below precomputes the string form of every
//! mode in `0..=0o777`, so each value is rendered exactly once per table and
//! lookups never allocate.

use crate::error::{FsError, FsResult};
use serde_json::Value;

/// Mode used for files when the caller passes none (or zero).
pub const DEFAULT_FILE_MODE: u32 = 0o666;

/// Mode used for `mkdir` when the caller passes none (or zero).
pub const DEFAULT_DIR_MODE: u32 = 0o777;

/// Largest mode accepted: three octal digits.
pub const MAX_MODE: u32 = 0o777;

/// Precomputed numeric mode -> permission string lookup.
#[derive(Debug, Clone)]
pub struct ModeTable {
    strings: Vec<String>,
    default_mode: u32,
}

impl ModeTable {
    /// Build the table with the conventional `0o666` default.
    pub fn new() -> Self {
        Self::with_default(DEFAULT_FILE_MODE)
    }

    /// Build the table with a custom default for absent/zero modes.
    ///
    /// A default outside `1..=0o777` falls back to `0o666`.
    pub fn with_default(default_mode: u32) -> Self {
        let default_mode = if default_mode == 0 || default_mode > MAX_MODE {
            DEFAULT_FILE_MODE
        } else {
            default_mode
        };
        Self {
            strings: (0..=MAX_MODE).map(render_mode).collect(),
            default_mode,
        }
    }

    /// The mode substituted for `None` and `Some(0)`.
    pub fn default_mode(&self) -> u32 {
        self.default_mode
    }

    /// Translate a numeric mode into its `rwx` form.
    ///
    /// `None` and `Some(0)` translate the default mode. Modes with more than
    /// three octal digits are rejected.
    pub fn permission_string(&self, mode: Option<u32>) -> FsResult<&str> {
        let mode = match mode {
            None | Some(0) => self.default_mode,
            Some(mode) => mode,
        };
        self.strings
            .get(mode as usize)
            .map(String::as_str)
            .ok_or_else(|| FsError::invalid(format!("mode {mode:#o} is outside 0..=0o777")))
    }
}

impl Default for ModeTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Render one mode: one `rwx` triple per octal digit, most significant first.
fn render_mode(mode: u32) -> String {
    format!("{mode:o}")
        .chars()
        .filter_map(|digit| digit.to_digit(8))
        .flat_map(|bits| {
            [
                if bits & 0b100 != 0 { 'r' } else { '-' },
                if bits & 0b010 != 0 { 'w' } else { '-' },
                if bits & 0b001 != 0 { 'x' } else { '-' },
            ]
        })
        .collect()
}

/// Parse an octal mode string such as `"755"` or `"0o644"`.
pub fn parse_octal(s: &str) -> FsResult<u32> {
    let digits = s
        .strip_prefix("0o")
        .or_else(|| s.strip_prefix("0O"))
        .unwrap_or(s);
    u32::from_str_radix(digits, 8)
        .map_err(|_| FsError::invalid(format!("mode '{s}' is not an octal number")))
}

/// Read a mode from a JSON argument: a non-negative integer or an octal string.
pub fn mode_from_json(value: &Value) -> FsResult<Option<u32>> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_u64()
            .and_then(|m| u32::try_from(m).ok())
            .map(Some)
            .ok_or_else(|| FsError::invalid(format!("mode {n} must be a non-negative integer"))),
        Value::String(s) => parse_octal(s).map(Some),
        other => Err(FsError::invalid(format!(
            "mode must be a number or octal string, got {other}"
        ))),
    }
}
