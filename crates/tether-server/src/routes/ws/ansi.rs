//! ANSI escape stripping for agent output.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

/// OSC (`ESC ] ... BEL` or `ESC ] ... ESC \`), CSI (`ESC [ ... final`), then
/// two-byte escapes. Order matters: `]` is also a valid two-byte final.
const ANSI_PATTERN: &str =
    r"\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b\[[0-?]*[ -/]*[@-~]|\x1b[@-Z\\-_]";

static ANSI: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(ANSI_PATTERN).ok());

/// Remove terminal escape sequences from `text`.
pub fn strip_ansi(text: &str) -> Cow<'_, str> {
    if !text.contains('\x1b') {
        return Cow::Borrowed(text);
    }
    match ANSI.as_ref() {
        Some(re) => re.replace_all(text, ""),
        None => Cow::Borrowed(text),
    }
}
