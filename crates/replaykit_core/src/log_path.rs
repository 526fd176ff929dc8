//! Log file path helpers.

use std::env;
use std::path::PathBuf;

/// Environment variable naming the log to replay.
pub const REPLAY_LOG_ENV: &str = "REPLAYKIT_LOG_PATH";

/// Inserts `suffix` before the extension of `path`.
///
/// Applying the same suffix again numbers the name instead of stacking
/// suffixes:
///
/// ```rust
/// use replaykit_core::add_path_suffix;
///
/// assert_eq!(add_path_suffix("logs/a.wpilog", "_sim"), "logs/a_sim.wpilog");
/// assert_eq!(add_path_suffix("logs/a_sim.wpilog", "_sim"), "logs/a_sim_2.wpilog");
/// assert_eq!(add_path_suffix("logs/a_sim_2.wpilog", "_sim"), "logs/a_sim_3.wpilog");
/// ```
///
/// A path without an extension is returned unchanged.
#[must_use]
pub fn add_path_suffix(path: &str, suffix: &str) -> String {
    let Some(dot) = path.rfind('.') else {
        return path.to_string();
    };
    let (base, extension) = path.split_at(dot);

    if base.ends_with(suffix) {
        return format!("{base}_2{extension}");
    }
    if let Some((stem, index)) = numbered(base, suffix) {
        return format!("{stem}_{}{extension}", index + 1);
    }
    format!("{base}{suffix}{extension}")
}

/// Splits `<stem><suffix>_<n>` into the part before `_<n>` and `n`.
/// The stem must be non-empty in front of the suffix.
fn numbered<'a>(base: &'a str, suffix: &str) -> Option<(&'a str, u64)> {
    let (stem, digits) = base.rsplit_once('_')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if stem.len() <= suffix.len() || !stem.ends_with(suffix) {
        return None;
    }
    Some((stem, digits.parse().ok()?))
}

/// Returns the log selected for replay by [`REPLAY_LOG_ENV`], if set.
#[must_use]
pub fn find_replay_log() -> Option<PathBuf> {
    resolve_replay_log(env::var_os(REPLAY_LOG_ENV).map(|v| v.to_string_lossy().into_owned()))
}

fn resolve_replay_log(value: Option<String>) -> Option<PathBuf> {
    let value = value?;
    let trimmed = value.trim().trim_matches('"');
    if trimmed.is_empty() {
        return None;
    }
    tracing::info!(path = trimmed, "replay log selected from {REPLAY_LOG_ENV}");
    Some(PathBuf::from(trimmed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adds_suffix_before_extension() {
        assert_eq!(add_path_suffix("a.wpilog", "_sim"), "a_sim.wpilog");
        assert_eq!(add_path_suffix("/logs/run.1.wpilog", "_x"), "/logs/run.1_x.wpilog");
    }

    #[test]
    fn repeated_suffix_is_numbered() {
        assert_eq!(add_path_suffix("a_sim.wpilog", "_sim"), "a_sim_2.wpilog");
        assert_eq!(add_path_suffix("a_sim_2.wpilog", "_sim"), "a_sim_3.wpilog");
        assert_eq!(add_path_suffix("a_sim_19.wpilog", "_sim"), "a_sim_20.wpilog");
    }

    #[test]
    fn number_without_suffix_is_not_incremented() {
        assert_eq!(add_path_suffix("a_2.wpilog", "_sim"), "a_2_sim.wpilog");
        assert_eq!(add_path_suffix("_sim_2.wpilog", "_sim"), "_sim_2_sim.wpilog");
    }

    #[test]
    fn path_without_extension_is_unchanged() {
        assert_eq!(add_path_suffix("logs/run", "_sim"), "logs/run");
    }

    #[test]
    fn replay_log_value_is_trimmed() {
        assert_eq!(
            resolve_replay_log(Some(" \"/tmp/a.wpilog\"\n".to_string())),
            Some(PathBuf::from("/tmp/a.wpilog"))
        );
        assert_eq!(resolve_replay_log(Some("  ".to_string())), None);
        assert_eq!(resolve_replay_log(None), None);
    }
}
