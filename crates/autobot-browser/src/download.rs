//! Download-directory watching.
//!
//! A statement download counts as complete once a file that was not present
//! at cycle start appears with one of the expected extensions and its size
//! holds steady for the stability window.

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use autobot_core::AutobotError;

/// File names currently present, for later "newly appeared" comparison.
pub fn snapshot_dir(dir: &Path) -> HashSet<OsString> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name())
                .collect()
        })
        .unwrap_or_default()
}

/// Wait for a new, size-stable file with one of `extensions` (lowercase, with
/// dot). `cancelled` is polled so a stopping worker bails out promptly.
pub fn wait_for_new_file(
    dir: &Path,
    extensions: &[&str],
    before: &HashSet<OsString>,
    timeout: Duration,
    stable_for: Duration,
    cancelled: &dyn Fn() -> bool,
) -> Result<PathBuf, AutobotError> {
    let deadline = Instant::now() + timeout;

    while Instant::now() < deadline {
        if cancelled() {
            return Err(AutobotError::Cancelled);
        }

        if let Some(path) = newest_matching(dir, extensions, Some(before)) {
            if let Ok(size_a) = std::fs::metadata(&path).map(|m| m.len()) {
                std::thread::sleep(stable_for);
                if let Ok(size_b) = std::fs::metadata(&path).map(|m| m.len()) {
                    if size_a == size_b {
                        return Ok(path);
                    }
                }
            }
        }
        std::thread::sleep(Duration::from_millis(500));
    }

    Err(AutobotError::DownloadTimeout(format!(
        "no new {} file in {}",
        extensions.join("/"),
        dir.display()
    )))
}

/// The most recently modified statement file (`.csv`/`.xls`/`.xlsx`) in a
/// download directory, if any. Used by the `/file` command.
pub fn newest_statement_file(dir: &Path) -> Option<PathBuf> {
    newest_matching(dir, &[".csv", ".xls", ".xlsx"], None)
}

fn newest_matching(
    dir: &Path,
    extensions: &[&str],
    exclude: Option<&HashSet<OsString>>,
) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut best: Option<(SystemTime, PathBuf)> = None;

    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name();
        if let Some(before) = exclude {
            if before.contains(&name) {
                continue;
            }
        }
        let lower = name.to_string_lossy().to_lowercase();
        if !extensions.iter().any(|ext| lower.ends_with(ext)) {
            continue;
        }
        // Chrome writes in-progress downloads as .crdownload; never pick one.
        if lower.ends_with(".crdownload") {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        if best.as_ref().map(|(t, _)| modified > *t).unwrap_or(true) {
            best = Some((modified, entry.path()));
        }
    }

    best.map(|(_, p)| p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn waits_for_newly_appeared_file_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("old.xls"), b"old").unwrap();
        let before = snapshot_dir(dir.path());

        // Nothing new: must time out quickly.
        let err = wait_for_new_file(
            dir.path(),
            &[".xls"],
            &before,
            Duration::from_millis(50),
            Duration::from_millis(1),
            &|| false,
        )
        .unwrap_err();
        assert!(matches!(err, AutobotError::DownloadTimeout(_)));

        fs::write(dir.path().join("new.xls"), b"fresh bytes").unwrap();
        let path = wait_for_new_file(
            dir.path(),
            &[".xls"],
            &before,
            Duration::from_secs(5),
            Duration::from_millis(1),
            &|| false,
        )
        .unwrap();
        assert!(path.ends_with("new.xls"));
    }

    #[test]
    fn cancellation_wins_over_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let before = snapshot_dir(dir.path());
        let err = wait_for_new_file(
            dir.path(),
            &[".csv"],
            &before,
            Duration::from_secs(30),
            Duration::from_millis(1),
            &|| true,
        )
        .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn newest_statement_file_prefers_latest_mtime() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.csv"), b"1").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        fs::write(dir.path().join("b.xlsx"), b"2").unwrap();
        let newest = newest_statement_file(dir.path()).unwrap();
        assert!(newest.ends_with("b.xlsx"));
        fs::write(dir.path().join("note.txt"), b"x").unwrap();
        let still = newest_statement_file(dir.path()).unwrap();
        assert!(still.ends_with("b.xlsx"));
    }
}
