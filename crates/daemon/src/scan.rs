//! Scanner module for discovering quiesced recordings in watched directories.
//!
//! Recursively walks each watched root, yielding files whose extension matches
//! exactly and whose last modification is older than the quiescence delay.

use crate::stability::{check_quiescence, StabilityResult};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Lazy, single-pass sequence of quiesced files under a set of roots.
///
/// Within a root, entries are visited sorted by file name so a fixed
/// filesystem snapshot always yields the same order. Re-scanning requires a
/// new call to [`scan_quiesced`].
pub struct QuiescedFiles {
    roots: std::vec::IntoIter<PathBuf>,
    current: Option<walkdir::IntoIter>,
    extension: String,
    delay: Duration,
    now: SystemTime,
}

/// Scans `roots` for files with `extension` unmodified for longer than `delay`.
///
/// `extension` is compared exactly (case-sensitive, leading dot optional).
/// Roots or subdirectories that cannot be read are logged and skipped.
pub fn scan_quiesced(roots: &[PathBuf], extension: &str, delay: Duration) -> QuiescedFiles {
    QuiescedFiles {
        roots: roots.to_vec().into_iter(),
        current: None,
        extension: extension.trim_start_matches('.').to_string(),
        delay,
        now: SystemTime::now(),
    }
}

/// Checks whether `path` has exactly the given extension (without dot).
pub fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension() == Some(OsStr::new(extension))
}

impl QuiescedFiles {
    fn accept(&self, entry: &walkdir::DirEntry) -> bool {
        if !entry.file_type().is_file() || !has_extension(entry.path(), &self.extension) {
            return false;
        }

        let modified = entry
            .metadata()
            .map_err(std::io::Error::from)
            .and_then(|m| m.modified());
        let modified = match modified {
            Ok(modified) => modified,
            Err(e) => {
                debug!(path = %entry.path().display(), error = %e, "File vanished during scan");
                return false;
            }
        };

        match check_quiescence(modified, self.now, self.delay) {
            StabilityResult::Stable => true,
            StabilityResult::Unstable { age } => {
                debug!(
                    path = %entry.path().display(),
                    age_secs = age.as_secs(),
                    "File not quiesced yet"
                );
                false
            }
        }
    }
}

impl Iterator for QuiescedFiles {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        loop {
            let Some(walker) = self.current.as_mut() else {
                let root = self.roots.next()?;
                if !root.is_dir() {
                    warn!(root = %root.display(), "Watched directory does not exist, skipping");
                    continue;
                }
                self.current = Some(WalkDir::new(root).sort_by_file_name().into_iter());
                continue;
            };

            let entry = match walker.next() {
                Some(Ok(entry)) => entry,
                Some(Err(e)) => {
                    warn!(error = %e, "Error reading directory entry, skipping");
                    continue;
                }
                None => {
                    self.current = None;
                    continue;
                }
            };

            if self.accept(&entry) {
                return Some(entry.into_path());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{age_file, write_media};
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use std::fs;
    use tempfile::TempDir;

    const HOUR: Duration = Duration::from_secs(3600);

    fn collect(roots: &[PathBuf], ext: &str, delay: Duration) -> Vec<PathBuf> {
        scan_quiesced(roots, ext, delay).collect()
    }

    #[test]
    fn test_has_extension_is_exact() {
        assert!(has_extension(Path::new("/rec/a.flv"), "flv"));
        assert!(!has_extension(Path::new("/rec/a.FLV"), "flv"));
        assert!(!has_extension(Path::new("/rec/a.flv.part"), "flv"));
        assert!(!has_extension(Path::new("/rec/flv"), "flv"));
    }

    #[test]
    fn test_recurses_into_nested_subdirectories() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        let files = [
            root.join("top.flv"),
            root.join("room1/mid.flv"),
            root.join("room1/2024/deep.flv"),
            root.join("room2/a/b/c/deepest.flv"),
        ];
        for f in &files {
            fs::create_dir_all(f.parent().unwrap()).unwrap();
            write_media(f, "h264", 60.0, 0);
            age_file(f, 2 * HOUR);
        }

        let found: BTreeSet<_> = collect(&[root], "flv", HOUR).into_iter().collect();
        let expected: BTreeSet<_> = files.iter().cloned().collect();
        assert_eq!(found, expected);
    }

    #[test]
    fn test_skips_recent_and_foreign_files() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();

        let old = root.join("old.flv");
        let fresh = root.join("fresh.flv");
        let xml = root.join("old.xml");
        for f in [&old, &fresh, &xml] {
            fs::write(f, b"x").unwrap();
        }
        age_file(&old, 2 * HOUR);
        age_file(&xml, 2 * HOUR);

        assert_eq!(collect(&[root], ".flv", HOUR), vec![old]);
    }

    #[test]
    fn test_missing_root_does_not_abort_scan() {
        let temp = TempDir::new().unwrap();
        let present = temp.path().join("present");
        fs::create_dir_all(&present).unwrap();
        let file = present.join("rec.flv");
        fs::write(&file, b"x").unwrap();
        age_file(&file, 2 * HOUR);

        let roots = vec![temp.path().join("gone"), present];
        assert_eq!(collect(&roots, "flv", HOUR), vec![file]);
    }

    #[test]
    fn test_directory_removed_mid_scan_is_skipped() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        let first = root.join("a.flv");
        let gone = root.join("m_gone");
        let last = root.join("z.flv");
        fs::create_dir_all(&gone).unwrap();
        for f in [&first, &gone.join("x.flv"), &last] {
            fs::write(f, b"x").unwrap();
            age_file(f, 2 * HOUR);
        }

        let mut scan = scan_quiesced(&[root], "flv", HOUR);
        assert_eq!(scan.next(), Some(first));
        // Listed with the root but not yet opened
        fs::remove_dir_all(&gone).unwrap();
        assert_eq!(scan.collect::<Vec<_>>(), vec![last]);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_subdirectory_is_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        let locked = root.join("locked");
        fs::create_dir_all(&locked).unwrap();
        let hidden = locked.join("hidden.flv");
        let visible = root.join("visible.flv");
        for f in [&hidden, &visible] {
            fs::write(f, b"x").unwrap();
            age_file(f, 2 * HOUR);
        }

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        // Privileged users read through the mode bits; nothing to observe then
        let readable = fs::read_dir(&locked).is_ok();
        let found = collect(&[root], "flv", HOUR);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        if readable {
            assert_eq!(found, vec![hidden, visible]);
        } else {
            assert_eq!(found, vec![visible]);
        }
    }

    #[test]
    fn test_order_is_deterministic() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        for name in ["c.mp4", "a.mp4", "b.mp4"] {
            let p = root.join(name);
            fs::write(&p, b"x").unwrap();
            age_file(&p, HOUR);
        }

        let first = collect(&[root.clone()], "mp4", Duration::ZERO);
        let second = collect(&[root.clone()], "mp4", Duration::ZERO);
        assert_eq!(first, second);
        assert_eq!(
            first,
            vec![root.join("a.mp4"), root.join("b.mp4"), root.join("c.mp4")]
        );
    }

    // The scan result set equals { f : ext(f) = target and now - mtime(f) > delay }.
    // Ages stay clear of the delay boundary so the wall clock cannot flip a case.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(25))]

        #[test]
        fn prop_scan_yields_exactly_quiesced_matches(
            files in proptest::collection::vec(
                (
                    "[a-z]{1,6}",
                    0usize..3,
                    prop_oneof![Just("flv"), Just("mp4"), Just("xml")],
                    prop_oneof![0u64..3000, 4000u64..7200],
                ),
                1..12,
            ),
        ) {
            let temp = TempDir::new().unwrap();
            let root = temp.path().to_path_buf();
            let mut expected = BTreeSet::new();

            for (i, (name, depth, ext, age_secs)) in files.iter().enumerate() {
                let mut dir = root.clone();
                for level in 0..*depth {
                    dir = dir.join(format!("d{}", level));
                }
                fs::create_dir_all(&dir).unwrap();
                let path = dir.join(format!("{}_{}.{}", name, i, ext));
                fs::write(&path, b"x").unwrap();
                age_file(&path, Duration::from_secs(*age_secs));

                if *ext == "flv" && *age_secs > HOUR.as_secs() {
                    expected.insert(path);
                }
            }

            let found: BTreeSet<_> = collect(&[root], "flv", HOUR).into_iter().collect();
            prop_assert_eq!(found, expected);
        }
    }
}
