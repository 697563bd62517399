//! Relocator module for collision-safe file moves.
//!
//! Files are copied to the destination and the source is removed only after
//! the copy is complete. An occupied destination name is never overwritten:
//! `a.mp4` becomes `a_2.mp4`, `a_3.mp4`, and so on.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Upper bound on disambiguation suffixes tried before giving up.
const MAX_CANDIDATES: u32 = 10_000;

/// Errors that can occur during relocation.
///
/// On every error the source file is still in place.
#[derive(Debug, Error)]
pub enum RelocateError {
    /// Failed to read the source or write the destination.
    #[error("Failed to copy {} to {}: {source}", from.display(), to.display())]
    CopyFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The destination ended up with a different length than the source.
    #[error("Incomplete copy to {}: {copied} of {expected} bytes", to.display())]
    Incomplete {
        to: PathBuf,
        copied: u64,
        expected: u64,
    },

    /// The copy succeeded but the source could not be removed.
    #[error("Failed to remove {} after copying: {source}", from.display())]
    RemoveSourceFailed {
        from: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Every candidate name is taken.
    #[error("No free destination name for {}", .0.display())]
    Exhausted(PathBuf),
}

/// Destination candidate `n` for `to`.
///
/// Candidate 1 is `to` itself; candidate `n >= 2` inserts `_n` before the
/// extension: `/save/a.mp4` -> `/save/a_2.mp4`.
pub fn disambiguated_path(to: &Path, n: u32) -> PathBuf {
    if n <= 1 {
        return to.to_path_buf();
    }
    let stem = to.file_stem().unwrap_or_default().to_string_lossy();
    let name = match to.extension() {
        Some(ext) => format!("{}_{}.{}", stem, n, ext.to_string_lossy()),
        None => format!("{}_{}", stem, n),
    };
    to.with_file_name(name)
}

/// Moves `from` to `to`, or to the first free disambiguated name.
///
/// Each candidate is claimed with create-new semantics, so a name taken by a
/// concurrent writer after a previous check is skipped rather than
/// overwritten. `from` is removed only once the destination holds a full
/// copy. Returns the path actually used.
pub fn relocate(from: &Path, to: &Path) -> Result<PathBuf, RelocateError> {
    let copy_err = |to: &Path, source| RelocateError::CopyFailed {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    };

    let mut source = File::open(from).map_err(|e| copy_err(to, e))?;
    let expected = source.metadata().map_err(|e| copy_err(to, e))?.len();

    let (destination, mut dest_file) = claim_destination(to).map_err(|e| match e {
        ClaimError::Io(e) => copy_err(to, e),
        ClaimError::Exhausted => RelocateError::Exhausted(to.to_path_buf()),
    })?;

    let copied = io::copy(&mut source, &mut dest_file).and_then(|n| {
        dest_file.sync_all()?;
        Ok(n)
    });
    drop(dest_file);

    let copied = match copied {
        Ok(n) => n,
        Err(e) => {
            let _ = fs::remove_file(&destination);
            return Err(copy_err(&destination, e));
        }
    };
    if copied != expected {
        let _ = fs::remove_file(&destination);
        return Err(RelocateError::Incomplete {
            to: destination,
            copied,
            expected,
        });
    }

    drop(source);
    if let Err(e) = fs::remove_file(from) {
        // Leave exactly one copy behind: the source
        let _ = fs::remove_file(&destination);
        return Err(RelocateError::RemoveSourceFailed {
            from: from.to_path_buf(),
            source: e,
        });
    }

    info!(from = %from.display(), to = %destination.display(), "Relocated file");
    Ok(destination)
}

enum ClaimError {
    Io(io::Error),
    Exhausted,
}

fn claim_destination(to: &Path) -> Result<(PathBuf, File), ClaimError> {
    for n in 1..=MAX_CANDIDATES {
        let candidate = disambiguated_path(to, n);
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(ClaimError::Io(e)),
        }
    }
    Err(ClaimError::Exhausted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    #[test]
    fn test_disambiguated_path() {
        let to = Path::new("/save/a.mp4");
        assert_eq!(disambiguated_path(to, 1), PathBuf::from("/save/a.mp4"));
        assert_eq!(disambiguated_path(to, 2), PathBuf::from("/save/a_2.mp4"));
        assert_eq!(disambiguated_path(to, 13), PathBuf::from("/save/a_13.mp4"));
        assert_eq!(
            disambiguated_path(Path::new("/save/rec.v1.xml"), 2),
            PathBuf::from("/save/rec.v1_2.xml")
        );
        assert_eq!(
            disambiguated_path(Path::new("/save/noext"), 3),
            PathBuf::from("/save/noext_3")
        );
    }

    #[test]
    fn test_relocate_to_free_name() {
        let temp = TempDir::new().unwrap();
        let from = temp.path().join("work.mp4");
        let to = temp.path().join("dest").join("a.mp4");
        fs::create_dir_all(to.parent().unwrap()).unwrap();
        fs::write(&from, b"payload").unwrap();

        let actual = relocate(&from, &to).unwrap();
        assert_eq!(actual, to);
        assert!(!from.exists());
        assert_eq!(fs::read(&to).unwrap(), b"payload");
    }

    #[test]
    fn test_relocate_collision_sequence() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("a.mp4");
        fs::write(&dest, b"existing").unwrap();

        for (i, expected) in ["a_2.mp4", "a_3.mp4"].iter().enumerate() {
            let from = temp.path().join(format!("src{}.mp4", i));
            fs::write(&from, format!("new{}", i)).unwrap();

            let actual = relocate(&from, &dest).unwrap();
            assert_eq!(actual, temp.path().join(expected));
            assert!(!from.exists());
            assert_eq!(fs::read_to_string(&actual).unwrap(), format!("new{}", i));
        }
        assert_eq!(fs::read(&dest).unwrap(), b"existing");
    }

    #[test]
    fn test_relocate_skips_gaps_in_order() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("a.mp4");
        fs::write(&dest, b"1").unwrap();
        fs::write(temp.path().join("a_2.mp4"), b"2").unwrap();
        fs::write(temp.path().join("a_4.mp4"), b"4").unwrap();
        let from = temp.path().join("src.mp4");
        fs::write(&from, b"new").unwrap();

        assert_eq!(relocate(&from, &dest).unwrap(), temp.path().join("a_3.mp4"));
    }

    #[test]
    fn test_relocate_missing_source_leaves_destination_untouched() {
        let temp = TempDir::new().unwrap();
        let to = temp.path().join("a.mp4");

        let result = relocate(&temp.path().join("missing.mp4"), &to);
        assert!(matches!(result, Err(RelocateError::CopyFailed { .. })));
        assert!(!to.exists());
    }

    #[test]
    fn test_relocate_into_missing_directory_keeps_source() {
        let temp = TempDir::new().unwrap();
        let from = temp.path().join("work.mp4");
        fs::write(&from, b"payload").unwrap();

        let result = relocate(&from, &temp.path().join("nope").join("a.mp4"));
        assert!(matches!(result, Err(RelocateError::CopyFailed { .. })));
        assert_eq!(fs::read(&from).unwrap(), b"payload");
    }

    // Relocating k files to the same target yields k distinct names
    // a, a_2, ..., a_k, each holding its own source's content.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(20))]

        #[test]
        fn prop_relocate_never_overwrites(contents in proptest::collection::vec("[a-z]{0,20}", 1..8)) {
            let temp = TempDir::new().unwrap();
            let dest = temp.path().join("out").join("a.mp4");
            fs::create_dir_all(dest.parent().unwrap()).unwrap();

            for (i, content) in contents.iter().enumerate() {
                let from = temp.path().join(format!("src{}.mp4", i));
                fs::write(&from, content).unwrap();
                let actual = relocate(&from, &dest).unwrap();
                prop_assert_eq!(&actual, &disambiguated_path(&dest, i as u32 + 1));
                prop_assert!(!from.exists());
            }

            for (i, content) in contents.iter().enumerate() {
                let path = disambiguated_path(&dest, i as u32 + 1);
                prop_assert_eq!(&fs::read_to_string(&path).unwrap(), content);
            }
        }
    }
}
