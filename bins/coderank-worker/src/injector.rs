//! Streams a job workspace into a sandbox as an uncompressed tar archive.
//!
//! GNU headers carry no extended attributes, which keeps the archive
//! portable across daemon hosts. Only regular files at the top level of the
//! workspace are shipped; entry names are relative so they unpack straight
//! into the sandbox working directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Build an uncompressed tar archive of the regular files in `dir`.
pub fn archive_dir(dir: &Path) -> io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }

        let data = fs::read(entry.path())?;
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, entry.file_name(), data.as_slice())?;
    }

    builder.into_inner()
}

/// Unpack a daemon archive (as returned by the container archive endpoint)
/// into `dest`, stripping the leading directory component so files land
/// directly in the workspace. Used to export compile artifacts when files
/// are delivered by copy instead of bind mount.
pub fn extract_archive(bytes: &[u8], dest: &Path) -> io::Result<()> {
    let mut archive = tar::Archive::new(bytes);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let rel: PathBuf = entry.path()?.components().skip(1).collect();
        if rel.as_os_str().is_empty() {
            continue;
        }
        entry.unpack(dest.join(rel))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archives_only_regular_files_with_relative_names() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("solution.py"), "print('hi')\n").unwrap();
        fs::write(dir.path().join("input.txt"), "42\n").unwrap();
        fs::create_dir(dir.path().join("subdir")).unwrap();

        let bytes = archive_dir(dir.path()).unwrap();

        let mut archive = tar::Archive::new(bytes.as_slice());
        let mut names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["input.txt", "solution.py"]);
    }

    #[test]
    fn extract_strips_leading_component() {
        // Build an archive the way the daemon does: entries under "app/".
        let mut builder = tar::Builder::new(Vec::new());
        let payload = b"binary artifact";
        let mut header = tar::Header::new_gnu();
        header.set_size(payload.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder
            .append_data(&mut header, "app/a.out", payload.as_slice())
            .unwrap();
        let bytes = builder.into_inner().unwrap();

        let dest = tempfile::tempdir().unwrap();
        extract_archive(&bytes, dest.path()).unwrap();

        let unpacked = fs::read(dest.path().join("a.out")).unwrap();
        assert_eq!(unpacked, payload);
    }
}
