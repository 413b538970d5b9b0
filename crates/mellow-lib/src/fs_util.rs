//! Small filesystem helpers shared by runnables and commands.

use std::io;

use camino::Utf8Path;

/// True when both files exist and hold identical bytes.
pub fn equal_files(a: &Utf8Path, b: &Utf8Path) -> bool {
    let (Ok(meta_a), Ok(meta_b)) = (std::fs::metadata(a), std::fs::metadata(b)) else {
        return false;
    };
    if meta_a.len() != meta_b.len() {
        return false;
    }
    match (std::fs::read(a), std::fs::read(b)) {
        (Ok(ca), Ok(cb)) => ca == cb,
        _ => false,
    }
}

/// Copies `from` over `to` unless the contents already match, creating
/// parent directories as needed. Keeping the mtime of unchanged outputs
/// stable is what lets downstream hash checks stay cached.
pub fn copy_if_differs(from: &Utf8Path, to: &Utf8Path) -> io::Result<()> {
    if equal_files(from, to) {
        return Ok(());
    }
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(from, to)?;
    Ok(())
}

/// Recursively copies a directory tree. Symlinks are followed.
pub fn copy_dir_recursive(from: &Utf8Path, to: &Utf8Path) -> io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in from.read_dir_utf8()? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.path().is_dir() {
            copy_dir_recursive(entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
