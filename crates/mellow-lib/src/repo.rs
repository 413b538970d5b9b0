//! Repository root discovery.

use camino::{Utf8Path, Utf8PathBuf};

/// Marker file that pins the repository root.
pub const REPO_MARKER: &str = "mellowrc";

/// Walks up from `starting_dir` to the first directory containing a
/// `mellowrc` file. Returns `None` when no ancestor has one, in which case
/// commands operate on `starting_dir` itself.
pub fn find_root(starting_dir: &Utf8Path) -> Option<Utf8PathBuf> {
    let mut dir = starting_dir;
    loop {
        if dir.join(REPO_MARKER).is_file() {
            return Some(dir.to_path_buf());
        }
        dir = dir.parent()?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_marker_in_ancestor() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        std::fs::write(root.join(REPO_MARKER), "")?;
        let nested = root.join("a/b");
        std::fs::create_dir_all(&nested)?;
        assert_eq!(find_root(&nested), Some(root));
        Ok(())
    }

    #[test]
    fn prefers_the_nearest_marker() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let outer = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        let inner = outer.join("sub");
        std::fs::create_dir_all(&inner)?;
        std::fs::write(outer.join(REPO_MARKER), "")?;
        std::fs::write(inner.join(REPO_MARKER), "")?;
        assert_eq!(find_root(&inner), Some(inner));
        Ok(())
    }
}
