pub mod build;
pub mod config;
pub mod fetch;
pub mod format;
pub mod genbuild;

use camino::Utf8PathBuf;

use crate::{repo, Error};

/// The directory commands operate from: the nearest `mellowrc` root, or the
/// current directory when the tree has no marker.
pub(crate) fn working_root() -> Result<Utf8PathBuf, Error> {
    let cwd = std::env::current_dir().map_err(|e| Error::io(".", e))?;
    let cwd = Utf8PathBuf::from_path_buf(cwd)
        .map_err(|p| Error::InvalidArgs(format!("current directory is not UTF-8: {p:?}")))?;
    Ok(repo::find_root(&cwd).unwrap_or(cwd))
}

/// Anchors a possibly-relative flag path at the working root.
pub(crate) fn anchor(root: &camino::Utf8Path, path: &camino::Utf8Path) -> Utf8PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
