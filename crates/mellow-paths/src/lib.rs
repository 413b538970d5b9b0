//! Canonical names for packages and rules.
//!
//! A [`PackagePath`] is a rooted, '/'-separated identifier such as
//! `/base/bytes` or `/tools/codegen/gen`. It names a package (a directory
//! holding a manifest) or a rule inside one, independently of where the
//! repository lives on disk. Conversions to and from filesystem paths are
//! explicit and fallible.

mod package_path;

pub use package_path::PackagePath;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("package path must start with a slash: '{0}'")]
    NotRooted(String),
    #[error("'..' is not allowed in a package path: '{0}'")]
    ParentComponent(String),
    #[error("'{path}' is not under the root package directory '{root}'")]
    NotAPrefix { root: String, path: String },
    #[error("cannot relate an absolute path to a relative root (or vice versa)")]
    MixedAbsolute,
}
