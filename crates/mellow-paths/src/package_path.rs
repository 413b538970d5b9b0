use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};

use crate::PathError;

/// A rooted, '/'-separated name for a package or a rule.
///
/// Internally an ordered list of non-empty components. The empty list is the
/// root. Components never contain '/', and never equal `.` or `..`.
/// Ordering is lexicographic over components, which keeps map iteration
/// deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PackagePath {
    parts: Vec<String>,
}

fn split_parts(s: &str) -> Result<Vec<String>, PathError> {
    let mut parts = Vec::new();
    for part in s.split('/') {
        match part {
            "" | "." => continue,
            ".." => return Err(PathError::ParentComponent(s.to_owned())),
            _ => parts.push(part.to_owned()),
        }
    }
    Ok(parts)
}

impl PackagePath {
    /// The root path, printed as `/`.
    pub fn root() -> Self {
        Self { parts: Vec::new() }
    }

    /// Parses a rooted package path string.
    ///
    /// A non-empty string must start with `/`. Repeated slashes collapse and
    /// `.` components drop; `..` components are rejected.
    pub fn from_str(s: &str) -> Result<Self, PathError> {
        if !s.is_empty() && !s.starts_with('/') {
            return Err(PathError::NotRooted(s.to_owned()));
        }
        Ok(Self {
            parts: split_parts(s)?,
        })
    }

    /// Names the position of `path` below `root_package_dir`.
    ///
    /// Both paths must agree on being absolute or relative, and the
    /// components of `root_package_dir` must be a prefix of those of `path`.
    pub fn from_filesystem(root_package_dir: &Utf8Path, path: &Utf8Path) -> Result<Self, PathError> {
        if root_package_dir.is_absolute() != path.is_absolute() {
            return Err(PathError::MixedAbsolute);
        }
        let root_parts = split_parts(root_package_dir.as_str())?;
        let path_parts = split_parts(path.as_str())?;
        if path_parts.len() < root_parts.len() || path_parts[..root_parts.len()] != root_parts[..] {
            return Err(PathError::NotAPrefix {
                root: root_package_dir.to_string(),
                path: path.to_string(),
            });
        }
        Ok(Self {
            parts: path_parts[root_parts.len()..].to_vec(),
        })
    }

    /// Joins this name onto a filesystem directory.
    pub fn to_filesystem(&self, dir: &Utf8Path) -> Utf8PathBuf {
        let mut out = dir.as_str().to_owned();
        for part in &self.parts {
            if !out.ends_with('/') {
                out.push('/');
            }
            out.push_str(part);
        }
        Utf8PathBuf::from(out)
    }

    /// Appends `tail` with a separator. A rooted tail replaces `self`.
    pub fn join(&self, tail: &str) -> Result<Self, PathError> {
        if tail.starts_with('/') {
            return Self::from_str(tail);
        }
        let mut parts = self.parts.clone();
        parts.extend(split_parts(tail)?);
        Ok(Self { parts })
    }

    /// Appends `tail` to the last component without a separator, then
    /// re-splits the result. `/foo/bar + ".d"` is `/foo/bar.d`; appending to
    /// the root behaves like parsing `/<tail>`.
    pub fn append_no_sep(&self, tail: &str) -> Result<Self, PathError> {
        let Some((last, rest)) = self.parts.split_last() else {
            return Self::from_str(&format!("/{tail}"));
        };
        let mut parts = rest.to_vec();
        parts.extend(split_parts(&format!("{last}{tail}"))?);
        Ok(Self { parts })
    }

    /// The path with the last component dropped. The parent of the root is
    /// the root.
    pub fn parent(&self) -> Self {
        let mut parts = self.parts.clone();
        parts.pop();
        Self { parts }
    }

    /// The last component, or `None` for the root.
    pub fn last(&self) -> Option<&str> {
        self.parts.last().map(String::as_str)
    }

    pub fn is_root(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn num_components(&self) -> usize {
        self.parts.len()
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(String::as_str)
    }

    /// True when `self` is strictly below `parent`.
    pub fn is_child_of(&self, parent: &Self) -> bool {
        self.parts.len() > parent.parts.len() && self.parts[..parent.parts.len()] == parent.parts[..]
    }

    /// A string form of `self` relative to `parent`: `"./"` when equal, the
    /// trailing components joined by `/` when below it, and the absolute
    /// string otherwise.
    pub fn relative_to(&self, parent: &Self) -> String {
        if self == parent {
            return "./".to_owned();
        }
        if !self.is_child_of(parent) {
            return self.to_string();
        }
        self.parts[parent.parts.len()..].join("/")
    }

    /// Strips trailing filesystem components of `path` that match the
    /// trailing components of `self`, popping from both until they disagree.
    pub fn remove_suffix(&self, path: &Utf8Path) -> Utf8PathBuf {
        let mut path = path.to_path_buf();
        let mut parts = self.parts.as_slice();
        while let (Some(last), Some(file_name)) = (parts.last(), path.file_name()) {
            if last != file_name {
                break;
            }
            path.pop();
            parts = &parts[..parts.len() - 1];
        }
        path
    }
}

impl fmt::Display for PackagePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn p(s: &str) -> PackagePath {
        PackagePath::from_str(s).unwrap()
    }

    #[test_case("/" ; "root")]
    #[test_case("/foo" ; "single")]
    #[test_case("/foo/bar" ; "nested")]
    fn roundtrip(s: &str) {
        assert_eq!(PackagePath::from_str(&p(s).to_string()).unwrap(), p(s));
    }

    #[test]
    fn from_str_normalizes() {
        assert_eq!(p("/foo/./bar"), p("/foo/bar"));
        assert_eq!(p("//foo//bar/"), p("/foo/bar"));
        assert_eq!(p(""), PackagePath::root());
        assert_eq!(p("/"), PackagePath::root());
    }

    #[test]
    fn from_str_rejects() {
        assert!(matches!(
            PackagePath::from_str("foo/bar"),
            Err(PathError::NotRooted(_))
        ));
        assert!(matches!(
            PackagePath::from_str("/foo/.."),
            Err(PathError::ParentComponent(_))
        ));
    }

    #[test]
    fn join_splits_tails() {
        let base = p("/pkg");
        assert_eq!(
            base.join("a").unwrap().join("b").unwrap(),
            base.join("a/b").unwrap()
        );
        // A rooted tail replaces.
        assert_eq!(base.join("/other").unwrap(), p("/other"));
    }

    #[test]
    fn append_no_sep_extends_last_component() {
        assert_eq!(p("/foo/bar").append_no_sep(".d").unwrap(), p("/foo/bar.d"));
        assert_eq!(
            p("/foo/bar").append_no_sep(".compile").unwrap().to_string(),
            "/foo/bar.compile"
        );
        // Root has no last component; the tail is parsed as a rooted path.
        assert_eq!(PackagePath::root().append_no_sep(".d").unwrap(), p("/.d"));
        assert_eq!(PackagePath::root().append_no_sep("/x").unwrap(), p("/x"));
        // A tail containing '/' re-splits into new components.
        assert_eq!(p("/foo").append_no_sep("/x").unwrap(), p("/foo/x"));
        assert_eq!(p("/foo").append_no_sep("bar/x").unwrap(), p("/foobar/x"));
    }

    #[test]
    fn filesystem_conversions() {
        let root = Utf8Path::new("/repo");
        assert_eq!(p("/a/b").to_filesystem(root), Utf8PathBuf::from("/repo/a/b"));
        assert_eq!(
            p("/a/b").to_filesystem(Utf8Path::new("/repo/")),
            Utf8PathBuf::from("/repo/a/b")
        );
        assert!(p("/a/b")
            .to_filesystem(root)
            .as_str()
            .starts_with(root.as_str()));
        assert_eq!(PackagePath::root().to_filesystem(root), root);

        assert_eq!(
            PackagePath::from_filesystem(root, Utf8Path::new("/repo/a/b")).unwrap(),
            p("/a/b")
        );
        assert_eq!(
            PackagePath::from_filesystem(Utf8Path::new("rel"), Utf8Path::new("rel/x")).unwrap(),
            p("/x")
        );
        assert!(PackagePath::from_filesystem(root, Utf8Path::new("rel/x")).is_err());
        assert!(PackagePath::from_filesystem(root, Utf8Path::new("/elsewhere/x")).is_err());
    }

    #[test]
    fn relative_to() {
        let base = p("/a/b");
        assert_eq!(base.relative_to(&base), "./");
        assert_eq!(p("/a/b/c/d").relative_to(&base), "c/d");
        assert_eq!(p("/x/y").relative_to(&base), "/x/y");
    }

    #[test]
    fn parent_and_last() {
        assert_eq!(p("/a/b").parent(), p("/a"));
        assert_eq!(p("/a").parent(), PackagePath::root());
        assert_eq!(PackagePath::root().parent(), PackagePath::root());
        assert_eq!(p("/a/b").last(), Some("b"));
        assert_eq!(PackagePath::root().last(), None);
    }

    #[test]
    fn child_of() {
        assert!(p("/a/b").is_child_of(&p("/a")));
        assert!(!p("/a").is_child_of(&p("/a")));
        assert!(!p("/ab").is_child_of(&p("/a")));
    }

    #[test]
    fn remove_suffix_pops_matching_tail() {
        let path = Utf8Path::new("/repo/src/a/b");
        assert_eq!(p("/a/b").remove_suffix(path), Utf8PathBuf::from("/repo/src"));
        assert_eq!(p("/x").remove_suffix(path), path);
        // Stops at the first mismatch.
        assert_eq!(
            p("/b/a/b").remove_suffix(path),
            Utf8PathBuf::from("/repo/src")
        );
    }

    #[test]
    fn ordering_is_lexicographic() {
        let mut v = vec![p("/b"), p("/a/z"), p("/a"), PackagePath::root()];
        v.sort();
        assert_eq!(v, vec![PackagePath::root(), p("/a"), p("/a/z"), p("/b")]);
    }
}
