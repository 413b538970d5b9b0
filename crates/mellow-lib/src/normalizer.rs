//! Manifest discovery and normalization.
//!
//! Walks the repository for manifests, merges every rule into one
//! fully-qualified namespace, orders the result topologically, and computes
//! each rule's transitive lib closure. Everything downstream (task building,
//! execution) consumes the [`NormalizedBuild`] this module produces.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use camino::{Utf8Path, Utf8PathBuf};
use itertools::Itertools as _;
use mellow_errors::Spanned;
use mellow_manifest::{Os, ParseError, Profile, Rule};
use mellow_paths::{PackagePath, PathError};
use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;
use tracing::debug;

use crate::rules::RuleExt;

/// Directories never scanned for packages.
const IGNORE_DIRS: &[&str] = &["build", "build-ci", "publish"];

#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),
    #[error("duplicated rule name '{name}'{first}")]
    DuplicateRule {
        name: PackagePath,
        /// Rendered pointer at the first definition.
        first: String,
        #[source_code]
        source_code: NamedSource,
        #[label("also defined here")]
        span: Option<SourceSpan>,
    },
    #[error("rule '{rule}' depends on unknown rule '{dep}'")]
    UnknownDep {
        rule: PackagePath,
        dep: PackagePath,
        #[source_code]
        source_code: NamedSource,
        #[label]
        span: Option<SourceSpan>,
    },
    #[error("dependency cycle among rules: {names}")]
    Cycle { names: String },
    #[error("invalid name in rule at {context}: {source}")]
    BadName { context: String, source: PathError },
    #[error("{path}: {source}")]
    Io {
        path: Utf8PathBuf,
        source: std::io::Error,
    },
}

impl Error {
    fn io(path: &Utf8Path, source: std::io::Error) -> Self {
        Error::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A rule with its namespace position resolved and its closure computed.
#[derive(Debug)]
pub struct NormalizedRule {
    /// Fully qualified: package path plus the rule's local name.
    pub name: PackagePath,
    /// The owning package (`name.parent()`).
    pub package_name: PackagePath,
    /// Absolute directory holding the package's manifest.
    pub package_dir: Utf8PathBuf,
    /// Absolute root of the walk that found this package.
    pub root_package_dir: Utf8PathBuf,
    pub rule: Rule,
    /// Names this rule waits for: libs, plus a gen_rule's binary.
    pub deps: BTreeSet<PackagePath>,
    /// Direct and indirect lib dependencies, set during topological
    /// ordering and never revisited.
    pub transitive_libs: Vec<Arc<NormalizedRule>>,
}

impl NormalizedRule {
    pub fn location(&self) -> &Spanned<()> {
        self.rule.location()
    }

    fn join_all(&self, names: &[String]) -> BTreeSet<Utf8PathBuf> {
        names.iter().map(|n| self.package_dir.join(n)).collect()
    }

    pub fn sources(&self) -> BTreeSet<Utf8PathBuf> {
        self.join_all(self.rule.sources())
    }

    pub fn headers(&self) -> BTreeSet<Utf8PathBuf> {
        self.join_all(self.rule.headers())
    }

    pub fn data(&self) -> BTreeSet<Utf8PathBuf> {
        self.join_all(self.rule.data())
    }

    pub fn cpp_flags(&self) -> &[String] {
        self.rule.cpp_flags()
    }

    pub fn ld_flags(&self) -> &[String] {
        self.rule.ld_flags()
    }

    pub fn os_filter(&self) -> &[Os] {
        self.rule.os_filter()
    }

    /// The object file this library compiles to, as a package path.
    pub fn output_cpp_object(&self) -> Option<PackagePath> {
        self.rule
            .output_cpp_object()
            .and_then(|n| self.package_name.join(&n).ok())
    }

    /// The probed-flags file a `system_lib` writes, as a package path.
    pub fn system_lib_config(&self) -> Option<PackagePath> {
        self.rule
            .system_lib_config()
            .and_then(|n| self.package_name.join(&n).ok())
    }
}

/// The normalizer's output: rules in dependency order, plus the profiles
/// seen in the main tree.
#[derive(Debug)]
pub struct NormalizedBuild {
    pub rules: Vec<Arc<NormalizedRule>>,
    pub profiles: Vec<Profile>,
}

pub struct BuildNormalizer {
    mbuild_name: String,
    external_packages_dir: Utf8PathBuf,
}

struct PendingRule {
    name: PackagePath,
    package_name: PackagePath,
    package_dir: Utf8PathBuf,
    root_package_dir: Utf8PathBuf,
    rule: Rule,
    deps: BTreeSet<PackagePath>,
}

impl BuildNormalizer {
    pub fn new(mbuild_name: impl Into<String>, external_packages_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            mbuild_name: mbuild_name.into(),
            external_packages_dir: external_packages_dir.into(),
        }
    }

    pub fn normalize_build(&self, repo_root_dir: &Utf8Path) -> Result<NormalizedBuild, Error> {
        let mut profiles = Vec::new();
        let mut pending: BTreeMap<PackagePath, PendingRule> = BTreeMap::new();

        self.read_rules(repo_root_dir, true, &mut pending, &mut profiles)?;
        if self.external_packages_dir.is_dir() {
            // Profiles from external packages are discarded; their other
            // rules join the shared namespace.
            self.read_rules(&self.external_packages_dir, false, &mut pending, &mut profiles)?;
        }

        let rules = top_sort(pending)?;
        Ok(NormalizedBuild { rules, profiles })
    }

    fn read_rules(
        &self,
        root_package_dir: &Utf8Path,
        include_profiles: bool,
        pending: &mut BTreeMap<PackagePath, PendingRule>,
        profiles: &mut Vec<Profile>,
    ) -> Result<(), Error> {
        for dir in find_package_dirs(root_package_dir, &self.mbuild_name)? {
            let package_path = PackagePath::from_filesystem(root_package_dir, &dir)
                .map_err(|source| Error::BadName {
                    context: dir.to_string(),
                    source,
                })?;
            let manifest_path = dir.join(&self.mbuild_name);
            let text =
                std::fs::read_to_string(&manifest_path).map_err(|e| Error::io(&manifest_path, e))?;
            debug!("loaded manifest {manifest_path}");
            for rule in mellow_manifest::parse(manifest_path.as_str(), text)? {
                match rule {
                    Rule::Profile(profile) => {
                        if include_profiles {
                            profiles.push(profile);
                        }
                    }
                    // External packages are the fetcher's concern.
                    Rule::ExternalPackage(_) => {}
                    rule => {
                        self.add_rule(rule, &package_path, &dir, root_package_dir, pending)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn add_rule(
        &self,
        rule: Rule,
        package_path: &PackagePath,
        package_dir: &Utf8Path,
        root_package_dir: &Utf8Path,
        pending: &mut BTreeMap<PackagePath, PendingRule>,
    ) -> Result<(), Error> {
        let name = package_path
            .join(rule.name())
            .map_err(|source| Error::BadName {
                context: format!("{package_path} ({})", rule.name()),
                source,
            })?;
        let deps = rule.deps(package_path).map_err(|source| Error::BadName {
            context: name.to_string(),
            source,
        })?;

        if let Some(existing) = pending.get(&name) {
            let first = existing
                .rule
                .location()
                .location_hum()
                .map(|loc| format!(", first defined at {loc}"))
                .unwrap_or_default();
            let (span, source_code) = rule.location().span_and_text("mbuild");
            return Err(Error::DuplicateRule {
                name,
                first,
                source_code,
                span,
            });
        }

        pending.insert(
            name.clone(),
            PendingRule {
                package_name: name.parent(),
                name,
                package_dir: package_dir.to_path_buf(),
                root_package_dir: root_package_dir.to_path_buf(),
                rule,
                deps,
            },
        );
        Ok(())
    }
}

/// Finds every directory under `root` holding a manifest, skipping hidden
/// directories and the fixed ignore set.
fn find_package_dirs(root: &Utf8Path, mbuild_name: &str) -> Result<Vec<Utf8PathBuf>, Error> {
    let mut output = Vec::new();
    let mut has_manifest = false;
    let entries = std::fs::read_dir(root).map_err(|e| Error::io(root, e))?;
    let mut subdirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(root, e))?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        let file_type = entry.file_type().map_err(|e| Error::io(root, e))?;
        if file_type.is_dir() {
            if name.starts_with('.') || IGNORE_DIRS.contains(&name.as_str()) {
                continue;
            }
            subdirs.push(root.join(&name));
        } else if name == mbuild_name {
            has_manifest = true;
        }
    }
    subdirs.sort();
    for subdir in subdirs {
        output.extend(find_package_dirs(&subdir, mbuild_name)?);
    }
    if has_manifest {
        output.push(root.to_path_buf());
    }
    Ok(output)
}

/// Orders rules so every dependency precedes its dependents, computing the
/// transitive lib closure as rules are emitted. Repeated passes keep the
/// implementation simple; ready rules are emitted in ascending name order so
/// the result is deterministic.
fn top_sort(
    pending: BTreeMap<PackagePath, PendingRule>,
) -> Result<Vec<Arc<NormalizedRule>>, Error> {
    let mut done: BTreeMap<PackagePath, Arc<NormalizedRule>> = BTreeMap::new();
    let mut sorted = Vec::with_capacity(pending.len());

    loop {
        let mut made_progress = false;
        let mut all_done = true;
        for (name, rule) in &pending {
            if done.contains_key(name) {
                continue;
            }

            let mut deps_done = true;
            for dep in &rule.deps {
                if !pending.contains_key(dep) {
                    let (span, source_code) = rule.rule.location().span_and_text("mbuild");
                    return Err(Error::UnknownDep {
                        rule: name.clone(),
                        dep: dep.clone(),
                        source_code,
                        span,
                    });
                }
                if !done.contains_key(dep) {
                    deps_done = false;
                    break;
                }
            }
            if !deps_done {
                all_done = false;
                continue;
            }

            let libs = rule.rule.libs().map_err(|source| Error::BadName {
                context: name.to_string(),
                source,
            })?;
            let mut transitive: BTreeMap<PackagePath, Arc<NormalizedRule>> = BTreeMap::new();
            for lib in &libs {
                let lib_rule = done
                    .get(lib)
                    .expect("libs are a subset of deps, which are all done");
                transitive.insert(lib.clone(), lib_rule.clone());
                for indirect in &lib_rule.transitive_libs {
                    transitive.insert(indirect.name.clone(), indirect.clone());
                }
            }

            let normalized = Arc::new(NormalizedRule {
                name: rule.name.clone(),
                package_name: rule.package_name.clone(),
                package_dir: rule.package_dir.clone(),
                root_package_dir: rule.root_package_dir.clone(),
                rule: rule.rule.clone(),
                deps: rule.deps.clone(),
                transitive_libs: transitive.into_values().collect(),
            });
            done.insert(name.clone(), normalized.clone());
            sorted.push(normalized);
            made_progress = true;
        }

        if all_done {
            break;
        }
        if !made_progress {
            let names = pending
                .keys()
                .filter(|name| !done.contains_key(*name))
                .map(|name| name.to_string())
                .join(", ");
            return Err(Error::Cycle { names });
        }
    }

    Ok(sorted)
}
