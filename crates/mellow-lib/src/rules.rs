//! Uniform accessors over the rule kinds.
//!
//! Rule handling throughout the orchestrator goes through [`RuleExt`], so
//! each call site can ask any rule for its sources or libs and get an empty
//! answer from kinds without the capability instead of matching seven
//! variants itself.

use std::collections::BTreeSet;

use mellow_manifest::{Os, Rule};
use mellow_paths::{PackagePath, PathError};

static NO_STRINGS: &[String] = &[];
static NO_OS: &[Os] = &[];

pub trait RuleExt {
    fn sources(&self) -> &[String];
    fn headers(&self) -> &[String];
    fn data(&self) -> &[String];
    fn lib_names(&self) -> &[String];
    fn cpp_flags(&self) -> &[String];
    fn ld_flags(&self) -> &[String];
    fn os_filter(&self) -> &[Os];

    /// Libs parsed as fully-qualified package paths.
    fn libs(&self) -> Result<BTreeSet<PackagePath>, PathError>;

    /// Everything this rule must wait for during normalization: its libs,
    /// plus the binary a `gen_rule` runs (a package-local name).
    fn deps(&self, package: &PackagePath) -> Result<BTreeSet<PackagePath>, PathError>;

    /// `<name>.o` for a `cpp_library` with sources; header-only libraries
    /// produce nothing.
    fn output_cpp_object(&self) -> Option<String>;

    /// `<name>.output` for a `system_lib`: the probed-flags file under the
    /// build dir.
    fn system_lib_config(&self) -> Option<String>;
}

impl RuleExt for Rule {
    fn sources(&self) -> &[String] {
        match self {
            Rule::CppBinary(r) => &r.sources,
            Rule::CppLibrary(r) => &r.sources,
            Rule::CppTest(r) => &r.sources,
            _ => NO_STRINGS,
        }
    }

    fn headers(&self) -> &[String] {
        match self {
            Rule::CppLibrary(r) => &r.headers,
            _ => NO_STRINGS,
        }
    }

    fn data(&self) -> &[String] {
        match self {
            Rule::GenRule(r) => &r.data,
            _ => NO_STRINGS,
        }
    }

    fn lib_names(&self) -> &[String] {
        match self {
            Rule::CppBinary(r) => &r.libs,
            Rule::CppLibrary(r) => &r.libs,
            Rule::CppTest(r) => &r.libs,
            _ => NO_STRINGS,
        }
    }

    fn cpp_flags(&self) -> &[String] {
        match self {
            Rule::CppBinary(r) => &r.cpp_flags,
            Rule::CppLibrary(r) => &r.cpp_flags,
            _ => NO_STRINGS,
        }
    }

    fn ld_flags(&self) -> &[String] {
        match self {
            Rule::CppBinary(r) => &r.ld_flags,
            Rule::CppLibrary(r) => &r.ld_flags,
            _ => NO_STRINGS,
        }
    }

    fn os_filter(&self) -> &[Os] {
        match self {
            Rule::CppTest(r) => &r.os_filter,
            _ => NO_OS,
        }
    }

    fn libs(&self) -> Result<BTreeSet<PackagePath>, PathError> {
        self.lib_names()
            .iter()
            .map(|name| PackagePath::from_str(name))
            .collect()
    }

    fn deps(&self, package: &PackagePath) -> Result<BTreeSet<PackagePath>, PathError> {
        let mut deps = self.libs()?;
        if let Rule::GenRule(r) = self {
            deps.insert(package.join(&r.binary)?);
        }
        Ok(deps)
    }

    fn output_cpp_object(&self) -> Option<String> {
        match self {
            Rule::CppLibrary(r) if !r.sources.is_empty() => Some(format!("{}.o", r.name)),
            _ => None,
        }
    }

    fn system_lib_config(&self) -> Option<String> {
        match self {
            Rule::SystemLib(r) => Some(format!("{}.output", r.name)),
            _ => None,
        }
    }
}
