//! The `mbuild` manifest model.
//!
//! A manifest is a sequence of rule records in a small indentation-based
//! text format:
//!
//! ```text
//! cpp_library:
//!   name: blake_hash
//!   sources:
//!     blake.cpp
//!   headers:
//!     blake.hpp
//!   libs:
//!     /base/bytes
//! ```
//!
//! [`parse`] turns a manifest into typed [`Rule`] records that remember
//! where they came from; [`write`] emits the canonical form the `format`
//! command enforces.

mod parser;
mod records;
mod writer;

use std::fmt;

use camino::Utf8PathBuf;
use mellow_errors::Spanned;
pub use parser::{parse, parse_records, ParseError};
pub use records::{Atom, FieldBag, RawField, RawRecord};
use serde::{Deserialize, Serialize};
pub use writer::{quote, write, write_record};

/// Operating systems a `cpp_test` can be restricted to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Linux,
    Macos,
}

impl Os {
    pub fn current() -> Option<Os> {
        match std::env::consts::OS {
            "linux" => Some(Os::Linux),
            "macos" => Some(Os::Macos),
            _ => None,
        }
    }

    fn parse(s: &str) -> Option<Os> {
        match s {
            "linux" => Some(Os::Linux),
            "macos" => Some(Os::Macos),
            _ => None,
        }
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Os::Linux => f.write_str("linux"),
            Os::Macos => f.write_str("macos"),
        }
    }
}

/// A named set of compile/link flags and an optional compiler override.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Profile {
    pub name: String,
    pub cpp_flags: Vec<String>,
    pub ld_flags: Vec<String>,
    pub cpp_compiler: Option<Utf8PathBuf>,
    pub location: Spanned<()>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CppBinary {
    pub name: String,
    pub sources: Vec<String>,
    pub libs: Vec<String>,
    pub ld_flags: Vec<String>,
    pub cpp_flags: Vec<String>,
    pub location: Spanned<()>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CppLibrary {
    pub name: String,
    pub sources: Vec<String>,
    pub headers: Vec<String>,
    pub libs: Vec<String>,
    pub ld_flags: Vec<String>,
    pub cpp_flags: Vec<String>,
    pub location: Spanned<()>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CppTest {
    pub name: String,
    pub sources: Vec<String>,
    pub libs: Vec<String>,
    /// Filename of the expected-output file, next to the manifest.
    pub output: String,
    pub os_filter: Vec<Os>,
    pub location: Spanned<()>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GenRule {
    pub name: String,
    /// Package-local name of the `cpp_binary` rule to run.
    pub binary: String,
    pub flags: Vec<String>,
    pub data: Vec<String>,
    pub outputs: Vec<String>,
    pub output_to_src: bool,
    pub location: Spanned<()>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SystemLib {
    pub name: String,
    /// The pkg-config style tool queried with `--libs` / `--cflags`.
    pub command: Utf8PathBuf,
    pub flags: Vec<String>,
    pub provide_headers: Vec<String>,
    pub location: Spanned<()>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExternalPackage {
    pub name: String,
    pub source: Option<String>,
    pub url: Option<String>,
    pub location: Spanned<()>,
}

/// One record of a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    Profile(Profile),
    CppBinary(CppBinary),
    CppLibrary(CppLibrary),
    CppTest(CppTest),
    GenRule(GenRule),
    SystemLib(SystemLib),
    ExternalPackage(ExternalPackage),
}

impl Rule {
    pub fn kind(&self) -> &'static str {
        match self {
            Rule::Profile(_) => "profile",
            Rule::CppBinary(_) => "cpp_binary",
            Rule::CppLibrary(_) => "cpp_library",
            Rule::CppTest(_) => "cpp_test",
            Rule::GenRule(_) => "gen_rule",
            Rule::SystemLib(_) => "system_lib",
            Rule::ExternalPackage(_) => "external_package",
        }
    }

    /// The package-local rule name.
    pub fn name(&self) -> &str {
        match self {
            Rule::Profile(r) => &r.name,
            Rule::CppBinary(r) => &r.name,
            Rule::CppLibrary(r) => &r.name,
            Rule::CppTest(r) => &r.name,
            Rule::GenRule(r) => &r.name,
            Rule::SystemLib(r) => &r.name,
            Rule::ExternalPackage(r) => &r.name,
        }
    }

    pub fn location(&self) -> &Spanned<()> {
        match self {
            Rule::Profile(r) => &r.location,
            Rule::CppBinary(r) => &r.location,
            Rule::CppLibrary(r) => &r.location,
            Rule::CppTest(r) => &r.location,
            Rule::GenRule(r) => &r.location,
            Rule::SystemLib(r) => &r.location,
            Rule::ExternalPackage(r) => &r.location,
        }
    }

    /// Sorts the fields the formatter keeps ordered.
    pub fn sort_for_format(&mut self) {
        match self {
            Rule::Profile(_) | Rule::SystemLib(_) | Rule::ExternalPackage(_) => {}
            Rule::CppBinary(r) => {
                r.sources.sort();
                r.libs.sort();
            }
            Rule::CppLibrary(r) => {
                r.sources.sort();
                r.headers.sort();
                r.libs.sort();
            }
            Rule::CppTest(r) => {
                r.sources.sort();
                r.libs.sort();
            }
            Rule::GenRule(r) => {
                r.outputs.sort();
            }
        }
    }
}
