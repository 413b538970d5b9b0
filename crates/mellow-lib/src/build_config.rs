//! The machine-local build configuration.
//!
//! The build config is a small per-checkout file (default `.build-config`)
//! naming the compiler and any extra flags this machine needs. It is never
//! committed; the first `build` generates one from the environment when it
//! is missing, and `mellow config` regenerates it on demand.

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use mellow_manifest::{parse_records, quote, FieldBag, ParseError};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("{path}: {source}")]
    Io {
        path: Utf8PathBuf,
        source: std::io::Error,
    },
}

/// The `cpp:` leg of the build config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CppConfig {
    pub compiler: Utf8PathBuf,
    pub cpp_flags: Vec<String>,
    pub ld_flags: Vec<String>,
}

impl Default for CppConfig {
    fn default() -> Self {
        Self {
            compiler: "g++".into(),
            cpp_flags: Vec::new(),
            ld_flags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildConfig {
    pub cpp: CppConfig,
}

impl BuildConfig {
    pub fn load(path: &Utf8Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_text(path.as_str(), &text)
    }

    pub fn from_text(label: &str, text: &str) -> Result<Self, Error> {
        let label: Arc<str> = Arc::from(label);
        let text: Arc<str> = Arc::from(text);
        let mut config = BuildConfig::default();
        for record in parse_records(&label, &text)? {
            if record.kind.text != "cpp" {
                // Unknown legs are reserved for other toolchains.
                debug!("ignoring build-config record '{}'", record.kind.text);
                continue;
            }
            let mut bag = FieldBag::new(record, &label, &text);
            let compiler = bag.scalar("compiler")?;
            config.cpp = CppConfig {
                compiler: bag.required("compiler", compiler)?.into(),
                cpp_flags: bag.list("cpp_flags")?.unwrap_or_default(),
                ld_flags: bag.list("ld_flags")?.unwrap_or_default(),
            };
            bag.finish()?;
        }
        Ok(config)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::from("cpp:\n");
        out.push_str(&format!("  compiler: {}\n", quote(self.cpp.compiler.as_str())));
        if !self.cpp.cpp_flags.is_empty() {
            out.push_str("  cpp_flags:\n");
            for flag in &self.cpp.cpp_flags {
                out.push_str(&format!("    {}\n", quote(flag)));
            }
        }
        if !self.cpp.ld_flags.is_empty() {
            out.push_str("  ld_flags:\n");
            for flag in &self.cpp.ld_flags {
                out.push_str(&format!("    {}\n", quote(flag)));
            }
        }
        out
    }

    pub fn write(&self, path: &Utf8Path) -> Result<(), Error> {
        std::fs::write(path, self.to_text()).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Builds a config from the environment: the compiler from
    /// `default_compiler`, `$CXX`, or `g++` (resolved against `PATH` when not
    /// already a path), and flags from `$CXXFLAGS`/`$CPPFLAGS` and
    /// `$LDFLAGS`/`$LDLIBS`.
    pub fn from_environment(default_compiler: Option<&Utf8Path>) -> Self {
        let compiler = resolve_compiler(default_compiler);
        let mut cpp_flags = Vec::new();
        append_env_flags("CXXFLAGS", &mut cpp_flags);
        append_env_flags("CPPFLAGS", &mut cpp_flags);
        let mut ld_flags = Vec::new();
        append_env_flags("LDFLAGS", &mut ld_flags);
        append_env_flags("LDLIBS", &mut ld_flags);
        Self {
            cpp: CppConfig {
                compiler,
                cpp_flags,
                ld_flags,
            },
        }
    }
}

fn resolve_compiler(default_compiler: Option<&Utf8Path>) -> Utf8PathBuf {
    if let Some(name) = default_compiler {
        match resolve_executable(name.as_str()) {
            Some(path) => return path,
            None => warn!("compiler '{name}' not found in PATH"),
        }
    }
    if let Ok(cxx) = std::env::var("CXX") {
        match resolve_executable(&cxx) {
            Some(path) => return path,
            None => warn!("compiler '{cxx}' from $CXX not found in PATH"),
        }
    }
    resolve_executable("g++").unwrap_or_else(|| "g++".into())
}

fn resolve_executable(name: &str) -> Option<Utf8PathBuf> {
    if name.contains('/') {
        let path = Utf8PathBuf::from(name);
        return path.is_file().then_some(path);
    }
    which::which(name)
        .ok()
        .and_then(|p| Utf8PathBuf::from_path_buf(p).ok())
}

fn append_env_flags(variable: &str, flags: &mut Vec<String>) {
    if let Ok(value) = std::env::var(variable) {
        flags.extend(value.split_whitespace().map(str::to_owned));
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn roundtrips_through_text() {
        let config = BuildConfig {
            cpp: CppConfig {
                compiler: "/usr/bin/g++".into(),
                cpp_flags: vec!["-O2".into(), "-Wall".into()],
                ld_flags: vec!["-lm".into()],
            },
        };
        let text = config.to_text();
        assert_eq!(BuildConfig::from_text("cfg", &text).unwrap(), config);
    }

    #[test]
    fn missing_cpp_record_defaults_to_gxx() {
        let config = BuildConfig::from_text("cfg", "").unwrap();
        assert_eq!(config.cpp.compiler, Utf8PathBuf::from("g++"));
    }

    #[test]
    fn compiler_is_required_in_cpp_record() {
        let err = BuildConfig::from_text("cfg", "cpp:\n  cpp_flags:\n").unwrap_err();
        assert!(err.to_string().contains("'compiler' not defined"));
    }
}
