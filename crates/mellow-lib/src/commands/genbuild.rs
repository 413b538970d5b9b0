//! The `genbuild` command: infer an `mbuild` from the sources on disk.
//!
//! Scans a package directory's `.cpp`/`.hpp` files and their `#include`
//! lines: a source/header pair becomes a `cpp_library`, a file defining
//! `main` becomes a `cpp_binary`, and `*_test.cpp` files become `cpp_test`
//! rules. Quoted includes turn into lib edges: a bare filename points at a
//! sibling rule, a path points at another package. Hand-maintained fields of
//! existing rules (flags, os_filter, test outputs) survive regeneration.

use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};
use mellow_paths::PackagePath;
use mellow_manifest::{CppBinary, CppLibrary, CppTest, Rule};

use crate::{cli::GenbuildArgs, repo, Error};

pub fn run(args: GenbuildArgs) -> Result<(), Error> {
    let cwd = std::env::current_dir().map_err(|e| Error::io(".", e))?;
    let cwd = Utf8PathBuf::from_path_buf(cwd)
        .map_err(|p| Error::InvalidArgs(format!("current directory is not UTF-8: {p:?}")))?;
    let dir = match &args.dir {
        Some(dir) if dir.is_absolute() => dir.clone(),
        Some(dir) => cwd.join(dir),
        None => cwd.clone(),
    };
    let repo_root = repo::find_root(&dir).unwrap_or_else(|| dir.clone());
    let package = PackagePath::from_filesystem(&repo_root, &dir)
        .map_err(|e| Error::InvalidArgs(e.to_string()))?;

    let files = scan_sources(&dir)?;
    let inferred = infer_rules(&package, &files);

    let manifest_path = dir.join(&args.mbuild_name);
    let existing = if manifest_path.is_file() {
        let text = std::fs::read_to_string(&manifest_path)
            .map_err(|e| Error::io(&manifest_path, e))?;
        mellow_manifest::parse(manifest_path.as_str(), text)?
    } else {
        Vec::new()
    };

    let mut merged = merge_rules(existing, inferred);
    for rule in &mut merged {
        rule.sort_for_format();
    }
    std::fs::write(&manifest_path, mellow_manifest::write(&merged))
        .map_err(|e| Error::io(&manifest_path, e))?;
    println!("Wrote {manifest_path}");
    Ok(())
}

#[derive(Debug)]
struct SourceFile {
    /// Filename, e.g. `blake.cpp`.
    name: String,
    /// Filename without extension.
    stem: String,
    is_header: bool,
    defines_main: bool,
    /// Paths from `#include "..."` lines, as written.
    includes: Vec<String>,
}

fn scan_sources(dir: &Utf8Path) -> Result<Vec<SourceFile>, Error> {
    let mut files = Vec::new();
    for entry in dir.read_dir_utf8().map_err(|e| Error::io(dir, e))? {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        let path = entry.path();
        let (Some(stem), Some(extension)) = (path.file_stem(), path.extension()) else {
            continue;
        };
        let is_header = extension == "hpp";
        if !is_header && extension != "cpp" {
            continue;
        }
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        files.push(SourceFile {
            name: entry.file_name().to_owned(),
            stem: stem.to_owned(),
            is_header,
            defines_main: text.contains("int main("),
            includes: scan_includes(&text),
        });
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

fn scan_includes(text: &str) -> Vec<String> {
    let mut includes = Vec::new();
    for line in text.lines() {
        let line = line.trim_start();
        let Some(rest) = line.strip_prefix("#include") else {
            continue;
        };
        let rest = rest.trim_start();
        if let Some(rest) = rest.strip_prefix('"') {
            if let Some(end) = rest.find('"') {
                includes.push(rest[..end].to_owned());
            }
        }
    }
    includes
}

/// Maps one include path to the lib that provides it. Bare filenames point
/// at a sibling rule in `package`; paths name a package from the repo root.
fn include_to_lib(package: &PackagePath, own_stem: &str, include: &str) -> Option<String> {
    let path = Utf8Path::new(include);
    let stem = path.file_stem()?;
    if include.contains('/') {
        let parent = path.parent().filter(|p| !p.as_str().is_empty())?;
        Some(format!("/{parent}/{stem}"))
    } else if stem == own_stem {
        // Our own header.
        None
    } else {
        package.join(stem).ok().map(|p| p.to_string())
    }
}

fn infer_rules(package: &PackagePath, files: &[SourceFile]) -> Vec<Rule> {
    let stems: BTreeSet<&str> = files.iter().map(|f| f.stem.as_str()).collect();
    let mut rules = Vec::new();

    for stem in stems {
        let group: Vec<&SourceFile> = files.iter().filter(|f| f.stem == stem).collect();
        let header = group.iter().find(|f| f.is_header);
        let source = group.iter().find(|f| !f.is_header);

        let mut libs: BTreeSet<String> = BTreeSet::new();
        for file in &group {
            for include in &file.includes {
                libs.extend(include_to_lib(package, stem, include));
            }
        }
        let libs: Vec<String> = libs.into_iter().collect();

        if stem.ends_with("_test") {
            let Some(source) = source else {
                continue;
            };
            rules.push(Rule::CppTest(CppTest {
                name: stem.to_owned(),
                sources: vec![source.name.clone()],
                libs,
                output: format!("{stem}.out"),
                ..Default::default()
            }));
        } else if let Some(main_source) = source.filter(|f| f.defines_main) {
            rules.push(Rule::CppBinary(CppBinary {
                name: stem.to_owned(),
                sources: vec![main_source.name.clone()],
                libs,
                ..Default::default()
            }));
        } else {
            rules.push(Rule::CppLibrary(CppLibrary {
                name: stem.to_owned(),
                sources: source.iter().map(|f| f.name.clone()).collect(),
                headers: header.iter().map(|f| f.name.clone()).collect(),
                libs,
                ..Default::default()
            }));
        }
    }
    rules
}

/// Folds inferred rules into an existing manifest: recomputed fields
/// (sources, headers, libs) are replaced, manual fields are kept, rules the
/// scan does not produce (profiles, gen_rules, system_libs, externals) pass
/// through untouched.
fn merge_rules(existing: Vec<Rule>, inferred: Vec<Rule>) -> Vec<Rule> {
    let mut merged = existing;
    for new_rule in inferred {
        let slot = merged
            .iter_mut()
            .find(|r| r.kind() == new_rule.kind() && r.name() == new_rule.name());
        match (slot, new_rule) {
            (Some(Rule::CppLibrary(old)), Rule::CppLibrary(new)) => {
                old.sources = new.sources;
                old.headers = new.headers;
                old.libs = new.libs;
            }
            (Some(Rule::CppBinary(old)), Rule::CppBinary(new)) => {
                old.sources = new.sources;
                old.libs = new.libs;
            }
            (Some(Rule::CppTest(old)), Rule::CppTest(new)) => {
                old.sources = new.sources;
                old.libs = new.libs;
            }
            (Some(_), _) => {}
            (None, new_rule) => merged.push(new_rule),
        }
    }
    merged
}
