//! The `fetch` command: materialize external packages.
//!
//! For each `external_package` record in the root manifest, either copy a
//! local source directory or download-and-extract an archive, then install
//! the package's subdirectory under `<output>/external-packages/<name>`.

use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};
use mellow_manifest::Rule;
use tracing::info;

use crate::{
    cli::FetchArgs,
    commands::{anchor, working_root},
    fs_util, Error,
};

pub fn run(args: FetchArgs) -> Result<(), Error> {
    let repo_root = working_root()?;
    let output_dir = anchor(&repo_root, &args.output_dir);
    let target_dir = output_dir.join("external-packages");
    let tmp_dir = output_dir.join(".downloads");
    std::fs::create_dir_all(&tmp_dir).map_err(|e| Error::io(&tmp_dir, e))?;

    let manifest_path = repo_root.join(&args.mbuild_name);
    let text =
        std::fs::read_to_string(&manifest_path).map_err(|e| Error::io(&manifest_path, e))?;
    let rules = mellow_manifest::parse(manifest_path.as_str(), text)?;

    let mut seen = BTreeSet::new();
    for rule in rules {
        let Rule::ExternalPackage(pkg) = rule else {
            continue;
        };
        if !seen.insert(pkg.name.clone()) {
            continue;
        }
        info!("fetching {}", pkg.name);
        std::fs::create_dir_all(&target_dir).map_err(|e| Error::io(&target_dir, e))?;

        let source_dir = if let Some(source) = &pkg.source {
            anchor(&repo_root, Utf8Path::new(source))
        } else if let Some(url) = &pkg.url {
            download_and_extract(&tmp_dir, &pkg.name, url)?
        } else {
            return Err(Error::External(format!(
                "external package '{}' has neither a source nor a url",
                pkg.name
            )));
        };

        let dest = target_dir.join(&pkg.name);
        if dest.exists() {
            std::fs::remove_dir_all(&dest).map_err(|e| Error::io(&dest, e))?;
        }
        let package_subdir = source_dir.join(&pkg.name);
        fs_util::copy_dir_recursive(&package_subdir, &dest)
            .map_err(|e| Error::io(&package_subdir, e))?;
    }
    Ok(())
}

/// Downloads `<url>` with curl and unpacks it with tar; the archive must
/// hold exactly one top-level directory, which is returned.
fn download_and_extract(tmp_dir: &Utf8Path, name: &str, url: &str) -> Result<Utf8PathBuf, Error> {
    let pkg_tmp_dir = tmp_dir.join(name);
    if pkg_tmp_dir.exists() {
        std::fs::remove_dir_all(&pkg_tmp_dir).map_err(|e| Error::io(&pkg_tmp_dir, e))?;
    }
    std::fs::create_dir_all(&pkg_tmp_dir).map_err(|e| Error::io(&pkg_tmp_dir, e))?;
    let download_file = pkg_tmp_dir.join(format!("{name}.tar.gz"));

    run_tool(
        "curl",
        &[
            url,
            "--location",
            "--silent",
            "--show-error",
            "--output",
            download_file.as_str(),
        ],
    )?;
    run_tool(
        "tar",
        &["-C", pkg_tmp_dir.as_str(), "-xzf", download_file.as_str()],
    )?;

    let mut dirs = Vec::new();
    for entry in pkg_tmp_dir
        .read_dir_utf8()
        .map_err(|e| Error::io(&pkg_tmp_dir, e))?
    {
        let entry = entry.map_err(|e| Error::io(&pkg_tmp_dir, e))?;
        if entry.path().is_dir() {
            dirs.push(entry.path().to_path_buf());
        }
    }
    match dirs.as_slice() {
        [single] => Ok(single.clone()),
        _ => Err(Error::External(format!(
            "archive for '{name}' extracted to {} directories, expected exactly one",
            dirs.len()
        ))),
    }
}

fn run_tool(tool: &str, args: &[&str]) -> Result<(), Error> {
    let status = std::process::Command::new(tool)
        .args(args)
        .status()
        .map_err(|e| Error::External(format!("failed to run {tool}: {e}")))?;
    if !status.success() {
        return Err(Error::External(format!("{tool} exited with {status}")));
    }
    Ok(())
}
