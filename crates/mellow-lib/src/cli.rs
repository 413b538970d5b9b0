//! Command-line surface of the `mellow` binary.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

use crate::{commands, Error};

#[derive(Debug, Parser)]
#[command(
    name = "mellow",
    about = "A small hermetic build system for C/C++ projects",
    version
)]
pub struct Args {
    /// Log what every task is doing.
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build all targets in the repository.
    Build(BuildArgs),
    /// Generate the machine-local build config from the environment.
    Config(ConfigArgs),
    /// Fetch external packages declared in the tree.
    Fetch(FetchArgs),
    /// Re-serialize a manifest in canonical form.
    Format(FormatArgs),
    /// Infer or update an mbuild for a directory from its sources.
    Genbuild(GenbuildArgs),
}

#[derive(Debug, clap::Args)]
pub struct BuildArgs {
    /// Profile to build with; defaults to the first declared profile.
    #[arg(long)]
    pub profile: Option<String>,
    /// Run every task even when up to date.
    #[arg(long)]
    pub force_build: bool,
    /// Re-run tests even when up to date.
    #[arg(long)]
    pub force_test: bool,
    /// Where build outputs land.
    #[arg(long, default_value = "build")]
    pub output_dir: Utf8PathBuf,
    /// Manifest filename to look for.
    #[arg(long, default_value = "mbuild")]
    pub mbuild_name: String,
    /// Overwrite test expectation files with the actual output.
    #[arg(long)]
    pub update_test_output: bool,
    /// Machine-local build config file.
    #[arg(long, default_value = ".build-config")]
    pub build_config: Utf8PathBuf,
}

#[derive(Debug, clap::Args)]
pub struct ConfigArgs {
    /// Compiler to record; resolved against PATH when not a path.
    #[arg(long)]
    pub cpp_compiler: Option<Utf8PathBuf>,
    /// Where to write the config.
    #[arg(long, default_value = ".build-config")]
    pub output: Utf8PathBuf,
}

#[derive(Debug, clap::Args)]
pub struct FetchArgs {
    #[arg(long, default_value = "build")]
    pub output_dir: Utf8PathBuf,
    #[arg(long, default_value = "mbuild")]
    pub mbuild_name: String,
}

#[derive(Debug, clap::Args)]
pub struct FormatArgs {
    /// Rewrite the file instead of printing to stdout.
    #[arg(long)]
    pub inplace: bool,
    /// Exit non-zero when the file is not canonically formatted.
    #[arg(long)]
    pub check_only: bool,
    /// Manifest to format; stdin when absent or '-'.
    pub file: Option<Utf8PathBuf>,
}

#[derive(Debug, clap::Args)]
pub struct GenbuildArgs {
    /// Package directory to scan; defaults to the current directory.
    pub dir: Option<Utf8PathBuf>,
    #[arg(long, default_value = "mbuild")]
    pub mbuild_name: String,
}

/// Dispatches a parsed command line.
pub fn run(args: Args) -> Result<(), Error> {
    match args.command {
        Command::Build(build_args) => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(Error::Runtime)?;
            runtime.block_on(commands::build::run(build_args))
        }
        Command::Config(config_args) => commands::config::run(config_args),
        Command::Fetch(fetch_args) => commands::fetch::run(fetch_args),
        Command::Format(format_args) => commands::format::run(format_args),
        Command::Genbuild(genbuild_args) => commands::genbuild::run(genbuild_args),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn build_flags_parse() {
        let args = Args::parse_from([
            "mellow",
            "build",
            "--profile",
            "release",
            "--force-build",
            "--update-test-output",
        ]);
        let Command::Build(build) = args.command else {
            panic!("expected build");
        };
        assert_eq!(build.profile.as_deref(), Some("release"));
        assert!(build.force_build);
        assert!(!build.force_test);
        assert!(build.update_test_output);
        assert_eq!(build.output_dir, Utf8PathBuf::from("build"));
        assert_eq!(build.mbuild_name, "mbuild");
    }

    #[test]
    fn format_modes_parse() {
        let args = Args::parse_from(["mellow", "format", "--check-only", "pkg/mbuild"]);
        let Command::Format(format) = args.command else {
            panic!("expected format");
        };
        assert!(format.check_only);
        assert!(!format.inplace);
        assert_eq!(format.file, Some(Utf8PathBuf::from("pkg/mbuild")));
    }
}
