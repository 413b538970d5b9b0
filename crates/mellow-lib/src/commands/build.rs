//! The `build` command: normalize, plan, execute, summarize.

use std::sync::Arc;

use mellow_ui::ProgressUI;
use tracing::info;

use crate::{
    build_config::BuildConfig,
    builder::{plan_build, BuildPlanArgs},
    cli::BuildArgs,
    commands::{anchor, working_root},
    engine::ExecutionOptions,
    normalizer::BuildNormalizer,
    Error,
};

pub async fn run(args: BuildArgs) -> Result<(), Error> {
    let repo_root = working_root()?;
    let output_dir = anchor(&repo_root, &args.output_dir);
    let external_packages_dir = output_dir.join("external-packages");

    let normalizer = BuildNormalizer::new(&args.mbuild_name, external_packages_dir);
    let build = normalizer.normalize_build(&repo_root)?;

    let build_config_path = anchor(&repo_root, &args.build_config);
    if !build_config_path.is_file() {
        info!("build config '{build_config_path}' not found, creating one with default settings");
        BuildConfig::from_environment(None).write(&build_config_path)?;
    }
    let build_config = BuildConfig::load(&build_config_path)?;

    let plan = plan_build(BuildPlanArgs {
        build: &build,
        profile_name: args.profile.as_deref(),
        output_dir_base: &output_dir,
        cpp_config: &build_config.cpp,
        update_test_output: args.update_test_output,
    })?;

    let summary = Arc::new(plan.engine)
        .execute(
            ExecutionOptions {
                concurrency: num_cpus::get(),
                force_build: args.force_build,
                force_test: args.force_test,
            },
            Arc::new(ProgressUI::new()),
        )
        .await?;

    for (_key, message) in &summary.failed {
        eprintln!("{message}");
    }
    for key in &summary.did_not_run {
        eprintln!("task '{key}' did not run");
    }
    println!("{}", summary.counts_line());

    if summary.is_success() {
        println!("Done");
        Ok(())
    } else {
        Err(Error::TasksFailed {
            failed: summary.failed.len(),
            skipped: summary.did_not_run.len(),
        })
    }
}
