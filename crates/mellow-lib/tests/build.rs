//! End-to-end scenarios: manifests on disk through normalize → plan →
//! execute, with a stand-in compiler so no real toolchain is needed.
//!
//! The fake compiler concatenates its input files into the output and marks
//! it executable. "Compiling" a shell script therefore yields a runnable
//! binary, which is what the test and gen-rule scenarios exploit.

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use mellow_lib::{
    build_config::CppConfig,
    builder::{plan_build, BuildPlan, BuildPlanArgs},
    engine::{ExecutionOptions, ExecutionSummary},
    normalizer::{BuildNormalizer, NormalizedBuild},
};
use mellow_ui::ProgressUI;

const FAKE_CC: &str = r#"#!/bin/sh
# Stand-in compiler: concatenate input files into -o target.
out=""
inputs=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2 ;;
    -iquote) shift 2 ;;
    -*) shift ;;
    *) [ -f "$1" ] && inputs="$inputs $1"; shift ;;
  esac
done
if [ -n "$inputs" ]; then
  cat $inputs > "$out"
else
  : > "$out"
fi
chmod +x "$out"
"#;

struct TestRepo {
    _tmp: tempfile::TempDir,
    root: Utf8PathBuf,
    fakecc: Utf8PathBuf,
}

impl TestRepo {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        // Hidden directory: the package walk must not descend into it.
        let fakecc = root.join(".tools/fakecc");
        write_file(&fakecc, FAKE_CC);
        make_executable(&fakecc);
        Self {
            _tmp: tmp,
            root,
            fakecc,
        }
    }

    fn write(&self, rel: &str, content: &str) {
        write_file(&self.root.join(rel), content);
    }

    fn write_executable_source(&self, rel: &str, content: &str) {
        // The fake compiler preserves bytes, so a shell-script "source"
        // becomes a runnable "binary".
        self.write(rel, content);
    }

    fn delete(&self, rel: &str) {
        std::fs::remove_file(self.root.join(rel)).unwrap();
    }

    fn append(&self, rel: &str, extra: &str) {
        let path = self.root.join(rel);
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str(extra);
        std::fs::write(&path, content).unwrap();
    }

    fn build_path(&self, rel: &str) -> Utf8PathBuf {
        self.root.join("build/default").join(rel)
    }

    fn normalize(&self) -> Result<NormalizedBuild, mellow_lib::Error> {
        let normalizer =
            BuildNormalizer::new("mbuild", self.root.join("build/external-packages"));
        Ok(normalizer.normalize_build(&self.root)?)
    }

    fn plan(&self, update_test_output: bool) -> Result<BuildPlan, mellow_lib::Error> {
        let build = self.normalize()?;
        let cpp_config = CppConfig {
            compiler: self.fakecc.clone(),
            cpp_flags: Vec::new(),
            ld_flags: Vec::new(),
        };
        Ok(plan_build(BuildPlanArgs {
            build: &build,
            profile_name: None,
            output_dir_base: &self.root.join("build"),
            cpp_config: &cpp_config,
            update_test_output,
        })?)
    }

    async fn build(&self) -> Result<ExecutionSummary, mellow_lib::Error> {
        self.build_opts(false, false).await
    }

    async fn build_opts(
        &self,
        update_test_output: bool,
        force_test: bool,
    ) -> Result<ExecutionSummary, mellow_lib::Error> {
        let plan = self.plan(update_test_output)?;
        let summary = Arc::new(plan.engine)
            .execute(
                ExecutionOptions {
                    concurrency: 4,
                    force_build: false,
                    force_test,
                },
                Arc::new(ProgressUI::new()),
            )
            .await?;
        Ok(summary)
    }
}

fn write_file(path: &Utf8Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn make_executable(path: &Utf8Path) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

fn library_and_binary(repo: &TestRepo) {
    repo.write(
        "a/mbuild",
        "cpp_library:\n  name: a\n  sources:\n    a.cpp\n  headers:\n    a.hpp\n",
    );
    repo.write("a/a.cpp", "int a() { return 1; }\n");
    repo.write("a/a.hpp", "int a();\n");
    repo.write(
        "b/mbuild",
        "cpp_binary:\n  name: b\n  sources:\n    b.cpp\n  libs:\n    /a/a\n",
    );
    repo.write("b/b.cpp", "int main() { return 0; }\n");
}

#[tokio::test]
async fn library_binary_incremental_rebuilds() -> anyhow::Result<()> {
    let repo = TestRepo::new();
    library_and_binary(&repo);

    // First build compiles both.
    let summary = repo.build().await?;
    assert_eq!((summary.ran, summary.cached), (2, 0));
    assert!(summary.is_success());
    assert!(repo.build_path("a/a.o").is_file());
    assert!(repo.build_path("b/b").is_file());

    // Nothing changed: everything cached.
    let summary = repo.build().await?;
    assert_eq!((summary.ran, summary.cached), (0, 2));

    // Source edit rebuilds the library and relinks the binary.
    repo.append("a/a.cpp", "// edit\n");
    let summary = repo.build().await?;
    assert_eq!((summary.ran, summary.cached), (2, 0));

    // Header edit does the same: the header is an input of both tasks.
    repo.append("a/a.hpp", "// edit\n");
    let summary = repo.build().await?;
    assert_eq!((summary.ran, summary.cached), (2, 0));

    Ok(())
}

#[tokio::test]
async fn profile_flag_change_invalidates_compiles() -> anyhow::Result<()> {
    let repo = TestRepo::new();
    library_and_binary(&repo);
    repo.write("mbuild", "profile:\n  name: default\n  cpp_flags:\n    -O1\n");

    let summary = repo.build().await?;
    assert_eq!((summary.ran, summary.cached), (2, 0));
    let summary = repo.build().await?;
    assert_eq!((summary.ran, summary.cached), (0, 2));

    // Only the flags changed; the flag hash must invalidate both compiles.
    repo.write("mbuild", "profile:\n  name: default\n  cpp_flags:\n    -O2\n");
    let summary = repo.build().await?;
    assert_eq!((summary.ran, summary.cached), (2, 0));
    Ok(())
}

#[tokio::test]
async fn cpp_test_round_trip() -> anyhow::Result<()> {
    let repo = TestRepo::new();
    repo.write(
        "t/mbuild",
        "cpp_test:\n  name: t\n  sources:\n    t.cpp\n  output: t.out\n",
    );
    repo.write_executable_source("t/t.cpp", "#!/bin/sh\necho hello\n");

    // No expectation file yet: the run task fails with a diff.
    let summary = repo.build().await?;
    assert_eq!(summary.failed.len(), 1);
    assert!(summary.failed[0].1.contains("test failed"), "{:?}", summary.failed);
    assert!(summary.failed[0].1.contains("+ hello"), "{:?}", summary.failed);

    // --update-test-output captures the actual output.
    let summary = repo.build_opts(true, false).await?;
    assert!(summary.is_success());
    assert_eq!(
        std::fs::read_to_string(repo.root.join("t/t.out"))?,
        "hello\n"
    );

    // And the next plain build is fully cached.
    let summary = repo.build().await?;
    assert_eq!((summary.ran, summary.cached), (0, 2));

    // --force-test re-runs the test but not the compile.
    let summary = repo.build_opts(false, true).await?;
    assert_eq!((summary.ran, summary.cached), (1, 1));
    Ok(())
}

#[tokio::test]
async fn gen_rule_output_to_source() -> anyhow::Result<()> {
    let repo = TestRepo::new();
    repo.write(
        "codegen/mbuild",
        concat!(
            "cpp_binary:\n  name: gen\n  sources:\n    gen.cpp\n  libs:\n\n",
            "gen_rule:\n  name: genx\n  binary: gen\n",
            "  flags:\n    compile\n    x.yasf\n",
            "  data:\n    x.yasf\n  outputs:\n    x.generated.hpp\n",
        ),
    );
    repo.write_executable_source(
        "codegen/gen.cpp",
        "#!/bin/sh\n# args: compile <file>; emits <stem>.generated.hpp\ncat \"$2\" > x.generated.hpp\n",
    );
    repo.write("codegen/x.yasf", "record x { field y }\n");

    let summary = repo.build().await?;
    assert!(summary.is_success(), "{:?}", summary.failed);
    let generated = repo.root.join("codegen/x.generated.hpp");
    assert_eq!(
        std::fs::read_to_string(&generated)?,
        "record x { field y }\n"
    );

    // Unchanged inputs: both tasks cached.
    let summary = repo.build().await?;
    assert_eq!((summary.ran, summary.cached), (0, 2));

    // Deleting the output forces the gen rule to run again.
    repo.delete("codegen/x.generated.hpp");
    let summary = repo.build().await?;
    assert!(summary.is_success());
    assert_eq!(summary.ran, 1);
    assert!(generated.is_file());
    Ok(())
}

#[tokio::test]
async fn duplicate_producer_fails_before_running() {
    let repo = TestRepo::new();
    repo.write(
        "codegen/mbuild",
        concat!(
            "cpp_binary:\n  name: gen\n  sources:\n    gen.cpp\n  libs:\n\n",
            "gen_rule:\n  name: one\n  binary: gen\n  outputs:\n    x.hpp\n\n",
            "gen_rule:\n  name: two\n  binary: gen\n  outputs:\n    x.hpp\n",
        ),
    );
    repo.write("codegen/gen.cpp", "#!/bin/sh\n: > x.hpp\n");

    let err = repo.plan(false).unwrap_err();
    assert!(
        err.to_string().contains("same output"),
        "unexpected error: {err}"
    );
    // Nothing was built.
    assert!(!repo.build_path("codegen/gen").exists());
}

#[tokio::test]
async fn dependency_cycle_is_fatal() {
    let repo = TestRepo::new();
    repo.write("a/mbuild", "cpp_library:\n  name: a\n  libs:\n    /b/b\n");
    repo.write("b/mbuild", "cpp_library:\n  name: b\n  libs:\n    /a/a\n");

    let err = repo.normalize().unwrap_err();
    let message = err.to_string();
    assert!(message.contains("cycle"), "{message}");
    assert!(
        message.contains("/a/a") || message.contains("/b/b"),
        "{message}"
    );
}

#[tokio::test]
async fn os_filter_skips_foreign_tests() -> anyhow::Result<()> {
    let repo = TestRepo::new();
    // A test pinned to an OS this host is not.
    let foreign = match std::env::consts::OS {
        "macos" => "linux",
        _ => "macos",
    };
    repo.write(
        "t/mbuild",
        &format!(
            "cpp_test:\n  name: t\n  sources:\n    t.cpp\n  output: t.out\n  os_filter:\n    {foreign}\n"
        ),
    );
    repo.write_executable_source("t/t.cpp", "#!/bin/sh\necho hi\n");

    let plan = repo.plan(false)?;
    // Neither the compile nor the run task exists.
    assert_eq!(plan.engine.num_tasks(), 0);

    // Matching filter: both tasks are produced.
    let native = std::env::consts::OS;
    if native == "linux" || native == "macos" {
        repo.write(
            "t/mbuild",
            &format!(
                "cpp_test:\n  name: t\n  sources:\n    t.cpp\n  output: t.out\n  os_filter:\n    {native}\n"
            ),
        );
        let plan = repo.plan(false)?;
        assert_eq!(plan.engine.num_tasks(), 2);
    }
    Ok(())
}

#[tokio::test]
async fn system_lib_probe_feeds_dependent_compiles() -> anyhow::Result<()> {
    let repo = TestRepo::new();
    let fake_pkg_config = repo.root.join(".tools/fake-pkg-config");
    write_file(
        &fake_pkg_config,
        "#!/bin/sh\ncase \"$1\" in\n  --libs) echo -lz ;;\n  --cflags) echo -I/usr/include/zlib ;;\nesac\n",
    );
    make_executable(&fake_pkg_config);

    repo.write(
        "z/mbuild",
        &format!(
            "system_lib:\n  name: z\n  command: {fake_pkg_config}\n  provide_headers:\n    zlib.h\n\ncpp_library:\n  name: zuser\n  sources:\n    zuser.cpp\n  libs:\n    /z/z\n"
        ),
    );
    repo.write("z/zuser.cpp", "int z() { return 0; }\n");

    let summary = repo.build().await?;
    assert!(summary.is_success(), "{:?}", summary.failed);

    let config_text = std::fs::read_to_string(repo.build_path("z/z.output"))?;
    assert!(config_text.contains("-lz"), "{config_text}");
    assert!(config_text.contains("-I/usr/include/zlib"), "{config_text}");

    // The probe output is an input of the dependent compile, so the tasks
    // are ordered probe-then-compile.
    let plan = repo.plan(false)?;
    let compile_key = mellow_paths::PackagePath::from_str("/z/zuser.compile").unwrap();
    let deps = plan.engine.dependencies(&compile_key).unwrap();
    assert_eq!(deps.len(), 1);
    assert_eq!(deps[0].to_string(), "/z/z.run");
    Ok(())
}

#[tokio::test]
async fn failed_compile_reports_and_skips_dependents() -> anyhow::Result<()> {
    let repo = TestRepo::new();
    // A compiler that always fails.
    let badcc = repo.root.join(".tools/badcc");
    write_file(&badcc, "#!/bin/sh\necho 'boom: syntax error' >&2\nexit 1\n");
    make_executable(&badcc);

    repo.write("a/mbuild", "cpp_library:\n  name: a\n  sources:\n    a.cpp\n");
    repo.write("a/a.cpp", "int a() { return 1; }\n");
    repo.write(
        "b/mbuild",
        "cpp_binary:\n  name: b\n  sources:\n    b.cpp\n  libs:\n    /a/a\n",
    );
    repo.write("b/b.cpp", "int main() {}\n");
    repo.write(
        "mbuild",
        &format!("profile:\n  name: default\n  cpp_flags:\n  cpp_compiler: {badcc}\n"),
    );

    let summary = repo.build().await?;
    assert_eq!(summary.failed.len(), 1);
    assert!(summary.failed[0].1.contains("boom"), "{:?}", summary.failed);
    assert_eq!(summary.did_not_run.len(), 1);
    assert_eq!(summary.did_not_run[0].to_string(), "/b/b.compile");
    Ok(())
}
