//! Translates normalized rules into executable tasks.
//!
//! One rule becomes zero or more tasks: libraries and binaries get a
//! `.compile` task, tests add a `.run` task on top of their binary,
//! gen-rules and system-libs get a `.run` task. Keys disambiguate with the
//! suffix so a rule's tasks live side by side in the artifact namespace.

use std::collections::{BTreeMap, BTreeSet};

use camino::{Utf8Path, Utf8PathBuf};
use mellow_manifest::{Os, Profile, Rule};
use mellow_paths::{PackagePath, PathError};
use miette::Diagnostic;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    build_config::CppConfig,
    engine::{Building, Built, Engine, GraphError, TaskDef},
    normalizer::{NormalizedBuild, NormalizedRule},
    runnable::{CppCompileLink, GenRuleExec, Runnable, SystemLibProbe, TestRun},
};

#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error("profile '{0}' not found")]
    ProfileNotFound(String),
    #[error("failed to find binary '{binary}' for gen_rule '{name}'")]
    GenRuleBinaryNotFound { name: PackagePath, binary: PackagePath },
    #[error("rule '{binary}' referenced by gen_rule '{name}' has no output binary")]
    GenRuleBinaryNoOutput { name: PackagePath, binary: PackagePath },
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("{path}: {source}")]
    Io {
        path: Utf8PathBuf,
        source: std::io::Error,
    },
}

pub struct BuildPlanArgs<'a> {
    pub build: &'a NormalizedBuild,
    pub profile_name: Option<&'a str>,
    pub output_dir_base: &'a Utf8Path,
    pub cpp_config: &'a CppConfig,
    pub update_test_output: bool,
}

/// The sealed task graph plus the directory the chosen profile builds into.
#[derive(Debug)]
pub struct BuildPlan {
    pub engine: Engine<Built>,
    pub root_build_dir: Utf8PathBuf,
    pub profile_name: String,
}

/// Picks the profile, translates every rule, and seals the graph.
pub fn plan_build(args: BuildPlanArgs<'_>) -> Result<BuildPlan, Error> {
    let (profile, profile_name) = select_profile(&args.build.profiles, args.profile_name)?;
    let root_build_dir = args.output_dir_base.join(&profile_name);
    std::fs::create_dir_all(&root_build_dir).map_err(|source| Error::Io {
        path: root_build_dir.clone(),
        source,
    })?;

    let mut builder = TaskBuilder {
        engine: Engine::new(),
        root_build_dir,
        profile,
        cpp_config: args.cpp_config.clone(),
        update_test_output: args.update_test_output,
        built_outputs: BTreeMap::new(),
    };
    for rule in &args.build.rules {
        builder.handle_rule(rule)?;
    }
    Ok(BuildPlan {
        engine: builder.engine.seal()?,
        root_build_dir: builder.root_build_dir,
        profile_name,
    })
}

/// The first profile is the default; `--profile` selects by name. A tree
/// without profiles builds into `default` with no extra flags.
fn select_profile(
    profiles: &[Profile],
    requested: Option<&str>,
) -> Result<(Profile, String), Error> {
    if profiles.is_empty() {
        return Ok((
            Profile {
                name: "default".to_owned(),
                ..Default::default()
            },
            "default".to_owned(),
        ));
    }
    let name = requested.unwrap_or(&profiles[0].name);
    info!("using profile {name}");
    profiles
        .iter()
        .find(|p| p.name == name)
        .cloned()
        .map(|p| (p, name.to_owned()))
        .ok_or_else(|| Error::ProfileNotFound(name.to_owned()))
}

struct TaskBuilder {
    engine: Engine<Building>,
    root_build_dir: Utf8PathBuf,
    profile: Profile,
    cpp_config: CppConfig,
    update_test_output: bool,
    /// Main output per cpp rule, for gen_rule binary resolution.
    built_outputs: BTreeMap<PackagePath, Option<Utf8PathBuf>>,
}

impl TaskBuilder {
    fn handle_rule(&mut self, nrule: &NormalizedRule) -> Result<(), Error> {
        match &nrule.rule {
            Rule::CppLibrary(_) => {
                self.add_compile_task(nrule, true)?;
                Ok(())
            }
            Rule::CppBinary(_) => {
                self.add_compile_task(nrule, false)?;
                Ok(())
            }
            Rule::CppTest(test) => self.handle_test(nrule, &test.output),
            Rule::GenRule(_) => self.handle_gen_rule(nrule),
            Rule::SystemLib(_) => self.handle_system_lib(nrule),
            // Profiles and external packages never reach the normalizer's
            // rule list.
            Rule::Profile(_) | Rule::ExternalPackage(_) => Ok(()),
        }
    }

    /// The shared compile(+link) translation for libraries, binaries, and
    /// test binaries. Returns the task's main output.
    fn add_compile_task(
        &mut self,
        nrule: &NormalizedRule,
        is_library: bool,
    ) -> Result<Option<Utf8PathBuf>, Error> {
        let input_sources = nrule.sources();

        let mut system_lib_configs = BTreeSet::new();
        let mut input_headers = nrule.headers();
        let mut input_objects = BTreeSet::new();
        let mut include_dirs = BTreeSet::new();
        for lib in &nrule.transitive_libs {
            if let Some(config) = lib.system_lib_config() {
                system_lib_configs.insert(config.to_filesystem(&self.root_build_dir));
            }
            input_headers.extend(lib.headers());
            if !is_library {
                if let Some(object) = lib.output_cpp_object() {
                    input_objects.insert(object.to_filesystem(&self.root_build_dir));
                }
            }
            include_dirs.insert(lib.root_package_dir.clone());
        }
        include_dirs.insert(nrule.root_package_dir.clone());

        let main_output = if is_library {
            nrule
                .output_cpp_object()
                .map(|object| object.to_filesystem(&self.root_build_dir))
        } else {
            Some(nrule.name.to_filesystem(&self.root_build_dir))
        };

        let mut cpp_flags: Vec<String> = Vec::new();
        cpp_flags.extend(self.profile.cpp_flags.iter().cloned());
        cpp_flags.extend(nrule.cpp_flags().iter().cloned());
        cpp_flags.extend(self.cpp_config.cpp_flags.iter().cloned());
        for dir in &include_dirs {
            cpp_flags.push("-iquote".to_owned());
            cpp_flags.push(dir.to_string());
        }
        for lib in &nrule.transitive_libs {
            cpp_flags.extend(lib.cpp_flags().iter().cloned());
        }
        if is_library {
            cpp_flags.push("-c".to_owned());
        } else {
            cpp_flags.extend(self.profile.ld_flags.iter().cloned());
            cpp_flags.extend(self.cpp_config.ld_flags.iter().cloned());
            cpp_flags.extend(nrule.ld_flags().iter().cloned());
        }

        let compiler = self
            .profile
            .cpp_compiler
            .clone()
            .unwrap_or_else(|| self.cpp_config.compiler.clone());

        let mut inputs = input_sources.clone();
        inputs.extend(input_headers);
        inputs.extend(input_objects.iter().cloned());
        inputs.extend(system_lib_configs.iter().cloned());
        let outputs: BTreeSet<Utf8PathBuf> = main_output.clone().into_iter().collect();

        let runnable = CppCompileLink {
            name: nrule.name.clone(),
            main_output: main_output.clone(),
            compiler,
            cpp_flags,
            is_library,
            input_sources,
            input_objects,
            system_lib_configs,
        };
        let non_file_inputs_key = runnable.non_file_inputs_key();
        debug!("compile task for {}", nrule.name);
        self.engine.create_task(TaskDef {
            key: nrule.name.append_no_sep(".compile")?,
            root_build_dir: self.root_build_dir.clone(),
            runnable: Runnable::CppCompileLink(runnable),
            inputs,
            outputs,
            non_file_inputs_key,
        })?;

        self.built_outputs
            .insert(nrule.name.clone(), main_output.clone());
        Ok(main_output)
    }

    fn handle_test(&mut self, nrule: &NormalizedRule, output: &str) -> Result<(), Error> {
        let os_filter = nrule.os_filter();
        if !os_filter.is_empty() {
            let current = Os::current();
            if !current.is_some_and(|os| os_filter.contains(&os)) {
                debug!("skipping {}: os filter {os_filter:?}", nrule.name);
                return Ok(());
            }
        }

        let binary_file = self
            .add_compile_task(nrule, false)?
            .expect("a test binary always has an output");
        let expected = nrule.package_dir.join(output);

        let runnable = TestRun {
            name: nrule.name.clone(),
            root_build_dir: self.root_build_dir.clone(),
            test_binary: binary_file.clone(),
            expected: expected.clone(),
            update_test_output: self.update_test_output,
        };
        self.engine.create_task(TaskDef {
            key: nrule.name.append_no_sep(".run")?,
            root_build_dir: self.root_build_dir.clone(),
            runnable: Runnable::TestRun(runnable),
            inputs: [binary_file, expected].into_iter().collect(),
            outputs: BTreeSet::new(),
            non_file_inputs_key: String::new(),
        })?;
        Ok(())
    }

    fn handle_gen_rule(&mut self, nrule: &NormalizedRule) -> Result<(), Error> {
        let Rule::GenRule(rule) = &nrule.rule else {
            unreachable!("caller matched the kind");
        };
        let binary_rule_name = nrule.package_name.join(&rule.binary)?;
        let binary_path = match self.built_outputs.get(&binary_rule_name) {
            Some(Some(path)) => path.clone(),
            Some(None) => {
                return Err(Error::GenRuleBinaryNoOutput {
                    name: nrule.name.clone(),
                    binary: binary_rule_name,
                })
            }
            None => {
                return Err(Error::GenRuleBinaryNotFound {
                    name: nrule.name.clone(),
                    binary: binary_rule_name,
                })
            }
        };

        let mut outputs = Vec::with_capacity(rule.outputs.len());
        let mut task_outputs = BTreeSet::new();
        for output in &rule.outputs {
            let run_dir_path = nrule
                .package_name
                .join(output)?
                .to_filesystem(&self.root_build_dir);
            let src_path = nrule.package_dir.join(output);
            task_outputs.insert(src_path.clone());
            outputs.push((run_dir_path, src_path));
        }

        let data = nrule.data();
        let mut inputs: BTreeSet<Utf8PathBuf> = data.clone();
        inputs.insert(binary_path.clone());

        let runnable = GenRuleExec {
            binary: binary_path,
            flags: rule.flags.clone(),
            root_build_dir: self.root_build_dir.clone(),
            package_name: nrule.package_name.clone(),
            data,
            outputs,
        };
        self.engine.create_task(TaskDef {
            key: nrule.name.append_no_sep(".run")?,
            root_build_dir: self.root_build_dir.clone(),
            runnable: Runnable::GenRuleExec(runnable),
            inputs,
            outputs: task_outputs,
            non_file_inputs_key: String::new(),
        })?;
        Ok(())
    }

    fn handle_system_lib(&mut self, nrule: &NormalizedRule) -> Result<(), Error> {
        let Rule::SystemLib(rule) = &nrule.rule else {
            unreachable!("caller matched the kind");
        };
        let config = nrule
            .system_lib_config()
            .expect("system_lib rules always have a config path");
        let output_path = config.to_filesystem(&self.root_build_dir);

        let runnable = SystemLibProbe {
            command: rule.command.clone(),
            flags: rule.flags.clone(),
            output_path: output_path.clone(),
        };
        self.engine.create_task(TaskDef {
            key: nrule.name.append_no_sep(".run")?,
            root_build_dir: self.root_build_dir.clone(),
            runnable: Runnable::SystemLibProbe(runnable),
            inputs: BTreeSet::new(),
            outputs: [output_path].into_iter().collect(),
            non_file_inputs_key: String::new(),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use mellow_manifest::Profile;

    use super::*;

    #[test]
    fn first_profile_is_the_default() {
        let profiles = vec![
            Profile {
                name: "dev".into(),
                ..Default::default()
            },
            Profile {
                name: "release".into(),
                ..Default::default()
            },
        ];
        let (profile, name) = select_profile(&profiles, None).unwrap();
        assert_eq!(profile.name, "dev");
        assert_eq!(name, "dev");

        let (profile, _) = select_profile(&profiles, Some("release")).unwrap();
        assert_eq!(profile.name, "release");

        assert!(matches!(
            select_profile(&profiles, Some("nope")),
            Err(Error::ProfileNotFound(_))
        ));
    }

    #[test]
    fn no_profiles_builds_into_default() {
        let (profile, name) = select_profile(&[], None).unwrap();
        assert_eq!(name, "default");
        assert!(profile.cpp_flags.is_empty());
    }
}
