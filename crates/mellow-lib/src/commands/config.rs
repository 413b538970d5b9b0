//! The `config` command: record the machine's compiler and flags.

use crate::{build_config::BuildConfig, cli::ConfigArgs, Error};

pub fn run(args: ConfigArgs) -> Result<(), Error> {
    let config = BuildConfig::from_environment(args.cpp_compiler.as_deref());
    println!("CPP compiler: {}", config.cpp.compiler);
    if !config.cpp.cpp_flags.is_empty() {
        println!("CPP flags: {}", config.cpp.cpp_flags.join(" "));
    }
    if !config.cpp.ld_flags.is_empty() {
        println!("LD flags: {}", config.cpp.ld_flags.join(" "));
    }
    config.write(&args.output)?;
    println!("Config written to {}", args.output);
    Ok(())
}
