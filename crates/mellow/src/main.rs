use std::process::ExitCode;

use clap::Parser;
use mellow_lib::cli::Args;

fn main() -> ExitCode {
    let args = Args::parse();
    mellow_lib::tracing_setup::init(args.verbose);
    match mellow_lib::cli::run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{:?}", miette::Report::new(err));
            ExitCode::FAILURE
        }
    }
}
