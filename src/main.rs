//! alter - plugin-driven build and preprocessing

use std::process::ExitCode;

fn main() -> ExitCode {
    if let Err(e) = alter_cli::cli::run() {
        eprintln!("Error: {:#}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
