//! Scholar agent server binary.
//! Run with: cargo run --bin scholar-server

use std::process::ExitCode;

use scholar_agent::start_scholar_agent;

fn main() -> ExitCode {
    start_scholar_agent::run()
}
