use std::process::ExitCode;

fn main() -> ExitCode {
    regdesk_cli::run()
}
