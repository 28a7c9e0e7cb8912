use std::process::ExitCode;

fn main() -> ExitCode {
    pulseboard_cli::run()
}
