use std::process::ExitCode;

fn main() -> ExitCode {
    bindconf_cli::run()
}
