use std::process::ExitCode;

fn main() -> ExitCode {
    dexlink::run_cli()
}
