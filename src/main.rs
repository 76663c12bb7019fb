use std::process::ExitCode;

fn main() -> ExitCode {
    aia360_bridge_lib::run()
}
