use relink_cli::{build_cli, logging, run};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let matches = build_cli().get_matches();
    logging::init(matches.get_flag("log-json"));

    match run(&matches).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
