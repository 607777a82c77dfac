use std::io::IsTerminal;
use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;

use actoolkit::cli::Cli;
use actoolkit::{ToolkitError, choices, commands, logging};

#[tokio::main]
async fn main() -> ExitCode {
    let argv: Vec<String> = std::env::args().collect();

    for args in choices::fan_out(argv) {
        let cli = match Cli::try_parse_from(&args) {
            Ok(cli) => cli,
            Err(e) => e.exit(),
        };
        logging::init(cli.verbose, cli.log_json);

        if let Err(e) = run(&cli).await {
            report(&e);
            let code = e
                .downcast_ref::<ToolkitError>()
                .map(ToolkitError::exit_code)
                .unwrap_or(1);
            return ExitCode::from(u8::try_from(code).unwrap_or(1));
        }
    }
    ExitCode::SUCCESS
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    commands::run(cli).await?;
    Ok(())
}

fn report(err: &anyhow::Error) {
    let line = format!("Error: {err:#}");
    if std::io::stderr().is_terminal() {
        eprintln!("{}", line.red());
    } else {
        eprintln!("{line}");
    }
}
