use clap::Parser;
use logging::*;
use powersight::Cli;
use std::process;

#[tokio::main]
async fn main() {
    let log = DEFAULT.new(o!("function" => "main"));
    let cli = Cli::parse();

    if let Err(err) = powersight::run(cli).await {
        error!(log, "command failed"; "error" => format!("{:#}", err));
        eprintln!("Error: {:#}", err);
        process::exit(1);
    }
}
