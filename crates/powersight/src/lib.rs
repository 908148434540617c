pub mod commands;
pub mod ingest;
pub mod web;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[clap(name = "powersight")]
#[clap(about = "Region-specific forecast accuracy scoring for power stations")]
#[clap(version)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 日次精度を計算する
    Calculate(commands::calculate::CalculateArgs),
    /// 1 日分の先頭数行で行式を試す
    Preview(commands::preview::PreviewArgs),
    /// 貼り付けたコードを行式の形に直す
    Normalize(commands::normalize::NormalizeArgs),
    /// 地域ごとの既定値を表示する
    Regions,
    /// HTTP サーバーを起動する
    Serve(commands::serve::ServeArgs),
}

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Calculate(args) => commands::calculate::run(args).await,
        Commands::Preview(args) => commands::preview::run(args).await,
        Commands::Normalize(args) => commands::normalize::run(args).await,
        Commands::Regions => commands::regions::run().await,
        Commands::Serve(args) => commands::serve::run(args).await,
    }
}
