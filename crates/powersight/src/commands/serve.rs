use crate::web;
use anyhow::Result;
use clap::Args;

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// 待ち受けアドレス。省略時は SERVER_BIND
    #[arg(long)]
    pub bind: Option<String>,
}

pub async fn run(args: ServeArgs) -> Result<()> {
    web::run(args.bind).await
}
