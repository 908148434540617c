use super::read_text;
use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tokio::io::{self, AsyncReadExt};

#[derive(Debug, Args)]
pub struct NormalizeArgs {
    /// 変換する関数定義のファイル。省略時は標準入力
    pub file: Option<PathBuf>,

    /// ライブラリの別名。省略時は SCORING_LIBRARY_ALIAS
    #[arg(long)]
    pub alias: Option<String>,
}

async fn read_source(file: Option<&PathBuf>) -> Result<String> {
    match file {
        Some(path) => read_text(path).await,
        None => {
            let mut code = String::new();
            io::stdin()
                .read_to_string(&mut code)
                .await
                .context("Failed to read stdin")?;
            Ok(code)
        }
    }
}

pub fn execute(code: &str, alias: Option<&str>) -> Result<String> {
    let normalized = match alias {
        Some(alias) => scoring::normalize::normalize_with_alias(code, alias)?,
        None => scoring::normalize(code)?,
    };
    Ok(normalized)
}

pub async fn run(args: NormalizeArgs) -> Result<()> {
    let code = read_source(args.file.as_ref()).await?;
    print!("{}", execute(&code, args.alias.as_deref())?);
    Ok(())
}
