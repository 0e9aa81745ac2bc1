mod archive;
mod cli;
mod decompose;
mod engine;
mod error;
mod model;
mod parse;
mod patch;
mod progress;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    cli::run(args).await
}
