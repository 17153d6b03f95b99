use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use handwriting_analyzer::{
    config::{AnalyzeArgs, Cli, Command, ServeArgs},
    server,
};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Analyze(args) => analyze(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let max_upload_bytes = args.max_upload_bytes();
    let ServeArgs { addr, ocr, .. } = args;
    let analyzer = tokio::task::spawn_blocking(move || ocr.build_analyzer())
        .await
        .context("failed to initialise the analyzer")?;
    server::run_server(analyzer, &addr, max_upload_bytes).await
}

async fn analyze(args: AnalyzeArgs) -> Result<()> {
    let bytes = std::fs::read(&args.path)
        .with_context(|| format!("failed to read {}", args.path.display()))?;
    let file_name = args
        .path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let start = Instant::now();
    let report = tokio::task::spawn_blocking(move || {
        args.ocr.build_analyzer().analyze_upload(&file_name, &bytes)
    })
    .await??;
    log::debug!("analysis took {:?}", start.elapsed());

    let json = if args.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{json}");
    Ok(())
}
