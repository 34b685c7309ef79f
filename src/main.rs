//! trainbot-rag CLI 진입점

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    // 로깅 초기화
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // CLI 실행
    let cli = trainbot_rag::cli::Cli::parse();

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(trainbot_rag::cli::run(cli));

    if let Err(e) = result {
        trainbot_rag::cli::report_error(&e);
        std::process::exit(trainbot_rag::cli::exit_code(&e));
    }
    Ok(())
}
