// src/main.rs

use simplequeue::{cli, log_file_for, logging, run};

#[tokio::main]
async fn main() {
    if let Err(err) = run_main().await {
        eprintln!("simplequeue error: {err:?}");
        std::process::exit(1);
    }
}

async fn run_main() -> anyhow::Result<()> {
    let args = cli::parse();
    let log_file = log_file_for(&args)?;
    logging::init_logging(args.log_level, log_file.as_deref())?;
    run(args).await
}
