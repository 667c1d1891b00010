// src/main.rs

use fleetexec::{cli, logging, run};

#[tokio::main]
async fn main() {
    match run_main().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("fleetexec error: {err:?}");
            std::process::exit(1);
        }
    }
}

async fn run_main() -> anyhow::Result<i32> {
    let args = cli::parse();
    let log_file = args.effective_log_file();
    logging::init_logging(args.log_level, log_file.as_deref())?;
    run(args).await
}
