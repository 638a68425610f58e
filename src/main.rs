use std::error::Error;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hrp::cli::{Cli, Commands};
use hrp::{load_test_case, HrpRunner};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hrp=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { paths, fail_fast, log_requests, insecure } => {
            let mut runner = HrpRunner::new()?;
            runner.set_fail_fast(fail_fast).set_request_log(log_requests);
            if insecure {
                runner.set_verify(false)?;
            }

            let mut all_passed = true;
            for path in &paths {
                let test_case = match load_test_case(path) {
                    Ok(test_case) => test_case,
                    Err(err) => {
                        eprintln!("[LOAD] {} -> {}", path.display(), err);
                        std::process::exit(2);
                    }
                };
                let summary = runner.run_test_case(&test_case).await?;
                let status = if summary.success { "PASS" } else { "FAIL" };
                println!(
                    "[{}] {} ({} steps, {} failed, {:.0?})",
                    status,
                    summary.name,
                    summary.stat.total,
                    summary.stat.failures,
                    summary.time.duration
                );
                if !summary.success {
                    all_passed = false;
                }
            }
            if !all_passed {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}
