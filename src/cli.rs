use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "hrp")]
#[command(version, about = "Declarative HTTP API test runner", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load testcase files and run them
    Run {
        /// Testcase files (JSON or YAML)
        #[arg(value_name = "FILE", required = true)]
        paths: Vec<PathBuf>,

        #[arg(long, help = "Abort a testcase after its first failing step")]
        fail_fast: bool,

        #[arg(long, help = "Dump requests and responses at debug level")]
        log_requests: bool,

        #[arg(long, help = "Skip TLS certificate verification")]
        insecure: bool,
    },
}
