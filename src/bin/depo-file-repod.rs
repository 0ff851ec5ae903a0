use clap::Parser;
use depo_file_repo::config::Config;
use depo_file_repo::{init_tracing, run_service, worker_count};

#[derive(Parser, Debug)]
#[command(name = "depo-file-repod")]
#[command(about = "Deposition file service daemon", long_about = None)]
#[command(version)]
struct Args {
    /// Path to TOML config file
    #[arg(short, long)]
    config: Option<String>,
}

fn main() {
    let args = Args::parse();
    init_tracing();

    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_count(&config))
        .enable_all()
        .build()
        .expect("failed to build runtime");

    if let Err(e) = runtime.block_on(run_service(config)) {
        tracing::error!("server error: {}", e);
        std::process::exit(1);
    }
}
