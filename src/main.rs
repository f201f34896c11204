use clap::{Parser, Subcommand};
use loadgen::config::ConfigLoader;
use loadgen::credentials::abbreviate;
use loadgen::output::console;
use loadgen::runner::Runner;
use loadgen::Summary;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "loadgen")]
#[command(version = "0.1.0")]
#[command(about = "Evenly paced load generation against key-managed cloud APIs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every scenario of a config file
    Run {
        /// Path to the configuration file (JSON/YAML/TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Show progress bars (stderr)
        #[arg(short, long, default_value_t = false)]
        progress: bool,
    },
    /// Validate a configuration file
    Check {
        /// Path to the configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Fetch one key per pool from the key manager
    Probe {
        /// Path to the configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        unsafe { std::env::set_var("RUST_LOG", "info"); }
    }
    let cli = Cli::parse();
    let logger = env_logger::Builder::from_default_env().build();
    let multi = Arc::new(indicatif::MultiProgress::new());

    match cli.command {
        Commands::Run { config, progress } => {
            if progress {
                indicatif_log_bridge::LogWrapper::new((*multi).clone(), logger).try_init()?;
            } else {
                let level = logger.filter();
                log::set_boxed_logger(Box::new(logger))?;
                log::set_max_level(level);
            }

            log::info!("Loading config from {:?}", config);
            let config_data = ConfigLoader::load(&config)?;
            log::info!(
                "Loaded plan '{}' with {} scenario(s)",
                config_data.name,
                config_data.scenarios.len()
            );

            let mut runner = Runner::new(config_data)?;
            if progress {
                runner = runner.with_progress(multi.clone());
            }

            let (stop_tx, stop_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::warn!("Received Ctrl-C, finishing in-flight requests...");
                    let _ = stop_tx.send(true);
                }
            });

            let outcomes = runner.run(stop_rx).await?;

            println!("\n✅ Load test completed:");
            for outcome in &outcomes {
                match &outcome.summary {
                    Summary::NoData => println!("   {}: no data recorded", outcome.name),
                    Summary::Completed(summary) => {
                        for line in console::render(&outcome.metadata, summary) {
                            println!("{}", line);
                        }
                        if outcome.dispatch.skipped > 0 || outcome.dispatch.abandoned > 0 {
                            println!(
                                "   Skipped slots: {} | Abandoned workers: {}",
                                outcome.dispatch.skipped, outcome.dispatch.abandoned
                            );
                        }
                        if let Some(path) = &outcome.report_path {
                            println!("   Report: {}", path.display());
                        }
                    }
                }
            }
        }
        Commands::Check { config } => {
            log::set_boxed_logger(Box::new(logger))?;
            log::set_max_level(log::LevelFilter::Info);
            match ConfigLoader::load(&config) {
                Ok(cfg) => {
                    println!("✅ Config is valid:");
                    println!("   Name: {}", cfg.name);
                    println!("   Key manager: {} ({})", cfg.key_manager.base_url, cfg.key_manager.region);
                    println!("   Pools: {:?}", cfg.pools());
                    for scenario in &cfg.scenarios {
                        let run = cfg.run_config(scenario);
                        println!(
                            "   - {} [{}]: {} rpm for {}s (~{} requests)",
                            scenario.name,
                            scenario.target.kind(),
                            run.target_rate_per_minute,
                            run.duration.as_secs(),
                            run.expected_requests()
                        );
                    }
                }
                Err(e) => {
                    eprintln!("❌ Config error: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Probe { config } => {
            log::set_boxed_logger(Box::new(logger))?;
            log::set_max_level(log::LevelFilter::Info);
            let runner = Runner::new(ConfigLoader::load(&config)?)?;
            let mut failures = 0;
            for (pool, result) in runner.probe().await {
                match result {
                    Ok(Some(data)) => println!(
                        "✅ {}: {} ({})",
                        pool,
                        abbreviate(&data.key),
                        data.region.as_deref().unwrap_or(&runner.config().key_manager.region)
                    ),
                    Ok(None) => {
                        failures += 1;
                        println!("❌ {}: no key available", pool);
                    }
                    Err(e) => {
                        failures += 1;
                        println!("❌ {}: {}", pool, e);
                    }
                }
            }
            if failures > 0 {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
