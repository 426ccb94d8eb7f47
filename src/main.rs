use clap::Parser;
use colored::*;
use env_logger::{Builder, Env, Target};
use log::{info, warn};
use pansou::cli::{Cli, Commands};
use pansou::dto::HealthRequest;
use pansou::model::{ResultType, SearchRequest, SourceType};
use pansou::{Collaborators, PansouApp, PansouError, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::time::Instant;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("{} {e}", "Error:".red());
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    setup_logging(&cli)?;

    let start_time = Instant::now();
    info!("Application started with command: {:?}", cli.command);

    let app = PansouApp::startup_from_path(cli.config.as_deref(), Collaborators::default())?;

    let outcome = tokio::select! {
        outcome = run_command(&app, &cli.command) => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, shutting down");
            Err(PansouError::Other("interrupted".to_string()))
        }
    };

    let shutdown = app.shutdown().await;
    if cli.print_metrics {
        eprintln!("{}", app.metrics().gather());
    }
    info!("Finished in {:?}", start_time.elapsed());

    outcome?;
    shutdown
}

async fn run_command(app: &PansouApp, command: &Commands) -> Result<()> {
    match command {
        Commands::Search {
            keyword,
            channels,
            plugins,
            src,
            res,
            cloud_types,
            refresh,
            concurrency,
            ext,
            pretty,
        } => {
            let ext = match ext {
                Some(raw) => Some(serde_json::from_str::<Map<String, Value>>(raw)?),
                None => None,
            };

            let req = SearchRequest {
                keyword: keyword.clone(),
                channels: channels.clone(),
                concurrency: *concurrency,
                force_refresh: *refresh,
                result_type: res.as_deref().map(ResultType::from),
                source_type: src.as_ref().map(|s| SourceType::from(s.to_string())),
                plugins: plugins.clone(),
                cloud_types: cloud_types.clone(),
                ext,
            };

            let response = app.search(req).await?;
            if response.total == 0 {
                eprintln!("{}", "No results found".yellow());
            } else {
                eprintln!("{} {} {}", "Found".green(), response.total, "results".green());
            }
            print_json(&response, *pretty)
        }
        Commands::Health { pretty } => print_json(&app.health(HealthRequest::default()), *pretty),
    }
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{json}");
    Ok(())
}

fn setup_logging(cli: &Cli) -> Result<()> {
    let default_level = if cli.verbose { "debug" } else { "info" };
    let mut builder = Builder::from_env(Env::default().default_filter_or(default_level));

    builder.format(|buf, record| {
        use std::io::Write;
        writeln!(
            buf,
            "{} [{}] [{}] {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.level(),
            record.module_path().unwrap_or("unknown"),
            record.args()
        )
    });

    if let Some(log_path) = &cli.log {
        if let Some(parent_dir) = log_path.parent() {
            if !parent_dir.as_os_str().is_empty() && !parent_dir.exists() {
                fs::create_dir_all(parent_dir)?;
            }
        }
        let log_file = fs::File::create(log_path)?;
        builder.target(Target::Pipe(Box::new(log_file)));
    } else {
        builder.target(Target::Stderr);
    }

    builder
        .try_init()
        .map_err(|e| PansouError::Other(e.to_string()))?;
    Ok(())
}
