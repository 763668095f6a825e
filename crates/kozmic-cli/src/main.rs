//! Operational command-line tools.

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use kozmic_config::DockerConfig;
use kozmic_docker::{DockerDriver, sweep_cache};

#[derive(Parser)]
#[command(name = "kozmic", about = "Kozmic CI operational tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Remove all but the most recently created cached install images,
    /// per project.
    SweepCache {
        /// How many cached images to keep per project.
        #[arg(long, env = "CACHED_IMAGES_LIMIT", default_value_t = 3)]
        limit: usize,

        #[arg(long, env = "DOCKER_URL", default_value = "unix:///var/run/docker.sock")]
        docker_url: String,

        #[arg(long, env = "DOCKER_API_VERSION", default_value = "1.43")]
        docker_api_version: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::SweepCache {
            limit,
            docker_url,
            docker_api_version,
        } => {
            let driver = DockerDriver::connect(&DockerConfig {
                url: docker_url,
                api_version: docker_api_version,
            })?;
            let report = sweep_cache(&driver, limit).await?;
            info!(
                examined = report.examined,
                removed = report.removed.len(),
                "cache sweep finished",
            );
            for image in report.removed {
                println!("removed {image}");
            }
        }
    }
    Ok(())
}
