use std::io::Read;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use clap::Subcommand;
use serde_json::Value;

use planner::Planner;
use unitrun::UnitConfig;

#[derive(Parser)]
#[command(name = "planner", version, about = "Portfolio planner running on an isolated optimizer unit")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Override the ping timeout (ms)
    #[arg(long, global = true)]
    ping_timeout_ms: Option<u64>,

    /// Override the init timeout (ms)
    #[arg(long, global = true)]
    init_timeout_ms: Option<u64>,

    /// Override the call timeout (ms, 0 disables it)
    #[arg(long, global = true)]
    call_timeout_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Suggest how much to invest so no holding is overweight
    Analyze {
        /// JSON file with the assets map, or - for stdin
        input: PathBuf,
    },
    /// Split a budget across the assets
    Solve {
        /// JSON file with the solve request, or - for stdin
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    planner::logging::init();
    let cli = Cli::parse();

    let mut config = UnitConfig::from_env()?;
    if let Some(ms) = cli.ping_timeout_ms {
        config = config.ping_timeout(Duration::from_millis(ms));
    }
    if let Some(ms) = cli.init_timeout_ms {
        config = config.init_timeout(Duration::from_millis(ms));
    }
    if let Some(ms) = cli.call_timeout_ms {
        config = config.call_timeout((ms > 0).then(|| Duration::from_millis(ms)));
    }

    let planner = Planner::threaded(config);
    let output = match &cli.command {
        Command::Analyze { input } => serde_json::to_value(planner.analyze_value(&read_input(input)?).await?)?,
        Command::Solve { input } => serde_json::to_value(planner.solve_value(&read_input(input)?).await?)?,
    };
    planner.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn read_input(path: &Path) -> anyhow::Result<Value> {
    let text = if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text).context("reading stdin")?;
        text
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?
    };
    serde_json::from_str(&text).context("input is not JSON")
}
