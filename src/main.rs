use clap::Parser;
use perpbot::cli::{Cli, Commands};
use perpbot::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    perpbot::telemetry::init_logging(&config)?;

    match cli.command {
        Commands::Run(args) => {
            args.execute(config).await?;
        }
        Commands::Status => {
            println!("perpbot status");
            println!("  Environment: {:?}", config.environment);
            println!("  Instruments: {}", config.instruments.join(", "));
        }
        Commands::Config => {
            println!("Current configuration:");
            println!("  Environment: {:?}", config.environment);
            println!("  Interval: {}", config.interval);
            println!("  Max positions: {}", config.risk.max_positions);
            println!("  Activation threshold: {}", config.activation_threshold);
            println!("  Stop ATR multiplier: {}", config.risk.stop_atr_multiplier);
            println!("  Max drawdown: {}%", config.risk.max_drawdown_pct);
            println!("  Daily loss limit: {}%", config.risk.daily_loss_limit_pct);
        }
    }

    Ok(())
}
