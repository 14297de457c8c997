//! Configuration loaded from the environment at startup

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::fmt;
use std::str::FromStr;

/// Trading environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Synthetic fills, no venue calls
    DryRun,
    /// Venue testnet endpoints
    Testnet,
    /// Production venue
    Live,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DRY_RUN" => Ok(Environment::DryRun),
            "TESTNET" => Ok(Environment::Testnet),
            "LIVE" => Ok(Environment::Live),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per event, for log aggregation
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// An opaque secret; never printed or logged
#[derive(Clone, Default)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Market data ingest configuration
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Instruments per WebSocket connection before sharding
    pub instruments_per_connection: usize,
    /// Ping cadence
    pub ping_interval_secs: u64,
    /// Close the connection when no pong arrives within this window
    pub pong_timeout_secs: u64,
    /// Base reconnect delay
    pub reconnect_base_secs: u64,
    /// Reconnect delay cap
    pub reconnect_cap_secs: u64,
    /// Consecutive reconnect attempts before escalating
    pub max_reconnect_attempts: u32,
    /// Seconds without any event before an instrument is considered lost
    pub data_loss_timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            instruments_per_connection: 100,
            ping_interval_secs: 30,
            pong_timeout_secs: 20,
            reconnect_base_secs: 5,
            reconnect_cap_secs: 60,
            max_reconnect_attempts: 10,
            data_loss_timeout_secs: 30,
        }
    }
}

/// Risk limits and sizing parameters
#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub max_positions: usize,
    /// Maximum notional per position
    pub max_position_size: Decimal,
    pub max_drawdown_pct: Decimal,
    pub daily_loss_limit_pct: Decimal,
    /// Fraction of equity risked per trade
    pub risk_per_trade_pct: Decimal,
    pub stop_atr_multiplier: Decimal,
    pub min_position_notional: Decimal,
    pub max_position_notional: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_positions: 5,
            max_position_size: dec!(1000),
            max_drawdown_pct: dec!(15),
            daily_loss_limit_pct: dec!(3),
            risk_per_trade_pct: dec!(0.01),
            stop_atr_multiplier: dec!(2.0),
            min_position_notional: dec!(5),
            max_position_notional: dec!(1000),
        }
    }
}

/// Root configuration, assembled from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    /// Instrument universe; empty means "discover all perpetual USDT pairs"
    pub instruments: Vec<String>,
    pub interval: String,
    pub activation_threshold: f64,
    pub max_slippage_pct: Decimal,
    pub leverage: u32,
    pub starting_equity: Decimal,
    pub state_ttl_secs: u64,
    pub log_level: String,
    pub log_format: LogFormat,
    pub feed: FeedConfig,
    pub risk: RiskConfig,
    pub api_key: Secret,
    pub api_secret: Secret,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::DryRun,
            instruments: vec!["BTCUSDT".to_string()],
            interval: "15m".to_string(),
            activation_threshold: 0.7,
            max_slippage_pct: dec!(0.1),
            leverage: 1,
            starting_equity: dec!(10000),
            state_ttl_secs: 86_400,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            feed: FeedConfig::default(),
            risk: RiskConfig::default(),
            api_key: Secret::default(),
            api_secret: Secret::default(),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_env<T: FromStr>(name: &str) -> anyhow::Result<Option<T>>
where
    T::Err: fmt::Display,
{
    match env_var(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid {name}={raw}: {e}")),
    }
}

impl Config {
    /// Load and validate configuration from the process environment.
    ///
    /// Unset variables fall back to defaults; present-but-invalid values are
    /// a startup error rather than a silent fallback.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Config::default();

        if let Some(env) = parse_env::<Environment>("ENVIRONMENT")? {
            config.environment = env;
        }
        if let Some(raw) = env_var("INSTRUMENTS") {
            if raw.trim().to_ascii_uppercase() == "ALL" {
                config.instruments.clear();
            } else {
                config.instruments = raw
                    .split(',')
                    .map(|s| s.trim().to_ascii_uppercase())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
        }
        if let Some(interval) = env_var("KLINE_INTERVAL") {
            config.interval = interval;
        }
        if let Some(v) = parse_env::<f64>("ACTIVATION_THRESHOLD")? {
            config.activation_threshold = v;
        }
        if let Some(v) = parse_env::<Decimal>("MAX_SLIPPAGE_PCT")? {
            config.max_slippage_pct = v;
        }
        if let Some(v) = parse_env::<u32>("LEVERAGE")? {
            config.leverage = v;
        }
        if let Some(v) = parse_env::<Decimal>("STARTING_EQUITY")? {
            config.starting_equity = v;
        }
        if let Some(v) = parse_env::<usize>("MAX_POSITIONS")? {
            config.risk.max_positions = v;
        }
        if let Some(v) = parse_env::<Decimal>("MAX_POSITION_SIZE")? {
            config.risk.max_position_size = v;
        }
        if let Some(v) = parse_env::<Decimal>("MAX_DRAWDOWN_PCT")? {
            config.risk.max_drawdown_pct = v;
        }
        if let Some(v) = parse_env::<Decimal>("DAILY_LOSS_LIMIT_PCT")? {
            config.risk.daily_loss_limit_pct = v;
        }
        if let Some(v) = parse_env::<Decimal>("RISK_PER_TRADE_PCT")? {
            config.risk.risk_per_trade_pct = v;
        }
        if let Some(v) = parse_env::<Decimal>("STOP_ATR_MULTIPLIER")? {
            config.risk.stop_atr_multiplier = v;
        }
        if let Some(level) = env_var("LOG_LEVEL") {
            config.log_level = level.to_ascii_lowercase();
        }
        if let Some(v) = parse_env::<LogFormat>("LOG_FORMAT")? {
            config.log_format = v;
        }
        if let Some(key) = env_var("VENUE_API_KEY") {
            config.api_key = Secret::new(key);
        }
        if let Some(secret) = env_var("VENUE_API_SECRET") {
            config.api_secret = Secret::new(secret);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints once at startup
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.activation_threshold) {
            anyhow::bail!(
                "ACTIVATION_THRESHOLD must be in [0, 1], got {}",
                self.activation_threshold
            );
        }
        if self.risk.risk_per_trade_pct <= Decimal::ZERO || self.risk.risk_per_trade_pct > Decimal::ONE {
            anyhow::bail!("RISK_PER_TRADE_PCT must be in (0, 1]");
        }
        if self.risk.stop_atr_multiplier <= Decimal::ZERO {
            anyhow::bail!("STOP_ATR_MULTIPLIER must be positive");
        }
        if self.risk.min_position_notional >= self.risk.max_position_notional {
            anyhow::bail!("min position notional must be below the maximum");
        }
        if self.starting_equity <= Decimal::ZERO {
            anyhow::bail!("STARTING_EQUITY must be positive");
        }
        if self.environment != Environment::DryRun
            && (self.api_key.is_empty() || self.api_secret.is_empty())
        {
            anyhow::bail!("VENUE_API_KEY / VENUE_API_SECRET required outside DRY_RUN");
        }
        Ok(())
    }

    pub fn is_dry_run(&self) -> bool {
        self.environment == Environment::DryRun
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.is_dry_run());
        assert_eq!(config.risk.max_positions, 5);
        assert_eq!(config.activation_threshold, 0.7);
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("DRY_RUN".parse::<Environment>().unwrap(), Environment::DryRun);
        assert_eq!("testnet".parse::<Environment>().unwrap(), Environment::Testnet);
        assert_eq!("LIVE".parse::<Environment>().unwrap(), Environment::Live);
        assert!("PAPER".parse::<Environment>().is_err());
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{:?}", secret), "Secret(***)");
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("yaml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut config = Config::default();
        config.activation_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_credentials_outside_dry_run() {
        let mut config = Config::default();
        config.environment = Environment::Testnet;
        assert!(config.validate().is_err());

        config.api_key = Secret::new("key");
        config.api_secret = Secret::new("secret");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_feed_defaults_match_contract() {
        let feed = FeedConfig::default();
        assert_eq!(feed.instruments_per_connection, 100);
        assert_eq!(feed.ping_interval_secs, 30);
        assert_eq!(feed.pong_timeout_secs, 20);
        assert_eq!(feed.reconnect_base_secs, 5);
        assert_eq!(feed.reconnect_cap_secs, 60);
        assert_eq!(feed.max_reconnect_attempts, 10);
        assert_eq!(feed.data_loss_timeout_secs, 30);
    }
}
