use crate::config::toml_config::TomlConfig;
use crate::domain::model::{ClientId, RecalcMode, ServiceId, UniteId};
use crate::utils::error::{PricingError, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Clone, Parser)]
#[command(name = "facture-pricing")]
#[command(about = "Price invoice lines against the practice billing backend")]
pub struct CliConfig {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<String>,

    #[arg(long, help = "Override api.base_url")]
    pub api_base_url: Option<String>,

    #[arg(long, help = "Bearer token for the backend")]
    pub api_token: Option<String>,

    #[arg(long)]
    pub cache_ttl_ms: Option<u64>,

    #[arg(long)]
    pub throttle_ms: Option<u64>,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Emit logs as JSON")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Look up the price of one (client, service, unit)
    Price {
        #[arg(long)]
        client: Option<ClientId>,
        #[arg(long)]
        service: Option<ServiceId>,
        #[arg(long)]
        unite: Option<UniteId>,
        /// Invoice date (YYYY-MM-DD), today by default
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        force: bool,
    },
    /// Recalculate the lines of an invoice stored as JSON
    Recalc {
        /// JSON file holding an array of invoice lines
        #[arg(long)]
        lines: String,
        #[arg(long)]
        client: ClientId,
        #[arg(long, value_enum, default_value = "missing")]
        mode: ModeArg,
        /// Line index, required with `--mode single`
        #[arg(long)]
        index: Option<usize>,
        /// Indices of lines priced by hand
        #[arg(long, value_delimiter = ',')]
        manual: Vec<usize>,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Missing,
    All,
    ClientChange,
    Single,
}

impl ModeArg {
    pub fn into_mode(self, index: Option<usize>) -> Result<RecalcMode> {
        match self {
            ModeArg::Missing => Ok(RecalcMode::Missing),
            ModeArg::All => Ok(RecalcMode::All),
            ModeArg::ClientChange => Ok(RecalcMode::ClientChange),
            ModeArg::Single => index
                .map(RecalcMode::Single)
                .ok_or_else(|| PricingError::MissingConfigError {
                    field: "--index".to_string(),
                }),
        }
    }
}

impl CliConfig {
    /// Loads the TOML file (or defaults) and applies command line overrides.
    pub fn load_config(&self) -> Result<TomlConfig> {
        let mut config = match &self.config {
            Some(path) => TomlConfig::from_file(path)?,
            None => TomlConfig::default(),
        };

        if let Some(base_url) = &self.api_base_url {
            config.api.base_url = base_url.clone();
        }
        if let Some(token) = &self.api_token {
            config.api.token = Some(token.clone());
        }
        if let Some(ttl) = self.cache_ttl_ms {
            config.pricing.cache_ttl_ms = Some(ttl);
        }
        if let Some(throttle) = self.throttle_ms {
            config.pricing.throttle_ms = Some(throttle);
        }

        Ok(config)
    }
}
