use anyhow::Context;
use clap::Parser;
use facture_pricing::config::Command;
use facture_pricing::core::ConfigProvider;
use facture_pricing::utils::error::{ErrorSeverity, PricingError};
use facture_pricing::utils::logger::{self, LogFormat};
use facture_pricing::utils::validation::Validate;
use facture_pricing::{
    ApiExecutor, CliConfig, FactureLine, FacturePricer, HttpPriceLookup, ManualOverrides, PriceCache,
    SessionEvent, TomlConfig,
};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    let config = match cli.load_config().and_then(|config| config.validate().map(|_| config)) {
        Ok(config) => config,
        Err(e) => {
            init_logger(&cli, None);
            fail(&e);
        }
    };
    init_logger(&cli, Some(&config));
    tracing::debug!("Configuration: {:?}", config);

    let executor = Arc::new(ApiExecutor::new(config.login_path()));
    let mut session_events = executor.subscribe();

    let lookup = match HttpPriceLookup::from_config(&config, executor.clone()) {
        Ok(lookup) => lookup,
        Err(e) => fail(&e),
    };
    tracing::info!("🚀 Pricing against {}", lookup.endpoint());

    let failed = match cli.command {
        Command::Price {
            client,
            service,
            unite,
            date,
            force,
        } => {
            let prices = PriceCache::with_ttl(lookup, config.cache_ttl());
            prices.set_date(date);
            let outcome = prices.price_outcome(client, service, unite, force).await;
            if let Some(message) = executor.last_error() {
                eprintln!("⚠️ {}", message);
            }
            println!("{:.2}", outcome.price);
            outcome.failed
        }
        Command::Recalc {
            lines,
            client,
            mode,
            index,
            manual,
            date,
        } => {
            let mode = match mode.into_mode(index) {
                Ok(mode) => mode,
                Err(e) => fail(&e),
            };
            let content = std::fs::read_to_string(&lines)
                .with_context(|| format!("Failed to read invoice lines from '{}'", lines))?;
            let mut facture_lines: Vec<FactureLine> =
                serde_json::from_str(&content).context("Invoice lines must be a JSON array")?;
            let manual: ManualOverrides = manual.into_iter().collect();

            let pricer = FacturePricer::from_config(lookup, &config).with_client(Some(client));
            pricer.set_date(date);
            let report = pricer.recalculate(&mut facture_lines, mode, &manual).await;

            tracing::info!("✅ Recalculation finished: {:?}", report);
            println!("{}", serde_json::to_string_pretty(&facture_lines)?);
            if report.has_failures() {
                eprintln!("⚠️ Price lookup failed for line(s) {:?}", report.failed);
            }
            report.has_failures()
        }
    };

    let expired = report_session_expiry(&mut session_events);
    if failed || expired {
        std::process::exit(exit_code(ErrorSeverity::Medium));
    }
    Ok(())
}

/// Prints the login redirect for every expiry published during the command.
fn report_session_expiry(events: &mut broadcast::Receiver<SessionEvent>) -> bool {
    let mut expired = false;
    loop {
        match events.try_recv() {
            Ok(SessionEvent::Expired { redirect }) => {
                if !expired {
                    eprintln!("🔒 Session expired, please log in again ({})", redirect);
                }
                expired = true;
            }
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty | TryRecvError::Closed) => return expired,
        }
    }
}

fn init_logger(cli: &CliConfig, config: Option<&TomlConfig>) {
    let json = cli.json_logs || config.is_some_and(TomlConfig::json_logs);
    logger::init_logger(LogFormat::from_json_flag(json), cli.verbose);
}

fn exit_code(severity: ErrorSeverity) -> i32 {
    match severity {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    }
}

fn fail(e: &PricingError) -> ! {
    tracing::error!(
        "❌ {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 Suggestion: {}", e.recovery_suggestion());
    std::process::exit(exit_code(e.severity()).max(1));
}
