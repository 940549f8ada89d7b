//! Governance Audit CLI
//!
//! Operator tool for the tamper-evident audit log: key setup, manual
//! event entry, queries, verification, exports and statistics.

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use governance_audit::audit::event::parse_timestamp;
use governance_audit::audit::{
    ActorContext, AuditFilter, AuditLogger, EventDetails, EventType, ExportFormat, NewAuditEvent,
    Severity,
};
use governance_audit::config::AuditConfig;
use governance_audit::crypto::KeyManager;

#[derive(Parser)]
#[command(name = "governance-audit")]
#[command(about = "Tamper-evident governance audit log")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database URL, overrides configuration
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Payload key file, overrides configuration
    #[arg(long, global = true)]
    key_path: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the payload encryption key
    InitKey,

    /// Append an event to the log
    Log(LogArgs),

    /// Query events as JSON lines
    Query {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Verify the hash chain and event contents
    Verify {
        /// Start verification at this event id
        #[arg(long)]
        from: Option<String>,
    },

    /// Export the audit trail
    Export {
        #[command(flatten)]
        filter: FilterArgs,

        /// Output format (json, csv, yaml)
        #[arg(short, long, default_value = "json")]
        format: String,

        /// Output file, stdout if omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Keep source IP, user agent and session id
        #[arg(long)]
        include_sensitive: bool,
    },

    /// Show log statistics
    Stats,
}

#[derive(Args)]
struct LogArgs {
    /// Event type, e.g. config-change, security-event
    #[arg(long = "type")]
    event_type: String,

    /// Severity (critical, high, medium, low, info)
    #[arg(long)]
    severity: String,

    #[arg(long)]
    resource: String,

    #[arg(long)]
    action: String,

    #[arg(long)]
    outcome: String,

    /// Details as a flat JSON object
    #[arg(long)]
    details: Option<String>,

    #[arg(long)]
    user: Option<String>,

    #[arg(long)]
    session: Option<String>,

    #[arg(long)]
    source_ip: Option<String>,

    #[arg(long)]
    user_agent: Option<String>,

    #[arg(long)]
    risk_score: Option<f64>,
}

#[derive(Args)]
struct FilterArgs {
    /// Inclusive lower time bound (RFC 3339)
    #[arg(long)]
    since: Option<String>,

    /// Inclusive upper time bound (RFC 3339)
    #[arg(long)]
    until: Option<String>,

    #[arg(long = "type")]
    event_types: Vec<String>,

    #[arg(long = "severity")]
    severities: Vec<String>,

    #[arg(long = "user")]
    users: Vec<String>,

    #[arg(long = "resource")]
    resources: Vec<String>,

    #[arg(long = "action")]
    actions: Vec<String>,

    #[arg(long = "outcome")]
    outcomes: Vec<String>,

    #[arg(long)]
    limit: Option<u32>,

    #[arg(long, default_value_t = 0)]
    offset: u32,

    /// Oldest first
    #[arg(long)]
    ascending: bool,
}

impl FilterArgs {
    fn into_filter(self) -> Result<AuditFilter> {
        let mut filter = AuditFilter::new().offset(self.offset);

        if let Some(since) = self.since {
            filter = filter.since(parse_timestamp(&since)?);
        }
        if let Some(until) = self.until {
            filter = filter.until(parse_timestamp(&until)?);
        }
        for event_type in &self.event_types {
            filter = filter.event_type(event_type.parse::<EventType>()?);
        }
        for severity in &self.severities {
            filter = filter.severity(severity.parse::<Severity>()?);
        }
        filter.user_ids = self.users;
        filter.resources = self.resources;
        filter.actions = self.actions;
        filter.outcomes = self.outcomes;
        filter.limit = self.limit;
        if self.ascending {
            filter = filter.ascending();
        }
        Ok(filter)
    }
}

impl LogArgs {
    fn into_event(self) -> Result<NewAuditEvent> {
        let details = match self.details {
            Some(raw) => {
                let value = serde_json::from_str(&raw).context("--details is not valid JSON")?;
                EventDetails::from_json(value)?
            }
            None => EventDetails::new(),
        };

        let actor = ActorContext {
            user_id: self.user,
            session_id: self.session,
            source_ip: self.source_ip,
            user_agent: self.user_agent,
        };

        let mut event = NewAuditEvent::new(
            self.event_type.parse()?,
            self.severity.parse()?,
            self.resource,
            self.action,
            self.outcome,
        )
        .with_details(details)
        .with_actor(actor);
        event.risk_score = self.risk_score;
        Ok(event)
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default_filter = if quiet {
        "governance_audit=error"
    } else if verbose {
        "governance_audit=debug"
    } else {
        "governance_audit=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(cli: &Cli) -> Result<AuditConfig> {
    let mut config = AuditConfig::load(cli.config.as_deref())?;
    if let Some(url) = &cli.database_url {
        config.database_url = url.clone();
    }
    if let Some(path) = &cli.key_path {
        config.key_path = path.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let config = load_config(&cli)?;

    if let Commands::InitKey = cli.command {
        let manager = KeyManager::new(&config.key_path);
        if manager.key_exists() {
            return Err(anyhow!(
                "Key file already exists: {}",
                manager.key_path().display()
            ));
        }
        let cipher = manager.generate_key()?;
        println!("Generated audit key at {}", manager.key_path().display());
        println!("  Fingerprint: {}", cipher.fingerprint());
        return Ok(());
    }

    let logger = AuditLogger::open(&config).await?;

    match cli.command {
        Commands::InitKey => {}

        Commands::Log(args) => {
            let event_id = logger.log_event(args.into_event()?).await?;
            println!("{}", event_id);
        }

        Commands::Query { filter } => {
            let result = logger.query_events(&filter.into_filter()?).await?;
            for event in &result.events {
                println!("{}", serde_json::to_string(event)?);
            }
            for failure in &result.failures {
                warn!(event_id = %failure.event_id, "Skipped unreadable event: {}", failure.reason);
            }
        }

        Commands::Verify { from } => {
            let report = logger.verify_integrity(from.as_deref()).await?;
            println!("{}", report.summary());
            println!("{}", report.detailed_status());
            if !report.verified {
                logger.database().close().await;
                std::process::exit(1);
            }
        }

        Commands::Export {
            filter,
            format,
            output,
            include_sensitive,
        } => {
            let format: ExportFormat = format.parse()?;
            let rendered = logger
                .export_audit_trail(&filter.into_filter()?, format, include_sensitive)
                .await?;

            match output {
                Some(path) => {
                    std::fs::write(&path, rendered)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!("Export written to {}", path.display());
                }
                None => print!("{}", rendered),
            }
        }

        Commands::Stats => {
            let stats = logger.statistics().await?;

            println!("Audit Log Statistics:");
            println!("  Total Events: {}", stats.total_events);
            println!(
                "  First Event: {}",
                stats.first_timestamp.as_deref().unwrap_or("-")
            );
            println!(
                "  Last Event: {}",
                stats.last_timestamp.as_deref().unwrap_or("-")
            );
            println!("  Head Hash: {}", stats.head_hash);
            println!("\nBy event type:");
            for (event_type, count) in &stats.by_event_type {
                println!("  {}: {}", event_type, count);
            }
            println!("\nBy severity:");
            for (severity, count) in &stats.by_severity {
                println!("  {}: {}", severity, count);
            }
        }
    }

    logger.database().close().await;
    Ok(())
}
