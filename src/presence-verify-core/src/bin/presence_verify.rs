//! presence-verify CLI - attendance presence verification service.
//!
//! Runs the HTTP service and a couple of operator tools.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use presence_verify_core::audit::{ActivityAuditLog, AuditSink, JsonlAuditSink, MemoryAuditSink};
use presence_verify_core::geofence::haversine_distance_m;
use presence_verify_core::http::{router, AppState};
use presence_verify_core::network::{HttpPresenceOracle, NetworkPresenceValidator};
use presence_verify_core::policy::{InMemoryPolicyStore, LocationPolicy};
use presence_verify_core::settings::{
    InMemorySettingsSource, JsonFileSettingsSource, SettingsService, SettingsSource,
};
use presence_verify_core::{
    verify_audit_jsonl, EngineBuilder, GeoPoint, HttpVisionProvider, VerifyConfig, VisionProvider,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// presence-verify - is this person at the site, on their device, and live?
#[derive(Parser)]
#[command(name = "presence-verify")]
#[command(version = VERSION)]
#[command(about = "Attendance presence verification service")]
#[command(long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service
    Serve(ServeArgs),

    /// Great-circle distance between two points, checked against a radius
    Distance {
        /// Latitude of the anchor
        #[arg(long, allow_hyphen_values = true)]
        anchor_lat: f64,

        /// Longitude of the anchor
        #[arg(long, allow_hyphen_values = true)]
        anchor_lon: f64,

        /// Latitude of the claim
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude of the claim
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Allowed radius in meters
        #[arg(long, default_value = "100")]
        radius: f64,
    },

    /// Verify the hash chain of a JSON-lines audit file
    VerifyAudit {
        /// Audit file
        path: PathBuf,
    },
}

#[derive(clap::Args)]
struct ServeArgs {
    /// Listen address
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: String,

    /// Location policy JSON file
    #[arg(long)]
    policy: Option<PathBuf>,

    /// Runtime settings JSON file (provider credentials, face-match minimums)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Append audit events to this JSON-lines file
    #[arg(long)]
    audit: Option<PathBuf>,

    /// Relying party id for challenge-response ceremonies
    #[arg(long, default_value = "localhost")]
    rp_id: String,

    /// Allowed origin (repeatable)
    #[arg(long = "origin", default_value = "https://localhost")]
    origins: Vec<String>,

    /// Vision provider name, highest priority first (repeatable)
    #[arg(long = "provider")]
    providers: Vec<String>,

    /// Require a signed assertion on every check-in
    #[arg(long)]
    require_assertion: bool,

    /// Tolerate authenticators that always report a zero counter
    #[arg(long)]
    allow_zero_counter: bool,

    /// Offset from UTC, in minutes, used for the attendance day
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    utc_offset_minutes: i32,

    /// Network presence oracle base URL
    #[arg(long)]
    oracle_url: Option<String>,

    /// Oracle site identifier
    #[arg(long, default_value = "default")]
    oracle_site: String,

    /// Oracle bearer token
    #[arg(long, default_value = "")]
    oracle_token: String,

    /// Bearer token required on admin routes and re-enrollment; without it they are refused
    #[arg(long)]
    admin_token: Option<String>,

    /// Seconds between expired-challenge sweeps
    #[arg(long, default_value = "60")]
    sweep_interval: u64,
}

fn init_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn load_policy(path: &Path) -> Result<LocationPolicy, String> {
    let data =
        std::fs::read_to_string(path).map_err(|e| format!("read {}: {}", path.display(), e))?;
    let policy: LocationPolicy =
        serde_json::from_str(&data).map_err(|e| format!("parse {}: {}", path.display(), e))?;
    policy.validate().map_err(|e| e.to_string())?;
    Ok(policy)
}

async fn run_serve(args: ServeArgs) -> Result<(), String> {
    let config = VerifyConfig {
        rp_id: args.rp_id,
        allowed_origins: args.origins,
        require_assertion: args.require_assertion,
        allow_zero_counter: args.allow_zero_counter,
        utc_offset_minutes: args.utc_offset_minutes,
        ..VerifyConfig::default()
    };

    let policies = Arc::new(match &args.policy {
        Some(path) => InMemoryPolicyStore::with_policy(load_policy(path)?),
        None => {
            warn!("No location policy loaded; attendance claims fail until one is posted");
            InMemoryPolicyStore::default()
        },
    });

    let source: Arc<dyn SettingsSource> = match &args.settings {
        Some(path) => Arc::new(JsonFileSettingsSource::new(path)),
        None => Arc::new(InMemorySettingsSource::default()),
    };
    let settings = Arc::new(SettingsService::new(source, config.settings_ttl));

    let sink: Arc<dyn AuditSink> = match &args.audit {
        Some(path) => Arc::new(JsonlAuditSink::new(path)),
        None => Arc::new(MemoryAuditSink::new()),
    };
    let audit = Arc::new(
        ActivityAuditLog::resume(sink)
            .await
            .map_err(|e| format!("audit log: {e}"))?,
    );

    let mut providers: Vec<Arc<dyn VisionProvider>> = Vec::new();
    for name in &args.providers {
        let provider =
            HttpVisionProvider::new(name.as_str(), Arc::clone(&settings), config.provider_timeout)
                .map_err(|e| e.to_string())?;
        providers.push(Arc::new(provider));
    }

    let network = match &args.oracle_url {
        Some(url) => {
            let oracle = HttpPresenceOracle::new(
                url,
                args.oracle_site.as_str(),
                args.oracle_token.as_str(),
                config.oracle_timeout,
            )
            .map_err(|e| e.to_string())?;
            NetworkPresenceValidator::with_oracle(Arc::new(oracle), config.oracle_timeout)
        },
        None => NetworkPresenceValidator::allow_list_only(),
    };

    let engine = Arc::new(
        EngineBuilder::new(config, policies, settings, audit)
            .network(network)
            .providers(providers)
            .build()
            .map_err(|e| e.to_string())?,
    );

    let sweeper = Arc::clone(&engine);
    let interval = Duration::from_secs(args.sweep_interval.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match sweeper.authenticator().sweep_expired_challenges().await {
                Ok(0) => {},
                Ok(n) => info!(removed = n, "Swept expired challenges"),
                Err(e) => warn!(error = %e, "Challenge sweep failed"),
            }
        }
    });

    if args.admin_token.is_none() {
        warn!("No --admin-token given; admin routes and re-enrollment are disabled");
    }
    let app = router(AppState {
        engine,
        admin_token: args.admin_token,
    });
    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .map_err(|e| format!("bind {}: {}", args.bind, e))?;
    info!(bind = %args.bind, version = VERSION, "presence-verify listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutting down");
        })
        .await
        .map_err(|e| format!("server error: {e}"))
}

fn run_distance(anchor: GeoPoint, claim: GeoPoint, radius: f64, json: bool) -> bool {
    let distance = haversine_distance_m(anchor, claim);
    let inside = distance <= radius;
    if json {
        let output = serde_json::json!({
            "distance_m": distance,
            "radius_m": radius,
            "inside": inside,
        });
        println!("{output}");
    } else {
        println!("Distance: {distance:.1} m");
        println!("Radius:   {radius:.1} m");
        if inside {
            println!("Result:   inside");
        } else {
            println!("Result:   outside by {:.1} m", distance - radius);
        }
    }
    inside
}

fn run_verify_audit(path: &Path, json: bool) -> Result<bool, String> {
    let result = verify_audit_jsonl(path).map_err(|e| e.to_string())?;
    if json {
        let output = serde_json::to_string_pretty(&result).map_err(|e| e.to_string())?;
        println!("{output}");
    } else {
        println!("\nAUDIT CHAIN VERIFICATION");
        println!("========================\n");
        println!("  File:        {}", path.display());
        println!("  Entries:     {}", result.total_entries);
        println!("  Genesis:     {}", if result.genesis_valid { "ok" } else { "BROKEN" });
        println!("  Hash chain:  {}", if result.hash_chain_valid { "ok" } else { "BROKEN" });
        if let Some(summary) = &result.chain_summary {
            println!("  Alerts:      {}", summary.security_alerts);
        }
        if let Some(seq) = result.first_tampered_sequence {
            println!("  First bad:   #{seq}");
        }
        for e in &result.errors {
            println!("  - {e}");
        }
        println!(
            "\n  Result: {}",
            if result.valid { "VALID" } else { "TAMPERED" }
        );
    }
    Ok(result.valid)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let json_output = cli.format == "json";

    match cli.command {
        Commands::Serve(args) => {
            init_logging(cli.verbose, json_output);
            match run_serve(args).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    error!(error = %e, "presence-verify failed");
                    ExitCode::FAILURE
                },
            }
        },
        Commands::Distance {
            anchor_lat,
            anchor_lon,
            lat,
            lon,
            radius,
        } => {
            let inside = run_distance(
                GeoPoint::new(anchor_lat, anchor_lon),
                GeoPoint::new(lat, lon),
                radius,
                json_output,
            );
            if inside {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        },
        Commands::VerifyAudit { path } => match run_verify_audit(&path, json_output) {
            Ok(true) => ExitCode::SUCCESS,
            Ok(false) => ExitCode::from(1),
            Err(e) => {
                eprintln!("error: {e}");
                ExitCode::from(2)
            },
        },
    }
}
