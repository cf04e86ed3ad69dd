use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Local};
use clap::{Parser, Subcommand};
use colored::Colorize;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::info;

use kindred::auth::{IdentityProvider, SignedTokenIdentity};
use kindred::classify::geocoding::GeocodingResolver;
use kindred::classify::traits::{NoopResolver, PlaceResolver};
use kindred::config::Config;
use kindred::db::Database;
use kindred::engine::{Engine, ProfileUpdate};
use kindred::output::terminal;

/// Kindred: activity patterns and compatibility.
///
/// Learns where and when people spend their time, scores how well two
/// people fit, and pairs up compatible people who happen to be nearby.
#[derive(Parser)]
#[command(name = "kindred", version, about)]
struct Cli {
    /// Bearer token of the acting user
    #[arg(long, global = true)]
    token: Option<String>,

    /// Act as this user, minting a token with KINDRED_TOKEN_SECRET
    #[arg(long = "as", global = true, value_name = "USER_ID")]
    as_user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Issue a bearer token for a user
    Token {
        user_id: String,
    },

    /// Edit your profile
    Profile {
        #[arg(long)]
        name: Option<String>,

        /// Comma-separated interests (replaces the current list)
        #[arg(long, value_delimiter = ',')]
        interests: Option<Vec<String>>,

        /// Accept every connection request automatically
        #[arg(long)]
        auto_accept: Option<bool>,

        /// Show up in other people's nearby searches
        #[arg(long)]
        visible: Option<bool>,

        #[arg(long)]
        emoji: Option<String>,
    },

    /// Record a visit at a coordinate
    Visit {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,

        #[arg(long, allow_negative_numbers = true)]
        lng: f64,

        /// When the visit happened, RFC 3339 with offset (default: now, local time)
        #[arg(long)]
        at: Option<String>,
    },

    /// Show an activity fingerprint (yours by default)
    Fingerprint {
        user_id: Option<String>,

        /// Also list your latest N raw visits
        #[arg(long, value_name = "N")]
        recent: Option<u32>,
    },

    /// Score the compatibility of two users
    Compat {
        user_a: String,
        user_b: String,
    },

    /// Report your current position
    Presence {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,

        #[arg(long, allow_negative_numbers = true)]
        lng: f64,
    },

    /// List people near you
    Nearby {
        /// Search radius in meters (default: 200)
        #[arg(long, default_value = "200")]
        radius: f64,

        /// Also compute compatibility with each person
        #[arg(long)]
        scores: bool,

        /// Number of scores to compute in parallel (default: 8)
        #[arg(long, default_value = "8")]
        concurrency: usize,
    },

    /// Ask to connect with someone
    Connect {
        user_id: String,
    },

    /// List connection requests waiting on you
    Requests,

    /// Pair up with compatible people nearby
    Detect {
        /// Search radius in meters (default: 200)
        #[arg(long, default_value = "200")]
        radius: f64,
    },

    /// Decline a pairing
    Decline {
        user_id: String,
    },

    /// Block someone
    Block {
        user_id: String,
    },

    /// Rate a meetup (1-5)
    Feedback {
        match_id: i64,
        rating: u8,

        #[arg(long)]
        text: Option<String>,
    },

    /// List your matches
    Matches,

    /// Decay your frequency scores to the present
    Recalculate,

    /// Delete presence rows past the freshness window
    SweepPresence,

    /// Show system status (DB stats, configuration)
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    // Set up structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("kindred=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match &cli.command {
        Commands::Init => {
            info!("Initializing Kindred database...");
            let db = kindred::db::initialize_sqlite(&config.db_path)?;
            let table_count = db.table_count().await?;
            println!("Database initialized at: {}", config.db_path);
            println!("Tables created: {table_count}");
            println!("\nKindred is ready. Next step: set KINDRED_TOKEN_SECRET in your .env file");
            println!("\nThen run: kindred token <user_id>");
            return Ok(());
        }

        Commands::Token { user_id } => {
            let identity = build_identity(&config)?;
            println!("{}", identity.issue(user_id)?);
            return Ok(());
        }

        Commands::Status => {
            kindred::status::show(&config).await?;
            return Ok(());
        }

        _ => {}
    }

    let identity = Arc::new(build_identity(&config)?);
    let token = resolve_cli_token(&cli.token, &cli.as_user, &identity)?;
    let viewer = identity
        .resolve(&token)
        .await
        .context("Token rejected")?;
    let engine = Engine::new(
        kindred::db::open_sqlite(&config.db_path)?,
        build_resolver(&config)?,
        identity,
        config.policy(),
    );

    match cli.command {
        Commands::Init | Commands::Token { .. } | Commands::Status => {
            unreachable!("handled before the engine is built")
        }

        Commands::Profile {
            name,
            interests,
            auto_accept,
            visible,
            emoji,
        } => {
            let profile = engine
                .upsert_profile(
                    &token,
                    ProfileUpdate {
                        name,
                        interests,
                        auto_accept_connections: auto_accept,
                        is_visible: visible,
                        emoji_signature: emoji,
                    },
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }

        Commands::Visit { lat, lng, at } => {
            let timestamp = match at {
                Some(raw) => DateTime::parse_from_rfc3339(&raw)
                    .with_context(|| format!("Invalid --at timestamp: {raw}"))?,
                None => local_now(),
            };
            let visit = engine.record_visit(&token, lat, lng, timestamp).await?;
            terminal::display_visit(&visit);
        }

        Commands::Fingerprint { user_id, recent } => {
            let target = user_id.unwrap_or_else(|| viewer.clone());
            let fingerprint = engine.get_fingerprint(&token, Some(target.as_str())).await?;
            fingerprint.display(&target);
            if let Some(limit) = recent {
                if target != viewer {
                    anyhow::bail!("Only your own visit history can be listed");
                }
                terminal::display_recent_visits(&engine.recent_visits(&token, limit).await?);
            }
        }

        Commands::Compat { user_a, user_b } => {
            let breakdown = engine.compute_compatibility(&token, &user_a, &user_b).await?;
            terminal::display_compatibility(&breakdown);
        }

        Commands::Presence { lat, lng } => {
            let presence = engine.update_presence(&token, lat, lng).await?;
            println!(
                "Presence updated: {:.5}, {:.5} (cell {})",
                presence.lat, presence.lng, presence.geohash
            );
        }

        Commands::Nearby {
            radius,
            scores,
            concurrency,
        } => {
            let nearby = engine.find_nearby(&token, radius).await?;
            terminal::display_nearby(&nearby);

            if scores && !nearby.is_empty() {
                let engine = &engine;
                let token = token.as_str();
                let viewer = viewer.as_str();
                let results: Vec<_> = stream::iter(nearby.iter().map(|c| async move {
                    engine
                        .compute_compatibility(token, viewer, &c.user_id)
                        .await
                }))
                .buffer_unordered(concurrency.max(1))
                .collect()
                .await;

                let mut breakdowns = Vec::new();
                for result in results {
                    breakdowns.push(result?);
                }
                breakdowns.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                for breakdown in &breakdowns {
                    terminal::display_compatibility(breakdown);
                }
            }
        }

        Commands::Connect { user_id } => {
            let outcome = engine.send_connection_request(&token, &user_id).await?;
            terminal::display_connection(&outcome, &viewer);
        }

        Commands::Requests => {
            let requests = engine.pending_requests(&token).await?;
            terminal::display_pending_requests(&requests);
        }

        Commands::Detect { radius } => {
            let outcomes = engine.detect_co_presence(&token, radius).await?;
            terminal::display_co_presence(&outcomes);
        }

        Commands::Decline { user_id } => {
            let record = engine.decline(&token, &user_id).await?;
            println!("Pair with {} is now {}", user_id.bold(), record.status);
        }

        Commands::Block { user_id } => {
            let record = engine.block(&token, &user_id).await?;
            println!("Pair with {} is now {}", user_id.bold(), record.status.to_string().red());
        }

        Commands::Feedback {
            match_id,
            rating,
            text,
        } => {
            let weights = engine
                .submit_feedback(&token, match_id, rating, text.as_deref())
                .await?;
            println!("Thanks! Feedback recorded for match {match_id}.");
            terminal::display_weights(&viewer, &weights);
        }

        Commands::Matches => {
            let matches = engine.list_matches(&token).await?;
            terminal::display_match_list(&matches, &viewer);
        }

        Commands::Recalculate => {
            let updated = engine.recalculate_frequency_scores(&token).await?;
            println!("Recalculated {updated} pattern buckets.");
        }

        Commands::SweepPresence => {
            let removed = engine.sweep_stale_presence().await?;
            println!("Removed {removed} stale presence rows.");
        }
    }

    Ok(())
}

/// Build the token issuer/verifier, or bail with a helpful message.
fn build_identity(config: &Config) -> Result<SignedTokenIdentity> {
    config.require_token_secret()?;
    SignedTokenIdentity::new(&config.token_secret, config.token_ttl_secs)
}

/// Pick the place resolver: Google when a key is configured, otherwise none.
fn build_resolver(config: &Config) -> Result<Arc<dyn PlaceResolver>> {
    if config.google_maps_api_key.is_empty() {
        info!("No GOOGLE_MAPS_API_KEY, visits will be classified as general");
        return Ok(Arc::new(NoopResolver));
    }
    let resolver =
        GeocodingResolver::new(&config.geocode_url, config.google_maps_api_key.clone())?;
    Ok(Arc::new(resolver))
}

/// The token to act with: an explicit --token, or one minted for --as.
fn resolve_cli_token(
    token: &Option<String>,
    as_user: &Option<String>,
    identity: &SignedTokenIdentity,
) -> Result<String> {
    match (token, as_user) {
        (Some(t), _) => Ok(t.clone()),
        (None, Some(user)) => identity.issue(user),
        (None, None) => anyhow::bail!(
            "No identity given. Pass --token <TOKEN> or --as <USER_ID>.\n\
             Get a token with: kindred token <user_id>"
        ),
    }
}

fn local_now() -> DateTime<FixedOffset> {
    let now = Local::now();
    now.with_timezone(now.offset())
}
