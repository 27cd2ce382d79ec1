// skipwatch - Spotify skip tracker
// Watches what's playing, notices what gets skipped, and (optionally) prunes the library

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use skipwatch::{
    behavior::{BehaviorDatabase, MemoryStore, SkipStore},
    config::Config,
    monitor::Monitor,
    playback::Credentials,
    spotify::{auth, SpotifyClient},
    ui::{FanoutSink, LogSink, NotificationSink},
};
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "skipwatch", version, about = "Track which Spotify songs you actually skip")]
struct Args {
    /// Enable developer logging (stderr + debug output)
    #[arg(long, global = true)]
    dev: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch playback until Ctrl-C
    Monitor {
        /// Keep skips in memory only, nothing is written to the database
        #[arg(long)]
        ephemeral: bool,
    },
    /// Authorize skipwatch with your Spotify account
    Login,
    /// Show the most skipped tracks
    Stats {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Print the config file location and contents
    Config,
}

fn init_logging(log_dir: &Path, dev: bool) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;

    // Daily rotating file appender
    let file_appender = tracing_appender::rolling::daily(log_dir, "skipwatch.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Base filter: info level for general logs, debug for skipwatch
    let base_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,skipwatch=debug"));

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_target(true)
        .with_level(true)
        .with_ansi(false);

    // If dev mode, also log to stderr (this will be in addition to file)
    let stderr_layer = dev.then(|| fmt::layer().with_writer(io::stderr).with_target(true));

    tracing_subscriber::registry()
        .with(base_filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()?;

    if dev {
        eprintln!("Dev mode: debug output enabled to stderr + file");
    }

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load config - falls back to defaults if missing
    let mut config = Config::load()?;
    let _guard = init_logging(&config.log_dir, args.dev)?;

    let span = info_span!("skipwatch", run = %Uuid::new_v4());
    let result = async {
        match args.command {
            Command::Monitor { ephemeral } => run_monitor(&mut config, ephemeral).await,
            Command::Login => run_login(&mut config).await,
            Command::Stats { limit } => run_stats(&config, limit).await,
            Command::Config => show_config(&config),
        }
    }
    .instrument(span)
    .await;

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

async fn run_monitor(config: &mut Config, ephemeral: bool) -> Result<()> {
    let Some((client_id, client_secret)) = config.spotify.credentials() else {
        bail!(
            "No Spotify client credentials, add client_id and client_secret to {}",
            Config::config_path()?.display()
        );
    };
    let (client_id, client_secret) = (client_id.to_string(), client_secret.to_string());

    if config.spotify.refresh_token.is_none() && config.spotify.access_token.is_none() {
        bail!("Not logged in, run `skipwatch login` first");
    }

    let store: Arc<dyn SkipStore> = if ephemeral {
        info!("Ephemeral session, skips stay in memory");
        Arc::new(MemoryStore::with_settings(config.skips.clone()))
    } else {
        Arc::new(BehaviorDatabase::new(&config.database_path, &config.skips)?)
    };

    let client = Arc::new(SpotifyClient::new(
        config.spotify.access_token.clone(),
        config.spotify.refresh_token.clone(),
    )?);

    let mut monitor = Monitor::with_config(client.clone(), store, config.monitor.clone())?;
    if !monitor.start(notification_sink(), &client_id, &client_secret, None) {
        bail!("Monitor refused to start, check the [spotify] and [monitor] sections of the config");
    }

    println!("Watching Spotify playback, Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    monitor.stop();
    info!("Shutting down");

    // keep whatever the client refreshed for next time
    let (access, refresh) = client.tokens();
    if access != config.spotify.access_token || refresh != config.spotify.refresh_token {
        config.spotify.access_token = access;
        config.spotify.refresh_token = refresh;
        if let Err(e) = config.save() {
            warn!("Could not save refreshed tokens: {:#}", e);
        }
    }

    Ok(())
}

fn notification_sink() -> Arc<dyn NotificationSink> {
    let sink = FanoutSink::new().with(LogSink);

    #[cfg(feature = "notify")]
    let sink = sink.with(skipwatch::ui::DesktopSink::new(true));

    Arc::new(sink)
}

async fn run_login(config: &mut Config) -> Result<()> {
    let Some((client_id, client_secret)) = config.spotify.credentials() else {
        bail!(
            "Add client_id and client_secret to {} before logging in",
            Config::config_path()?.display()
        );
    };
    let credentials = Credentials::new(client_id, client_secret);
    let redirect_uri = config.spotify.redirect_uri.clone();

    let state = Uuid::new_v4().to_string();
    let url = auth::authorize_url(&credentials.client_id, &redirect_uri, &state)?;

    println!("Open this URL in a browser and approve access:\n\n  {}\n", url);
    print!("Then paste the full URL you were redirected to: ");
    io::stdout().flush()?;

    let mut redirected = String::new();
    io::stdin().lock().read_line(&mut redirected)?;
    let code = auth::code_from_redirect(&redirected, &state)?;

    let client = SpotifyClient::new(None, None)?;
    let tokens = auth::exchange_code(client.http(), &credentials, &code, &redirect_uri)
        .await
        .context("Token exchange failed")?;

    config.spotify.access_token = Some(tokens.access_token);
    config.spotify.refresh_token = tokens.refresh_token;
    config.save()?;

    info!("Login complete, tokens saved");
    println!("Logged in. Run `skipwatch monitor` to start tracking.");
    Ok(())
}

async fn run_stats(config: &Config, limit: usize) -> Result<()> {
    let db = BehaviorDatabase::new(&config.database_path, &config.skips)?;
    let tracks = db.most_skipped(limit).await?;

    if tracks.is_empty() {
        println!("No skips recorded yet.");
        return Ok(());
    }

    println!("{:>5}  {:>6}  {:>8}  {}", "skips", "manual", "finished", "track");
    for track in tracks {
        println!(
            "{:>5}  {:>6}  {:>8}  {} - {}",
            track.skip_count, track.manual_skip_count, track.not_skipped_count, track.artist, track.name
        );
        if let Some(stats) = db.get_track_statistics(&track.id).await? {
            println!(
                "{:>23}  skip rate {:.0}% over {} plays",
                "",
                stats.skip_rate() * 100.0,
                stats.play_count
            );
        }
    }

    Ok(())
}

fn show_config(config: &Config) -> Result<()> {
    println!("# {}", Config::config_path()?.display());
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
