mod achievements;
mod auth;
mod backend;
mod cli;
mod clock;
mod config;
mod error;
mod meditation;
mod models;
mod profile;
mod reflection;
mod stats;
mod store;
mod streak;
mod ticker;
mod timer;
mod transcript;

use anyhow::Result;
use clap::Parser;
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "mindful",
    about = "Timed meditation sessions with reflections, streaks and achievements"
)]
pub struct Args {
    #[arg(long, value_name = "MINUTES", help = "Sit one session, reflect, then exit")]
    pub sit: Option<u32>,

    #[arg(long, env = "MINDFUL_URL", help = "Backend project URL")]
    pub url: Option<String>,

    #[arg(
        long,
        env = "MINDFUL_ANON_KEY",
        hide_env_values = true,
        help = "Backend anon (public) key"
    )]
    pub anon_key: Option<String>,

    #[arg(long, help = "Session transcripts directory")]
    pub transcripts_dir: Option<PathBuf>,

    #[arg(long, help = "Config file path")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Debug logging to stderr")]
    pub debug: bool,
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(args.debug);

    let mut cfg = if let Some(config_path) = &args.config {
        config::Config::load_from(config_path)?
    } else {
        config::Config::load()?
    };
    cfg.apply_cli(args.url.as_deref(), args.anon_key.as_deref());

    if let Err(errors) = cfg.validate() {
        for e in &errors {
            eprintln!("Config error {}", e);
        }
        return Err(anyhow::anyhow!("{} configuration error(s)", errors.len()));
    }

    let anon_key = cfg.backend.resolve_anon_key().ok_or_else(|| {
        anyhow::anyhow!(
            "No anon key configured. Use --anon-key, {} or [backend] anon_key.",
            cfg.backend.anon_key_env
        )
    })?;

    let root = std::env::current_dir()?;
    let transcripts_dir = args
        .transcripts_dir
        .clone()
        .unwrap_or_else(|| root.join(".mindful").join("sessions"));
    std::fs::create_dir_all(&transcripts_dir)?;

    let run_id = uuid::Uuid::new_v4().to_string();
    let transcript_path = transcripts_dir.join(format!("{}.jsonl", run_id));
    let transcript = transcript::Transcript::new(&transcript_path, &run_id)?;

    let backend = Rc::new(backend::SupabaseClient::new(
        &cfg.backend.url,
        &anon_key,
        cfg.backend.timeout_ms,
    ));

    let credentials = auth::CredentialStore::default_location();
    if credentials.is_none() {
        tracing::warn!("no home directory; sign-ins will not be remembered");
    }
    let identity = auth::Identity::restore(credentials, chrono::Utc::now().timestamp())?;

    let meditation = meditation::MeditationService::new(
        Rc::clone(&backend),
        Box::new(clock::SystemClock),
        meditation::ServiceOptions {
            default_duration: cfg.timer.default_duration_secs,
            tick_interval: Duration::from_millis(cfg.timer.tick_interval_ms),
            recent_limit: cfg.recent.limit,
            journal_max_chars: cfg.journal.max_chars,
        },
    );

    let ctx = cli::Context {
        args,
        config: cfg,
        run_id,
        transcript: RefCell::new(transcript),
        backend,
        clock: clock::SystemClock,
        identity: RefCell::new(identity),
        meditation: RefCell::new(meditation),
        reflection: RefCell::new(None),
    };

    if let Some(minutes) = ctx.args.sit {
        cli::run_sit(&ctx, minutes)
    } else {
        cli::run_repl(ctx)
    }
}
