use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use credit_cue::database::repo::{NewMovie, NewScene, NewSubmission};
use credit_cue::database::Store;
use credit_cue::escalation::EscalationWatcher;
use credit_cue::graph::{Node, ReportKind};
use credit_cue::ledger::Target;
use credit_cue::notify::{webhook, JsonLinesSink, LogSink, NotificationSink, Notifier, WebhookSink};
use credit_cue::utils::config::{self, Config, DEFAULT_CONFIG_FILE};
use credit_cue::Engine;

#[derive(Parser, Debug)]
#[command(author, version, about = "Moderation tools for the post-credit scene database", long_about = None)]
struct Args {
    /// KEY=VALUE configuration file; environment variables override it.
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum NodeKind {
    Movie,
    Submission,
    Comment,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a configuration file with default values.
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Like or dislike a submission.
    Vote {
        submission_id: i64,
        #[arg(long)]
        ip: String,
        #[arg(long = "type")]
        vote_type: String,
    },
    /// Like or dislike a comment.
    CommentVote {
        comment_id: i64,
        #[arg(long)]
        ip: String,
        #[arg(long = "type")]
        vote_type: String,
    },
    /// Record a timecode submission for a movie.
    Submit {
        #[arg(long)]
        tmdb_id: i64,
        #[arg(long)]
        title: String,
        #[arg(long)]
        version: String,
        #[arg(long)]
        source: String,
        #[arg(long)]
        ip: String,
        #[arg(long)]
        end_credits_at: Option<String>,
        #[arg(long)]
        moving_credits_at: Option<String>,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        /// Start time of a post-credit scene; repeat for several.
        #[arg(long = "scene")]
        scenes: Vec<String>,
    },
    Comment {
        movie_id: i64,
        #[arg(long)]
        username: String,
        #[arg(long)]
        body: String,
        #[arg(long)]
        ip: String,
    },
    Report {
        kind: ReportKind,
        entity_id: i64,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        ip: String,
    },
    /// Delete a movie, submission or comment and everything hanging off it.
    Delete { kind: NodeKind, id: i64 },
    /// Delete every submission, comment and vote from one address.
    PurgeIp { ip: String },
    Reports {
        #[arg(long, default_value_t = 50)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    ResolveReport { id: i64 },
    RemoveScene { id: i64 },
    Ban {
        ip: String,
        #[arg(long)]
        reason: String,
        #[arg(long = "by")]
        banned_by: String,
    },
    Unban { id: i64 },
    Bans {
        #[arg(long, default_value_t = 50)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    Stats,
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    if let Command::Init { force } = args.command {
        if args.config.exists() && !force {
            return Err(anyhow!("{:?} already exists, pass --force to overwrite", args.config));
        }
        config::save_to_env(&args.config, &Config::default())?;
        info!("Wrote default configuration to {:?}", args.config);
        return Ok(());
    }

    let config = Config::load(&args.config)?;
    info!("DB: {:?}", config.db_path);

    let store = Store::open(&config.db_path, config.busy_timeout)
        .with_context(|| format!("Failed to open database {:?}", config.db_path))?;
    let sink: Arc<dyn NotificationSink> = match &config.notify_log_path {
        _ if !config.webhooks.is_empty() => Arc::new(
            WebhookSink::new(config.webhooks.clone(), webhook::DEFAULT_TIMEOUT)
                .context("Failed to build webhook client")?,
        ),
        Some(path) => Arc::new(
            JsonLinesSink::open(path).with_context(|| format!("Failed to open notification log {:?}", path))?,
        ),
        None => Arc::new(LogSink),
    };
    let (notifier, notify_handle) = Notifier::background(sink, config.retry_policy());
    let watcher = EscalationWatcher::new(config.thresholds.iter().copied(), config.dedupe);
    let engine = Engine::new(store, watcher, notifier, config.identity());

    let result = run(&engine, args.command);

    // Dropping the engine closes the channel so the worker can flush and exit.
    drop(engine);
    notify_handle
        .join()
        .map_err(|_| anyhow!("Notification worker panicked"))?;

    result
}

fn run(engine: &Engine, command: Command) -> Result<()> {
    match command {
        Command::Init { .. } => Ok(()),
        Command::Vote {
            submission_id,
            ip,
            vote_type,
        } => print_json(&engine.vote(Target::Submission(submission_id), &ip, &vote_type)?),
        Command::CommentVote {
            comment_id,
            ip,
            vote_type,
        } => print_json(&engine.vote(Target::Comment(comment_id), &ip, &vote_type)?),
        Command::Submit {
            tmdb_id,
            title,
            version,
            source,
            ip,
            end_credits_at,
            moving_credits_at,
            username,
            notes,
            scenes,
        } => {
            let submission = NewSubmission {
                movie: NewMovie {
                    tmdb_id,
                    title,
                    release_date: None,
                    runtime: None,
                },
                version_title: version,
                end_credits_at,
                moving_credits_at,
                notes,
                source,
                username,
                scenes: scenes
                    .into_iter()
                    .map(|start_time| NewScene {
                        start_time,
                        ..NewScene::default()
                    })
                    .collect(),
            };
            print_json(&engine.submit(submission, &ip)?)
        }
        Command::Comment {
            movie_id,
            username,
            body,
            ip,
        } => print_json(&engine.comment(movie_id, &username, &body, &ip)?),
        Command::Report {
            kind,
            entity_id,
            reason,
            email,
            ip,
        } => print_json(&engine.file_report(kind, entity_id, &reason, email.as_deref(), &ip)?),
        Command::Delete { kind, id } => {
            let node = match kind {
                NodeKind::Movie => Node::Movie(id),
                NodeKind::Submission => Node::Submission(id),
                NodeKind::Comment => Node::Comment(id),
            };
            print_json(&engine.delete_entity(node)?)
        }
        Command::PurgeIp { ip } => print_json(&engine.purge_ip(&ip)?),
        Command::Reports { limit, offset } => print_json(&engine.list_reports(limit, offset)?),
        Command::ResolveReport { id } => print_json(&engine.resolve_report(id)?),
        Command::RemoveScene { id } => {
            let submission_id = engine.remove_scene(id)?;
            print_json(&serde_json::json!({ "scene_id": id, "submission_id": submission_id }))
        }
        Command::Ban { ip, reason, banned_by } => print_json(&engine.ban_ip(&ip, &reason, &banned_by)?),
        Command::Unban { id } => print_json(&engine.unban(id)?),
        Command::Bans { limit, offset } => print_json(&engine.list_bans(limit, offset)?),
        Command::Stats => print_json(&engine.stats()?),
    }
}
