use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use docmigrate_core::config::{DEFAULT_CONFIG_FILE, EnvVars, load_config};
use docmigrate_core::migrations::{
    BlogOpEdMigration, BlogOpEdOptions, BodyKeyMigration, BodyKeyOptions, EssayMigration,
    LanguageMigration, LanguageOptions, PodcastMigration, PodcastOptions, PublishedAtMigration,
    PublishedAtOptions, TagMigration, TagMigrationOptions, TikTokMigration, TikTokOptions,
    VideoMigration, YouTubeMigration, YouTubeOptions,
};
use docmigrate_core::runner::{DocumentAction, RunContext, RunReport, run_migration};
use docmigrate_core::source::{HttpSource, HttpSourceConfig};
use docmigrate_core::store::{SanityClient, SanityClientConfig};
use log::{LevelFilter, info};

#[derive(Debug, Parser)]
#[command(
    name = "docmigrate",
    version,
    about = "Batch document migrations for a hosted content store (dry-run unless DRY_RUN is exactly `false`)"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[arg(long, global = true, help = "Print the run report as JSON")]
    json: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Commands {
    #[command(about = "Turn string tags into tag references (TAG_DOCUMENT_TYPES)")]
    Tags,
    #[command(about = "Wrap scalar language values in a list (LANGUAGE_DOCUMENT_TYPES)")]
    Language,
    #[command(name = "published-at", about = "Backfill publishedAt from legacy date fields")]
    PublishedAt,
    #[command(
        name = "body-keys",
        about = "Convert text bodies to blocks and fill missing _key values"
    )]
    BodyKeys,
    #[command(name = "essays-videos", about = "Copy published legacy essays and videos")]
    EssaysVideos,
    #[command(name = "podcast-episodes", about = "Import podcast episodes from RSS")]
    PodcastEpisodes,
    #[command(name = "blog-opeds", about = "Import blog posts from RSS as op-eds")]
    BlogOpeds,
    #[command(
        name = "youtube-vlogs",
        about = "Import YouTube playlist or channel uploads as vlogs"
    )]
    YoutubeVlogs,
    #[command(name = "tiktok-clips", about = "Import TikTok videos as clips")]
    TiktokClips,
}

/// Migrations with their options resolved, ready to run.
enum Job {
    Tags(TagMigrationOptions),
    Language(LanguageOptions),
    PublishedAt(PublishedAtOptions),
    BodyKeys(BodyKeyOptions),
    EssaysVideos,
    Podcast(PodcastOptions),
    BlogOpEds(BlogOpEdOptions),
    YouTube(YouTubeOptions),
    TikTok(TikTokOptions),
}

impl Job {
    fn resolve(command: Commands, env: &EnvVars) -> Result<Self> {
        Ok(match command {
            Commands::Tags => Self::Tags(TagMigrationOptions::from_env(env)?),
            Commands::Language => Self::Language(LanguageOptions::from_env(env)?),
            Commands::PublishedAt => Self::PublishedAt(PublishedAtOptions::from_env(env)?),
            Commands::BodyKeys => Self::BodyKeys(BodyKeyOptions::from_env(env)?),
            Commands::EssaysVideos => Self::EssaysVideos,
            Commands::PodcastEpisodes => Self::Podcast(PodcastOptions::from_env(env)?),
            Commands::BlogOpeds => Self::BlogOpEds(BlogOpEdOptions::from_env(env)?),
            Commands::YoutubeVlogs => Self::YouTube(YouTubeOptions::from_env(env)?),
            Commands::TiktokClips => Self::TikTok(TikTokOptions::from_env(env)?),
        })
    }

    fn run(self, ctx: &mut RunContext<'_>) -> Result<Vec<RunReport>> {
        let report = match self {
            Self::Tags(options) => run_migration(&mut TagMigration::new(options), ctx)?,
            Self::Language(options) => run_migration(&mut LanguageMigration::new(options), ctx)?,
            Self::PublishedAt(options) => {
                run_migration(&mut PublishedAtMigration::new(options), ctx)?
            }
            Self::BodyKeys(options) => run_migration(&mut BodyKeyMigration::new(options), ctx)?,
            Self::EssaysVideos => {
                let essays = run_migration(&mut EssayMigration, ctx)?;
                let videos = run_migration(&mut VideoMigration, ctx)?;
                return Ok(vec![essays, videos]);
            }
            Self::Podcast(options) => run_migration(&mut PodcastMigration::new(options), ctx)?,
            Self::BlogOpEds(options) => run_migration(&mut BlogOpEdMigration::new(options), ctx)?,
            Self::YouTube(options) => run_migration(&mut YouTubeMigration::new(options), ctx)?,
            Self::TikTok(options) => run_migration(&mut TikTokMigration::new(options), ctx)?,
        };
        Ok(vec![report])
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let Some(command) = cli.command else {
        let mut command = Cli::command();
        command.print_help()?;
        println!();
        return Ok(());
    };

    load_dotenv(Path::new("."));
    init_logging();

    let config = load_config(&cli.config)?;
    let env = EnvVars::process();
    let dry_run = env.dry_run();
    let job = Job::resolve(command, &env)?;
    let store_config = SanityClientConfig::resolve(&config, &env)?;
    let source_config = HttpSourceConfig::from_env(&env)?;

    let mut client = SanityClient::new(store_config)?;
    let mut source = HttpSource::new(source_config)?;
    info!(
        "content store {} dataset {} ({})",
        client.config().project_id,
        client.config().dataset,
        if dry_run { "dry-run" } else { "live" }
    );

    let mut ctx = RunContext::new(&mut client, &mut source, dry_run);
    let reports = job.run(&mut ctx)?;

    if cli.json {
        let rendered = if reports.len() == 1 {
            serde_json::to_string_pretty(&reports[0])
        } else {
            serde_json::to_string_pretty(&reports)
        };
        println!("{}", rendered.context("failed to render run report")?);
    } else {
        for report in &reports {
            print_report(report);
        }
    }
    Ok(())
}

/// Neither file overrides a variable that is already set, so the process
/// environment wins over `.env.local`, which wins over `.env`.
const DOTENV_FILES: [&str; 2] = [".env.local", ".env"];

fn load_dotenv(dir: &Path) {
    for name in DOTENV_FILES {
        let _ = dotenvy::from_path(dir.join(name));
    }
}

fn init_logging() {
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .filter_module("reqwest", LevelFilter::Warn)
        .parse_env("RUST_LOG")
        .format_target(false)
        .init();
}

fn print_report(report: &RunReport) {
    let (created, updated) = if report.dry_run {
        ("would_create", "would_update")
    } else {
        ("created", "updated")
    };
    println!("{}", report.migration);
    println!("dry_run: {}", report.dry_run);
    println!("fetched: {}", report.fetched);
    println!("{created}: {}", report.created);
    println!("{updated}: {}", report.updated);
    println!("unchanged: {}", report.unchanged);
    println!("skipped: {}", report.skipped);
    println!("failed: {}", report.failed);
    println!("tags_created: {}", report.tags_created);
    println!("requests: {}", report.request_count);

    let skipped: Vec<_> = report
        .documents
        .iter()
        .filter(|result| result.action == DocumentAction::Skipped)
        .collect();
    if !skipped.is_empty() {
        println!("skipped documents:");
        for result in skipped {
            println!("  - {}: {}", result.id, result.detail);
        }
    }
    if !report.errors.is_empty() {
        println!("errors:");
        for error in &report.errors {
            println!("  - {error}");
        }
    }
    println!();
}
