use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use epic_cluster::ReferenceExtractor;
use epic_embeddings::EmbeddingMode;
use epic_pipeline::{
    parse_issues, IssueClusterer, IssueSource, JsonFileSource, MemorySource, PipelineConfig,
};
use epic_protocol::{ClusteringResult, PublishedIssue, RepoRef};
use std::env;
use std::fs;
use std::io::{self, Read};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

mod github;
#[cfg(test)]
mod test_support;

use github::{GitHubClient, NewIssue, DEFAULT_API_URL};

#[derive(Parser)]
#[command(name = "issue-epics")]
#[command(about = "Cluster GitHub issues and draft an epic per cluster", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for JSON)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Cluster an exported issue list and synthesize one epic per cluster
    Cluster(ClusterArgs),

    /// Print the issue numbers referenced by a piece of text
    Refs(RefsArgs),

    /// Create the epic of one cluster as a GitHub issue
    Publish(PublishArgs),

    /// Print the JSON schema of the `cluster` output
    Schema,
}

#[derive(Args)]
struct ClusterArgs {
    /// Repository as owner/name or a github.com URL
    #[arg(long)]
    repo: String,

    /// Issue JSON file (array, or object with an `issues` array); `-` reads stdin
    #[arg(long)]
    input: PathBuf,

    /// Number of clusters (default: chosen by silhouette score)
    #[arg(long)]
    clusters: Option<NonZeroUsize>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the embedding backend
    #[arg(long, value_enum)]
    embed_mode: Option<EmbedMode>,

    /// Override the embedding model id
    #[arg(long)]
    embed_model: Option<String>,

    /// Model directory (overrides EPIC_MODEL_DIR)
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Only count explicit references (URLs, owner/name#N, task lists)
    #[arg(long)]
    strict_refs: bool,

    /// Write the result here instead of stdout
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Pretty-print JSON
    #[arg(long)]
    pretty: bool,
}

#[derive(Args)]
struct RefsArgs {
    /// Repository as owner/name or a github.com URL
    #[arg(long)]
    repo: String,

    /// Text to scan; stdin when omitted
    text: Option<String>,

    /// Only count explicit references (URLs, owner/name#N, task lists)
    #[arg(long)]
    strict_refs: bool,
}

#[derive(Args)]
struct PublishArgs {
    /// Output of `issue-epics cluster`
    #[arg(long)]
    result: PathBuf,

    /// Cluster id whose epic is published
    #[arg(long)]
    cluster: usize,

    /// Print the request instead of sending it
    #[arg(long)]
    dry_run: bool,

    /// GitHub REST API base URL
    #[arg(long, default_value = DEFAULT_API_URL)]
    api_url: String,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum EmbedMode {
    Auto,
    Semantic,
    BagOfWords,
}

impl From<EmbedMode> for EmbeddingMode {
    fn from(mode: EmbedMode) -> Self {
        match mode {
            EmbedMode::Auto => Self::Auto,
            EmbedMode::Semantic => Self::Semantic,
            EmbedMode::BagOfWords => Self::BagOfWords,
        }
    }
}

fn print_stdout(text: &str) -> Result<()> {
    use std::io::Write;

    let mut stdout = io::stdout().lock();
    if let Err(err) = stdout
        .write_all(text.as_bytes())
        .and_then(|_| stdout.write_all(b"\n"))
        .and_then(|_| stdout.flush())
    {
        if err.kind() == io::ErrorKind::BrokenPipe {
            return Ok(());
        }
        return Err(err.into());
    }
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<String> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(text)
}

fn read_stdin() -> Result<String> {
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .context("Failed to read stdin")?;
    Ok(buf)
}

fn init_logging(cli: &Cli) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    // ORT logs every session option at info
    if !cli.verbose {
        builder.filter_module("ort", log::LevelFilter::Off);
    }
    builder.target(env_logger::Target::Stderr).init();
}

pub async fn main_entry() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    match cli.command {
        Commands::Cluster(args) => run_cluster(args).await,
        Commands::Refs(args) => run_refs(args),
        Commands::Publish(args) => run_publish(args).await,
        Commands::Schema => {
            let schema = schemars::schema_for!(ClusteringResult);
            print_stdout(&serde_json::to_string_pretty(&schema)?)
        }
    }
}

fn parse_repo(raw: &str) -> Result<RepoRef> {
    RepoRef::parse(raw).with_context(|| format!("Invalid --repo '{raw}'"))
}

fn cluster_config(args: &ClusterArgs) -> Result<PipelineConfig> {
    let mut config =
        PipelineConfig::load(args.config.as_deref()).context("Invalid configuration")?;
    if let Some(mode) = args.embed_mode {
        config.embedding.mode = mode.into();
    }
    if let Some(model) = &args.embed_model {
        config.embedding.model.clone_from(model);
    }
    if let Some(dir) = &args.model_dir {
        config.embedding.model_dir = Some(dir.clone());
    }
    if args.strict_refs {
        config.references.include_loose_hash = false;
    }
    Ok(config)
}

async fn run_cluster(args: ClusterArgs) -> Result<()> {
    let repo = parse_repo(&args.repo)?;
    let config = cluster_config(&args)?;
    let clusterer = IssueClusterer::from_config(&config);

    let source: Box<dyn IssueSource> = if args.input == Path::new("-") {
        let issues = parse_issues(&read_stdin()?).context("Invalid issue JSON on stdin")?;
        Box::new(MemorySource::new(issues))
    } else {
        Box::new(JsonFileSource::new(&args.input))
    };
    let result = clusterer
        .run_from_source(source.as_ref(), &repo, args.clusters)
        .await
        .with_context(|| format!("Failed to load issues for {repo}"))?;

    let text = to_json(&result, args.pretty)?;
    match &args.output {
        Some(path) => {
            fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!(
                "Wrote {} clusters for {} issues to {}",
                result.clusters.len(),
                result.issues.len(),
                path.display()
            );
        }
        None => print_stdout(&text)?,
    }
    Ok(())
}

fn run_refs(args: RefsArgs) -> Result<()> {
    let repo = parse_repo(&args.repo)?;
    let mut options = PipelineConfig::load(None)
        .context("Invalid configuration")?
        .reference_options();
    if args.strict_refs {
        options.include_loose_hash = false;
    }
    let text = match args.text {
        Some(text) => text,
        None => read_stdin()?,
    };
    let refs = ReferenceExtractor::new(&repo.owner, &repo.name, options).extract(Some(&text));
    print_stdout(&serde_json::to_string(&refs)?)
}

async fn run_publish(args: PublishArgs) -> Result<()> {
    let raw = fs::read_to_string(&args.result)
        .with_context(|| format!("Failed to read {}", args.result.display()))?;
    let mut result: ClusteringResult = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a clustering result", args.result.display()))?;
    let repo = parse_repo(&result.repository)?;

    let epic = result
        .clusters
        .get(&args.cluster)
        .and_then(|cluster| cluster.epic_issue.as_ref())
        .with_context(|| format!("No epic for cluster {} in {repo}", args.cluster))?;
    let members = result.members(args.cluster);
    let issue = NewIssue::from_epic(epic, &members);

    if args.dry_run {
        let request = serde_json::json!({
            "method": "POST",
            "url": github::issues_endpoint(&args.api_url, &repo),
            "body": issue,
        });
        return print_stdout(&serde_json::to_string_pretty(&request)?);
    }
    if let Some(existing) = &epic.published {
        anyhow::bail!(
            "Epic for cluster {} is already published as #{} ({})",
            args.cluster,
            existing.number,
            existing.url
        );
    }

    let token = env::var("GITHUB_TOKEN")
        .ok()
        .filter(|t| !t.trim().is_empty())
        .context("GITHUB_TOKEN is not set; use --dry-run to preview the request")?;
    let client = GitHubClient::new(&args.api_url, token)?;
    eprintln!("Creating epic '{}' in {repo}...", issue.title);
    let published = client.create_issue(&repo, &issue).await?;
    eprintln!("Created issue #{}: {}", published.number, published.url);

    record_published(&mut result, args.cluster, published.clone())?;
    let text = to_json(&result, raw.trim().contains('\n'))?;
    fs::write(&args.result, text)
        .with_context(|| format!("Failed to update {}", args.result.display()))?;
    print_stdout(&serde_json::to_string(&published)?)
}

/// Stores the created issue on the epic of `cluster`.
fn record_published(
    result: &mut ClusteringResult,
    cluster: usize,
    published: PublishedIssue,
) -> Result<()> {
    let epic = result
        .clusters
        .get_mut(&cluster)
        .and_then(|summary| summary.epic_issue.as_mut())
        .with_context(|| format!("No epic for cluster {cluster}"))?;
    epic.published = Some(published);
    Ok(())
}
