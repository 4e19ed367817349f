use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use tracing_subscriber::{fmt, EnvFilter};

use covcompare_core::{
    ChangeSummary, Commit, CompareConfig, CompareError, CompareResult, CoverageType, DiffStats,
    LineComparison, OutputFormat, PullRequest, RepoRef, RepoSettings, ReportTotals, SourceFile,
};
use covcompare_engine::cache::SqliteCache;
use covcompare_engine::comparison::{Comparison, ComparisonTotals, ScopedComparison};
use covcompare_engine::file::{FileComparison, FileName, FileTotals};
use covcompare_engine::git::LocalGitProvider;
use covcompare_engine::github::{parse_repo_slug, GitHubProvider};
use covcompare_engine::provider::RepositoryProvider;
use covcompare_engine::pull::PullRequestComparison;
use covcompare_report::store::JsonReportStore;

#[derive(Parser)]
#[command(
    name = "covcompare",
    version,
    about = "Line-by-line coverage comparison between two commits",
    long_about = "covcompare lines up the coverage reports of two commits through the diff\n\
                   between them, and reports coverage that changed where the code did not.\n\n\
                   Reports are read from <reports>/<commit sha>.json.\n\n\
                   Examples:\n  \
                     covcompare files --base main --head HEAD       Per-file summary\n  \
                     covcompare file src/lib.rs --base main --head HEAD  Line view of one file\n  \
                     covcompare pull --pullid 7 --base main --head HEAD  Pull request comparison\n  \
                     covcompare --github octo/repo files --base a1 --head b2  Compare via GitHub"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (default: .covcompare.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        global = true,
        default_value = "text",
        long_help = "Output format for command results.\n\n\
                       Formats:\n  \
                         text  Human-readable summaries (default)\n  \
                         json  Machine-readable JSON with camelCase keys"
    )]
    format: OutputFormat,

    /// Local repository path (default: current directory)
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,

    /// Compare through the GitHub API instead of a local repository (owner/repo)
    #[arg(long, global = true)]
    github: Option<String>,

    /// GitHub token (default: GITHUB_TOKEN env var)
    #[arg(long, global = true)]
    github_token: Option<String>,

    /// Directory holding coverage reports named <commit sha>.json
    #[arg(long, global = true, default_value = ".covcompare/reports")]
    reports: PathBuf,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    verbose: bool,

    /// When to use colors
    #[arg(long, global = true, default_value = "auto")]
    color: ColorChoice,
}

#[derive(Subcommand)]
enum Command {
    /// Summarize every file of the head report
    #[command(long_about = "Summarize every file of the head report.\n\n\
        For each file: diff stats, coverage totals, and the change summary of\n\
        lines whose coverage moved outside the diff. Configured components and\n\
        requested flags get their own totals.\n\n\
        Examples:\n  covcompare files --base main --head HEAD\n  \
        covcompare files --base main --head HEAD --flag unit --format json")]
    Files {
        /// Base revision
        #[arg(long)]
        base: String,

        /// Head revision
        #[arg(long)]
        head: String,

        /// Also report totals restricted to this flag (repeatable)
        #[arg(long)]
        flag: Vec<String>,
    },
    /// Show the line-by-line comparison of one file
    #[command(long_about = "Show the line-by-line comparison of one file.\n\n\
        The head source is fetched so lines outside the diff carry their text.\n\
        Files whose diff exceeds max_diff_size are not rendered unless\n\
        --bypass-max-diff is given.")]
    File {
        /// Path of the file in the head revision
        path: String,

        /// Base revision
        #[arg(long)]
        base: String,

        /// Head revision
        #[arg(long)]
        head: String,

        /// Render lines even when the diff is too large
        #[arg(long)]
        bypass_max_diff: bool,
    },
    /// Compare a pull request, remembering which files changed
    #[command(long_about = "Compare a pull request.\n\n\
        With --compared-to, the report of that older commit stands in for the\n\
        base report (a pseudo-comparison) and is shifted onto the base's line\n\
        numbers when allow_coverage_offsets is set. Files with unexpected\n\
        changes are recorded in the cache so later runs skip the others.")]
    Pull {
        /// Pull request number
        #[arg(long)]
        pullid: u64,

        /// Base revision of the pull request
        #[arg(long)]
        base: String,

        /// Head revision of the pull request
        #[arg(long)]
        head: String,

        /// Older revision whose report replaces the base report
        #[arg(long)]
        compared_to: Option<String>,

        /// Cache database path (default: .covcompare/cache.db)
        #[arg(long, default_value = ".covcompare/cache.db")]
        cache: PathBuf,
    },
    /// Create default configuration
    Init,
    /// Generate shell completion scripts
    #[command(hide = true)]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Clone, PartialEq, Eq, ValueEnum)]
enum ColorChoice {
    /// Auto-detect based on terminal
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

const DEFAULT_CONFIG: &str = r#"# covcompare configuration

[codecov]
# Compare pull requests against an older processed commit when the base has no report
# allow_pseudo_compare = true
# Shift the substituted base report onto the base's line numbers
# allow_coverage_offsets = false
# Diff lines above which a file's line view is withheld
# max_diff_size = 170

# [[codecov.components]]
# component_id = "backend"
# paths = ["src/server/**"]
# flags = ["unit"]

# Per-repository overrides, keyed by service/owner/name
# [repos."github/acme/widgets".codecov]
# allow_pseudo_compare = false
"#;

/// Where diffs and sources come from.
enum Provider {
    Local(LocalGitProvider),
    GitHub(GitHubProvider),
}

impl RepositoryProvider for Provider {
    async fn get_compare(
        &self,
        base_ref: &str,
        head_ref: &str,
    ) -> Result<CompareResult, CompareError> {
        match self {
            Provider::Local(git) => git.get_compare(base_ref, head_ref).await,
            Provider::GitHub(github) => github.get_compare(base_ref, head_ref).await,
        }
    }

    async fn get_source(&self, path: &str, commit_ref: &str) -> Result<SourceFile, CompareError> {
        match self {
            Provider::Local(git) => git.get_source(path, commit_ref).await,
            Provider::GitHub(github) => github.get_source(path, commit_ref).await,
        }
    }
}

struct Workspace {
    provider: Provider,
    repository: RepoRef,
    settings: RepoSettings,
    store: JsonReportStore,
}

impl Workspace {
    fn open(cli: &Cli, config: &CompareConfig) -> Result<Self> {
        let (provider, repository) = match &cli.github {
            Some(slug) => {
                let (owner, name) = parse_repo_slug(slug)?;
                let github = GitHubProvider::new(&owner, &name, cli.github_token.as_deref())?;
                (Provider::GitHub(github), RepoRef::new("github", owner, name))
            }
            None => {
                // Hint: not a git repository
                if git2::Repository::discover(&cli.repo).is_err() {
                    miette::bail!(miette::miette!(
                        help = "Run covcompare inside a git repository, pass --repo, or use --github owner/repo",
                        "Not a git repository: {}",
                        cli.repo.display()
                    ));
                }
                let git = LocalGitProvider::open(&cli.repo)?;
                let name = git
                    .path()
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "repository".into());
                (Provider::Local(git), RepoRef::new("local", "local", name))
            }
        };
        let settings = config.settings_for(&repository);
        tracing::debug!(
            repo = %repository.slug(),
            pseudo = settings.allow_pseudo_compare,
            offsets = settings.allow_coverage_offsets,
            max_diff_size = settings.max_diff_size,
            "resolved settings"
        );
        Ok(Self {
            provider,
            repository,
            settings,
            store: JsonReportStore::new(&cli.reports),
        })
    }

    /// Local revisions resolve to full shas; GitHub refs are passed through.
    fn resolve(&self, rev: &str) -> Result<Commit> {
        match &self.provider {
            Provider::Local(git) => Ok(git.resolve_commit(rev)?),
            Provider::GitHub(_) => Ok(Commit::new(rev)),
        }
    }

    fn comparison(self, base: &str, head: &str) -> Result<Comparison<JsonReportStore, Provider>> {
        let base = self.resolve(base)?;
        let head = self.resolve(head)?;
        Ok(Comparison::new(
            self.repository,
            base,
            head,
            self.settings,
            self.store,
            self.provider,
        ))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FileRow {
    name: FileName,
    stats: Option<DiffStats>,
    totals: FileTotals,
    change_summary: ChangeSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    should_search_for_changes: Option<bool>,
}

impl FileRow {
    fn new(file: &FileComparison<'_>) -> Self {
        Self {
            name: file.name().clone(),
            stats: file.stats(),
            totals: file.totals(),
            change_summary: file.change_summary().clone(),
            should_search_for_changes: file.should_search_for_changes(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FilesOutput {
    base: String,
    head: String,
    totals: ComparisonTotals,
    has_unmerged_base_commits: bool,
    files: Vec<FileRow>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    scoped: Vec<ScopedComparison>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pseudo_comparison: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    aligned_base_report: Option<bool>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FileOutput<'a> {
    name: &'a FileName,
    totals: FileTotals,
    change_summary: &'a ChangeSummary,
    lines: Option<&'a [LineComparison]>,
}

fn short(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}

fn percent(totals: &ReportTotals) -> String {
    match totals.coverage.as_deref().map(str::parse::<f64>) {
        Some(Ok(value)) => format!("{value:.2}%"),
        _ => "-".into(),
    }
}

fn print_files(output: &FilesOutput, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(output).into_diagnostic()?);
        }
        OutputFormat::Text => {
            println!("base {}  head {}", short(&output.base), short(&output.head));
            if output.pseudo_comparison == Some(true) {
                let aligned = if output.aligned_base_report == Some(true) {
                    ", base report aligned"
                } else {
                    ""
                };
                println!("pseudo-comparison{aligned}");
            }
            print!(
                "coverage {} -> {}",
                percent(&output.totals.base),
                percent(&output.totals.head)
            );
            match &output.totals.head.diff {
                Some(patch) => println!("  patch {}", percent(patch)),
                None => println!(),
            }
            if output.has_unmerged_base_commits {
                println!("warning: base has commits not in head");
            }
            println!();

            let width = output
                .files
                .iter()
                .filter_map(|f| f.name.head.as_deref())
                .map(str::len)
                .max()
                .unwrap_or(0);
            for row in &output.files {
                let name = row.name.head.as_deref().unwrap_or("-");
                let stats = match row.stats {
                    Some(s) => format!("+{} -{}", s.added, s.removed),
                    None => String::new(),
                };
                let changes = if row.change_summary.is_empty() {
                    String::new()
                } else {
                    row.change_summary.to_string()
                };
                println!("{name:<width$}  {stats:<9} {changes}");
            }

            if !output.scoped.is_empty() {
                println!();
                for scope in &output.scoped {
                    println!(
                        "{}: {} -> {}",
                        scope.name,
                        percent(&scope.base_totals),
                        percent(&scope.head_totals)
                    );
                }
            }
        }
    }
    Ok(())
}

fn coverage_mark(coverage: Option<CoverageType>, use_color: bool) -> String {
    let (mark, color) = match coverage {
        Some(CoverageType::Hit) => ('H', "32"),
        Some(CoverageType::Miss) => ('M', "31"),
        Some(CoverageType::Partial) => ('P', "33"),
        None => return " ".into(),
    };
    if use_color {
        format!("\x1b[{color}m{mark}\x1b[0m")
    } else {
        mark.to_string()
    }
}

fn print_file(file: &FileComparison<'_>, format: OutputFormat, use_color: bool) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let output = FileOutput {
                name: file.name(),
                totals: file.totals(),
                change_summary: file.change_summary(),
                lines: file.lines(),
            };
            println!("{}", serde_json::to_string_pretty(&output).into_diagnostic()?);
        }
        OutputFormat::Text => {
            let Some(lines) = file.lines() else {
                println!("diff too large to render; pass --bypass-max-diff to show it");
                return Ok(());
            };
            let number = |ln: Option<u32>| ln.map(|n| n.to_string()).unwrap_or_default();
            for line in lines {
                println!(
                    "{:>5} {:>5} {}{} {}",
                    number(line.base_ln),
                    number(line.head_ln),
                    coverage_mark(line.base_coverage, use_color),
                    coverage_mark(line.head_coverage, use_color),
                    line.value.as_deref().unwrap_or(""),
                );
            }
            if !file.change_summary().is_empty() {
                println!("\nchanges outside the diff: {}", file.change_summary());
            }
        }
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "off" };
    let filter =
        EnvFilter::try_from_env("COVCOMPARE_LOG").unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<CompareConfig> {
    match path {
        Some(path) => Ok(CompareConfig::from_file(path)?),
        None => {
            let default_path = Path::new(".covcompare.toml");
            if default_path.exists() {
                Ok(CompareConfig::from_file(default_path)?)
            } else {
                Ok(CompareConfig::default())
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .into_diagnostic()?;
    human_panic::setup_panic!();

    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(cli.config.as_deref())?;

    let use_color = match cli.color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => std::io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    };

    match cli.command {
        None => {
            Cli::command().print_help().into_diagnostic()?;
        }
        Some(Command::Files {
            ref base,
            ref head,
            ref flag,
        }) => {
            let workspace = Workspace::open(&cli, &config)?;
            let components = workspace.settings.components.clone();
            let comparison = workspace.comparison(base, head)?;

            let files = comparison
                .files()
                .await?
                .map(|f| FileRow::new(&f))
                .collect();
            let mut scoped = Vec::new();
            for component in &components {
                scoped.push(comparison.component_comparison(component).await?);
            }
            for flag in flag {
                scoped.push(comparison.flag_comparison(flag).await?);
            }

            let output = FilesOutput {
                base: comparison.base_commit().commitid.clone(),
                head: comparison.head_commit().commitid.clone(),
                totals: comparison.totals().await?,
                has_unmerged_base_commits: comparison.has_unmerged_base_commits().await?,
                files,
                scoped,
                pseudo_comparison: None,
                aligned_base_report: None,
            };
            print_files(&output, cli.format)?;
        }
        Some(Command::File {
            ref path,
            ref base,
            ref head,
            bypass_max_diff,
        }) => {
            let workspace = Workspace::open(&cli, &config)?;
            let comparison = workspace.comparison(base, head)?;
            if comparison.head_report().await?.get(path).is_none() {
                miette::bail!(miette::miette!(
                    help = "Only files present in the head report can be compared",
                    "{path} is not in the head report"
                ));
            }
            let file = comparison
                .get_file_comparison(path, true, bypass_max_diff)
                .await?;
            print_file(&file, cli.format, use_color)?;
        }
        Some(Command::Pull {
            pullid,
            ref base,
            ref head,
            ref compared_to,
            ref cache,
        }) => {
            let workspace = Workspace::open(&cli, &config)?;
            let base = workspace.resolve(base)?;
            let head = workspace.resolve(head)?;
            let compared_to = compared_to
                .as_deref()
                .map(|rev| workspace.resolve(rev))
                .transpose()?;

            let pull = PullRequest {
                repository: workspace.repository.clone(),
                pullid,
                base: base.commitid.clone(),
                head: head.commitid.clone(),
                compared_to: compared_to.as_ref().map(|c| c.commitid.clone()),
            };
            let commits: Vec<Commit> = [Some(base), Some(head), compared_to]
                .into_iter()
                .flatten()
                .collect();
            let cache = SqliteCache::open(cache)?;

            let mut comparison = PullRequestComparison::new(
                pull,
                &commits,
                workspace.settings,
                workspace.store,
                workspace.provider,
                cache,
            )?;
            let aligned = comparison.align_base_report().await?;

            let inner = comparison.comparison();
            let output = FilesOutput {
                base: inner.base_commit().commitid.clone(),
                head: inner.head_commit().commitid.clone(),
                totals: inner.totals().await?,
                has_unmerged_base_commits: inner.has_unmerged_base_commits().await?,
                files: comparison
                    .files()
                    .await?
                    .map(|f| FileRow::new(&f))
                    .collect(),
                scoped: Vec::new(),
                pseudo_comparison: Some(comparison.is_pseudo_comparison()),
                aligned_base_report: Some(aligned),
            };
            print_files(&output, cli.format)?;
        }
        Some(Command::Init) => {
            let path = Path::new(".covcompare.toml");
            if path.exists() {
                miette::bail!(".covcompare.toml already exists");
            }
            std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created .covcompare.toml with default configuration");
        }
        Some(Command::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "covcompare", &mut std::io::stdout());
        }
    }

    Ok(())
}
