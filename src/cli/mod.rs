#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context as _;
use clap::{CommandFactory as _, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::{self, Config, ConfigFile};
use crate::core::cache::StatusCache;
use crate::core::git::Git;
use crate::core::naming::parse_origin_url;
use crate::core::reconcile::{BranchStatus, Reconciler};
use crate::core::worktree::{Worktree, find_one};
use crate::output::records::{self, build_records};
use crate::output::table::{Align, Table};
use crate::review::Disabled;
use crate::review::gh::GhCli;

#[derive(Debug, Parser)]
#[command(
    name = "wtpr",
    version,
    about = "Git worktrees and the review status of their branches"
)]
pub struct Cli {
    /// Log debug output to stderr
    #[arg(long = "debug", global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub cmd: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(alias = "ls")]
    List(ListArgs),
    Path(PathArgs),
    #[command(alias = "rm")]
    Remove(RemoveArgs),
    Cache(CacheArgs),
    Config(ConfigArgs),
    Completion(CompletionArgs),
    Version,
}

#[derive(Debug, Default, Parser)]
pub struct ListArgs {
    /// Output in JSON format
    #[arg(long = "json", conflicts_with = "csv")]
    pub json: bool,
    /// Output as CSV
    #[arg(long = "csv")]
    pub csv: bool,
    /// Skip review status lookups
    #[arg(long = "no-status")]
    pub no_status: bool,
    /// Show head commit and path
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

#[derive(Debug, Parser)]
pub struct PathArgs {
    /// Worktree directory name or branch
    pub name: String,
}

#[derive(Debug, Parser)]
pub struct RemoveArgs {
    /// Remove even with uncommitted changes
    #[arg(short = 'f', long = "force")]
    pub force: bool,
    /// Also delete the branch after removing the worktree
    #[arg(short = 'b', long = "delete-branch")]
    pub delete_branch: bool,
    /// Worktree name, branch or path fragment
    pub pattern: String,
}

#[derive(Debug, Parser)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub cmd: CacheCmd,
}

#[derive(Debug, Subcommand)]
pub enum CacheCmd {
    /// Print cached branch -> PR numbers
    Show {
        #[arg(long = "json")]
        json: bool,
    },
    /// Delete the status cache file
    Clear,
}

#[derive(Debug, Parser)]
pub struct CompletionArgs {
    pub shell: clap_complete::Shell,
}

#[derive(Debug, Parser)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub cmd: ConfigCmd,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCmd {
    /// Print every setting, defaults included
    List,
    /// Print the config file location
    Path,
    Set(ConfigSetArgs),
    Get(ConfigGetArgs),
}

#[derive(Debug, Parser)]
pub struct ConfigSetArgs {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Parser)]
pub struct ConfigGetArgs {
    pub key: String,
}

pub fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(1)
        }
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("WTPR_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .try_init();
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.cmd {
        None => cmd_list(&ListArgs::default()),
        Some(Commands::List(args)) => cmd_list(&args),
        Some(Commands::Path(args)) => cmd_path(&args),
        Some(Commands::Remove(args)) => cmd_remove(&args),
        Some(Commands::Cache(args)) => cmd_cache(&args),
        Some(Commands::Completion(args)) => {
            let mut cmd = Cli::command();
            clap_complete::generate(args.shell, &mut cmd, "wtpr", &mut std::io::stdout());
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::Config(args)) => cmd_config(args),
        Some(Commands::Version) => Ok(cmd_version()),
    }
}

fn cmd_config(args: ConfigArgs) -> anyhow::Result<ExitCode> {
    let path = config::config_path()?;
    if let ConfigCmd::Path = args.cmd {
        println!("{}", path.display());
        return Ok(ExitCode::SUCCESS);
    }
    let mut file = ConfigFile::open(&path)?;
    match args.cmd {
        ConfigCmd::List => print!("{}", file.render_resolved()?),
        ConfigCmd::Path => {}
        ConfigCmd::Get(get) => match file.get(&get.key) {
            Some(v) => println!("{v}"),
            None => anyhow::bail!(
                "configuration key '{}' not found - use 'wtpr config list' to see available keys",
                get.key
            ),
        },
        ConfigCmd::Set(set) => {
            file.set(&set.key, &set.value)?;
            println!("Set {} = {}", set.key, set.value);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn open_repo() -> anyhow::Result<Git> {
    let cwd = std::env::current_dir().context("failed to get current directory")?;
    Git::ensure_installed(&cwd)?;
    Ok(Git::from_cwd()?)
}

fn cache_location(cfg: &Config, git: &Git) -> anyhow::Result<StatusCache> {
    let dir = git.worktrees_dir()?;
    Ok(StatusCache::for_dir(&dir, &cfg.cache.file_name))
}

/// The cache to read and write during reconciliation, if there is one.
fn open_cache(cfg: &Config, git: &Git) -> Option<StatusCache> {
    if !cfg.cache.enabled {
        return None;
    }
    match cache_location(cfg, git) {
        Ok(cache) => Some(cache),
        Err(e) => {
            tracing::debug!(error = %e, "status cache disabled for this run");
            None
        }
    }
}

fn reconcile_statuses(
    cfg: &Config,
    git: &Git,
    worktrees: &[Worktree],
) -> BTreeMap<String, BranchStatus> {
    let default_branch = git.default_branch();
    let cache = open_cache(cfg, git);
    let cached = cache.as_ref().map(StatusCache::load).unwrap_or_default();

    let result = if cfg.review.enabled {
        let repo = git.remote_url().and_then(|url| parse_origin_url(&url));
        let gh = GhCli::new(
            cfg.review.command.clone(),
            git.repo_root().to_path_buf(),
            repo,
            cfg.review.host.clone(),
        );
        Reconciler::new(git, &gh).reconcile(worktrees, &default_branch, cached)
    } else {
        Reconciler::new(git, &Disabled).reconcile(worktrees, &default_branch, cached)
    };

    if result.cache_changed
        && let Some(cache) = cache
    {
        cache.save(&result.cache);
    }
    result.statuses
}

fn cmd_list(args: &ListArgs) -> anyhow::Result<ExitCode> {
    let cfg = config::load()?;
    let git = open_repo()?;
    let worktrees = git.list_worktrees();

    let statuses = if args.no_status {
        BTreeMap::new()
    } else {
        reconcile_statuses(&cfg, &git, &worktrees)
    };

    if args.json {
        let mut out = serde_json::to_string_pretty(&build_records(&worktrees, &statuses))?;
        out.push('\n');
        print!("{out}");
        return Ok(ExitCode::SUCCESS);
    }

    if worktrees.is_empty() {
        println!("No worktrees found");
        return Ok(ExitCode::SUCCESS);
    }

    let table = worktree_table(&cfg, &worktrees, &statuses, args.verbose);
    if args.csv {
        table.print_csv()?;
    } else {
        table.print()?;
    }
    Ok(ExitCode::SUCCESS)
}

fn worktree_table(
    cfg: &Config,
    worktrees: &[Worktree],
    statuses: &BTreeMap<String, BranchStatus>,
    verbose: bool,
) -> Table {
    let current = std::env::current_dir()
        .ok()
        .and_then(|cwd| current_worktree(worktrees, &cwd));

    let mut t = if verbose {
        Table::new(["NAME", "BRANCH", "STATUS", "PR", "HEAD", "PATH"])
    } else {
        Table::new(["NAME", "BRANCH", "STATUS", "PR"])
    }
    .align("PR", Align::Right);
    for wt in worktrees {
        let marker = if cfg.ui.icons && current == Some(wt.path.as_path()) {
            "● "
        } else {
            "  "
        };
        let status = wt.branch_name().and_then(|b| statuses.get(b));
        let mut row = vec![
            format!("{marker}{}", wt.name()),
            records::branch_cell(wt),
            status.map_or_else(|| "-".to_owned(), |s| records::status_label(s.status).to_owned()),
            status
                .and_then(|s| s.pr_number)
                .map(|n| format!("#{n}"))
                .unwrap_or_default(),
        ];
        if verbose {
            let mut path = wt.path.to_string_lossy().to_string();
            if cfg.ui.tilde_home {
                path = config::tilde_path(&path);
            }
            row.push(wt.head.as_deref().map(truncate_hash).unwrap_or_default());
            row.push(path);
        }
        t.row(row);
    }
    t
}

/// Deepest worktree containing `cwd`.
fn current_worktree<'a>(worktrees: &'a [Worktree], cwd: &Path) -> Option<&'a Path> {
    worktrees
        .iter()
        .map(|wt| wt.path.as_path())
        .filter(|p| cwd.starts_with(p))
        .max_by_key(|p| p.components().count())
}

fn cmd_path(args: &PathArgs) -> anyhow::Result<ExitCode> {
    let git = open_repo()?;
    let worktrees = git.list_worktrees();
    let existing = worktrees
        .iter()
        .find(|wt| wt.name() == args.name || wt.branch_name() == Some(args.name.as_str()));
    let path: PathBuf = match existing {
        Some(wt) => wt.path.clone(),
        None => git.sibling_path(&args.name)?,
    };
    println!("{}", path.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_remove(args: &RemoveArgs) -> anyhow::Result<ExitCode> {
    let cfg = config::load()?;
    let git = open_repo()?;
    let worktrees = git.list_worktrees();
    let wt = find_one(&worktrees, &args.pattern)?;

    let main = git.main_checkout()?;
    if wt.is_bare || wt.path == main {
        anyhow::bail!(
            "refusing to remove the main checkout {}",
            wt.path.display()
        );
    }

    // Run from the main checkout so removing the current worktree works.
    let main_git = Git::new(main);
    main_git.remove_worktree(&wt.path, args.force)?;

    if let Some(branch) = wt.branch_name() {
        if let Some(cache) = open_cache(&cfg, &main_git) {
            cache.forget(branch);
        }
        if args.delete_branch {
            main_git.delete_branch(branch, args.force)?;
        }
    }

    println!("Removed worktree {}", wt.path.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_cache(args: &CacheArgs) -> anyhow::Result<ExitCode> {
    let cfg = config::load()?;
    let git = open_repo()?;
    let cache = cache_location(&cfg, &git)?;

    match args.cmd {
        CacheCmd::Show { json } => {
            let numbers = cache.load();
            if json {
                let mut out = serde_json::to_string_pretty(&numbers)?;
                out.push('\n');
                print!("{out}");
            } else if numbers.is_empty() {
                println!("Status cache is empty ({})", cache.path().display());
            } else {
                let mut t = Table::new(["BRANCH", "PR"]).align("PR", Align::Right);
                for (branch, number) in &numbers {
                    t.row([branch.clone(), format!("#{number}")]);
                }
                t.print()?;
            }
        }
        CacheCmd::Clear => {
            cache.clear()?;
            println!("Cleared {}", cache.path().display());
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_version() -> ExitCode {
    println!("wtpr version {}", env!("CARGO_PKG_VERSION"));
    if let Some(commit) = option_env!("WTPR_GIT_COMMIT") {
        println!("  commit: {commit}");
    }
    println!("  rust: {}", rustc_version_runtime::version());
    println!(
        "  os/arch: {}/{}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    ExitCode::SUCCESS
}

fn truncate_hash(hash: &str) -> String {
    hash.chars().take(8).collect()
}
