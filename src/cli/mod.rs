#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context as _;
use clap::{ArgAction, CommandFactory as _, Parser, Subcommand};

use crate::config::{self, Config};
use crate::core::context::ContextResolver;
use crate::core::discovery::{self, WorktreeInfo};
use crate::core::git::Git;
use crate::core::paths::{self, WorktreeRef, parse_loose_branch_ref};
use crate::core::resolve::resolve_branch;
use crate::mux::layout::{Layout, normalize};
use crate::mux::{self, AttachOptions, MuxBackend, SessionManager, SessionTarget, zellij};
use crate::output::table::Table;

#[derive(Debug, Parser)]
#[command(
    name = "ghwt",
    version,
    about = "Worktree hierarchy and terminal multiplexer sessions"
)]
pub struct Cli {
    /// Config file (default: ~/.config/ghwt/config.toml, or $GHWT_CONFIG)
    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,
    /// More log output on stderr (-v info, -vv debug); RUST_LOG overrides
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List worktrees under the configured root
    #[command(alias = "ls")]
    List(ListArgs),
    /// Print the directory of a worktree
    Path(RefArgs),
    /// Print the note file of a worktree
    Note(RefArgs),
    /// Show the worktree the current directory belongs to
    Context(ContextArgs),
    /// Resolve a bare branch name or PR number to `branch/...` or `pr/...`
    Resolve(ResolveArgs),
    /// Manage the multiplexer session of a worktree
    Session(SessionArgs),
    Config(ConfigArgs),
    Completion(CompletionArgs),
    Version,
}

#[derive(Debug, Parser)]
pub struct ListArgs {
    /// Only this project
    pub project: Option<String>,
    /// Case-insensitive substring filter
    #[arg(short = 'f', long = "filter")]
    pub filter: Option<String>,
    /// Output in JSON format
    #[arg(long = "json", conflicts_with = "csv")]
    pub json: bool,
    /// Output in CSV format
    #[arg(long = "csv")]
    pub csv: bool,
}

#[derive(Debug, Parser)]
pub struct RefArgs {
    pub project: String,
    /// Branch ref: `branch/x`, `pr/12`, `feature/x`, a bare name or a PR number
    #[arg(value_name = "REF")]
    pub reference: String,
}

#[derive(Debug, Parser)]
pub struct ContextArgs {
    #[arg(long = "json")]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct ResolveArgs {
    pub project: String,
    pub name: String,
}

#[derive(Debug, Parser)]
pub struct SessionArgs {
    #[command(subcommand)]
    pub cmd: SessionCmd,
}

#[derive(Debug, Subcommand)]
pub enum SessionCmd {
    /// Create the session if it does not exist
    Up(SessionUpArgs),
    /// Attach the current terminal
    Attach(TargetArgs),
    /// Kill the session (no-op when absent)
    Kill(TargetArgs),
    /// Exit 0 when the session is running, 1 otherwise
    Status(TargetArgs),
    /// Open the session in a new terminal window
    Ui(TargetArgs),
    /// Print the normalized layout
    Layout(SessionLayoutArgs),
}

/// Project and branch of the worktree; both default to the current directory's.
#[derive(Debug, Parser)]
pub struct TargetArgs {
    pub project: Option<String>,
    #[arg(requires = "project")]
    pub branch: Option<String>,
}

#[derive(Debug, Parser)]
pub struct SessionUpArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Attach after creating
    #[arg(short = 'a', long = "attach")]
    pub attach: bool,
}

#[derive(Debug, Parser)]
pub struct SessionLayoutArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Print the zellij KDL document instead of YAML
    #[arg(long = "kdl")]
    pub kdl: bool,
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
    List,
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

/// Everything taken from the process environment, read once at startup.
#[derive(Debug, Clone, Default)]
struct Invocation {
    config_path: Option<PathBuf>,
    inside_tmux: bool,
    inside_zellij: bool,
}

impl Invocation {
    fn from_env(cli_config: Option<PathBuf>) -> Self {
        let config_path = cli_config.or_else(|| {
            std::env::var_os("GHWT_CONFIG")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        });
        Self {
            config_path,
            inside_tmux: std::env::var_os("TMUX").is_some_and(|v| !v.is_empty()),
            inside_zellij: std::env::var_os("ZELLIJ").is_some(),
        }
    }

    fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    fn inside(&self, backend: MuxBackend) -> bool {
        match backend {
            MuxBackend::Tmux => self.inside_tmux,
            MuxBackend::Zellij => self.inside_zellij,
        }
    }
}

pub async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let inv = Invocation::from_env(cli.config.clone());

    let result = run(cli, &inv).await;
    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(1)
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .target(env_logger::Target::Stderr)
        .init();
}

async fn run(cli: Cli, inv: &Invocation) -> anyhow::Result<ExitCode> {
    match cli.cmd {
        Commands::Completion(args) => {
            let mut cmd = Cli::command();
            clap_complete::generate(args.shell, &mut cmd, "ghwt", &mut std::io::stdout());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config(args) => cmd_config(args, inv),
        Commands::List(args) => cmd_list(args, inv).await,
        Commands::Path(args) => cmd_path(&args, inv).await,
        Commands::Note(args) => cmd_note(&args, inv).await,
        Commands::Context(args) => cmd_context(&args, inv).await,
        Commands::Resolve(args) => cmd_resolve(&args, inv).await,
        Commands::Session(args) => cmd_session(args, inv).await,
        Commands::Version => Ok(cmd_version()),
    }
}

async fn load_cfg(inv: &Invocation) -> anyhow::Result<Config> {
    let path = inv.config_path.clone();
    let cfg = tokio::task::spawn_blocking(move || -> anyhow::Result<Config> {
        let (cfg, _paths) = config::load(path.as_deref())?;
        Ok(cfg)
    })
    .await??;
    Ok(cfg)
}

fn cmd_config(args: ConfigArgs, inv: &Invocation) -> anyhow::Result<ExitCode> {
    match args.cmd {
        ConfigCmd::List => {
            print!("{}", config::list_resolved_toml(inv.config_path())?);
        }
        ConfigCmd::Set(set) => {
            let paths = config::default_paths(inv.config_path())?;
            config::set_value_string_at_path(&paths.config_file, &set.key, &set.value)?;
            println!("Set {} = {}", set.key, set.value);
        }
        ConfigCmd::Get(get) => {
            let paths = config::default_paths(inv.config_path())?;
            match config::get_value_string_at_path(&paths.config_file, &get.key)? {
                Some(v) => println!("{v}"),
                None => anyhow::bail!(
                    "configuration key '{}' not found - use 'ghwt config list' to see available keys",
                    get.key
                ),
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_list(args: ListArgs, inv: &Invocation) -> anyhow::Result<ExitCode> {
    let cfg = load_cfg(inv).await?;
    let root = cfg.worktrees_root()?;
    let project = args.project.clone();
    let worktrees = tokio::task::spawn_blocking(move || {
        discovery::list_worktrees(&root, project.as_deref())
    })
    .await?;

    let shown: Vec<&WorktreeInfo> = match args.filter.as_deref() {
        Some(pattern) => discovery::filter_worktrees(&worktrees, pattern),
        None => worktrees.iter().collect(),
    };

    if args.json {
        let mut out = serde_json::to_string_pretty(&shown)?;
        out.push('\n');
        print!("{out}");
        return Ok(ExitCode::SUCCESS);
    }

    let mut table = Table::new(["PROJECT", "BRANCH", "PATH"]);
    for wt in &shown {
        table.row([
            wt.project.clone(),
            wt.branch.clone(),
            config::tilde_path(&wt.path),
        ]);
    }
    if args.csv {
        table.write_csv()?;
    } else if shown.is_empty() {
        eprintln!("No worktrees found under {}", cfg.paths.worktrees_root);
    } else {
        table.print()?;
    }
    Ok(ExitCode::SUCCESS)
}

/// Resolves a user-supplied ref against what exists on disk, then parses it.
fn worktree_ref(root: &Path, project: &str, raw: &str) -> WorktreeRef {
    let resolved = resolve_branch(root, project, raw);
    WorktreeRef::new(project, parse_loose_branch_ref(&resolved))
}

async fn cmd_path(args: &RefArgs, inv: &Invocation) -> anyhow::Result<ExitCode> {
    let cfg = load_cfg(inv).await?;
    let root = cfg.worktrees_root()?;
    let wt = worktree_ref(&root, &args.project, &args.reference);
    let path = wt.path(&root);
    if !paths::is_worktree_dir(&path) {
        log::info!("{} is not a worktree (yet)", path.display());
    }
    println!("{}", path.display());
    Ok(ExitCode::SUCCESS)
}

async fn cmd_note(args: &RefArgs, inv: &Invocation) -> anyhow::Result<ExitCode> {
    let cfg = load_cfg(inv).await?;
    let root = cfg.worktrees_root()?;
    let vault = cfg.vault_root()?;
    let wt = worktree_ref(&root, &args.project, &args.reference);
    println!(
        "{}",
        paths::note_path(&vault, &wt.project, &wt.branch()).display()
    );
    Ok(ExitCode::SUCCESS)
}

async fn cmd_context(args: &ContextArgs, inv: &Invocation) -> anyhow::Result<ExitCode> {
    let cfg = load_cfg(inv).await?;
    let resolver = ContextResolver::new(cfg.worktrees_root()?, Git::default());
    let ctx = resolver.current_context().await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&ctx)?);
    } else {
        println!("project: {}", ctx.project);
        println!("branch:  {}", ctx.branch);
        println!("path:    {}", ctx.path.display());
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_resolve(args: &ResolveArgs, inv: &Invocation) -> anyhow::Result<ExitCode> {
    let cfg = load_cfg(inv).await?;
    let root = cfg.worktrees_root()?;
    println!("{}", resolve_branch(&root, &args.project, &args.name));
    Ok(ExitCode::SUCCESS)
}

async fn cmd_session(args: SessionArgs, inv: &Invocation) -> anyhow::Result<ExitCode> {
    let cfg = load_cfg(inv).await?;
    let manager = mux::build(&cfg.session);
    let backend = manager.backend();

    match args.cmd {
        SessionCmd::Up(up) => {
            let target = session_target(&cfg, &up.target).await?;
            let layout = load_layout(&cfg, &target)?;
            let name = mux::open_session(manager.as_ref(), &target, &layout)?;
            println!("{name}");
            if up.attach {
                attach(manager.as_ref(), &cfg, inv, &name, &target)?;
            }
        }
        SessionCmd::Attach(t) => {
            let target = session_target(&cfg, &t).await?;
            attach(manager.as_ref(), &cfg, inv, &target.session_name(), &target)?;
        }
        SessionCmd::Kill(t) => {
            let target = session_target(&cfg, &t).await?;
            manager.kill(&target.session_name())?;
        }
        SessionCmd::Status(t) => {
            let target = session_target(&cfg, &t).await?;
            let name = target.session_name();
            if manager.exists(&name)? {
                println!("{name}: running ({backend})");
            } else {
                println!("{name}: not running");
                return Ok(ExitCode::from(1));
            }
        }
        SessionCmd::Ui(t) => {
            let target = session_target(&cfg, &t).await?;
            manager.launch_ui(&target.session_name(), &target.worktree_path)?;
        }
        SessionCmd::Layout(l) => {
            let target = session_target(&cfg, &l.target).await?;
            let layout = load_layout(&cfg, &target)?;
            if l.kdl {
                let mode = layout.zellij_ui.unwrap_or(cfg.session.zellij_ui);
                print!(
                    "{}",
                    zellij::render_layout(&layout, &target.template_vars(), mode, &cfg.session.shell)
                );
            } else {
                print!("{}", serde_yaml::to_string(&layout)?);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn attach(
    manager: &dyn SessionManager,
    cfg: &Config,
    inv: &Invocation,
    name: &str,
    target: &SessionTarget,
) -> anyhow::Result<()> {
    let opts = AttachOptions {
        wrapper: cfg.session.wrapper_argv(),
        inside_multiplexer: inv.inside(manager.backend()),
    };
    manager.attach(name, &target.worktree_path, &opts)?;
    Ok(())
}

fn load_layout(cfg: &Config, target: &SessionTarget) -> anyhow::Result<Layout> {
    let dir = cfg.session_config_dir()?;
    let session_config = config::session::load_for_project(&dir, &target.project)?;
    Ok(normalize(&session_config)?)
}

/// The worktree named on the command line, or the one the cwd is inside.
async fn session_target(cfg: &Config, args: &TargetArgs) -> anyhow::Result<SessionTarget> {
    let root = cfg.worktrees_root()?;
    match (&args.project, &args.branch) {
        (Some(project), Some(raw)) => {
            let resolved = resolve_branch(&root, project, raw);
            let info = discovery::find_worktree(&root, project, &resolved).with_context(|| {
                format!(
                    "no worktree for '{project}' '{raw}' (looked for {})",
                    worktree_ref(&root, project, raw).path(&root).display()
                )
            })?;
            Ok(SessionTarget {
                project: info.project,
                branch: info.branch,
                worktree_path: info.path,
            })
        }
        (None, None) => {
            let ctx = ContextResolver::new(root, Git::default())
                .current_context()
                .await?;
            Ok(SessionTarget {
                project: ctx.project,
                branch: ctx.branch,
                worktree_path: ctx.path,
            })
        }
        _ => anyhow::bail!(
            "give both <PROJECT> and <BRANCH>, or neither to use the current worktree"
        ),
    }
}

fn cmd_version() -> ExitCode {
    println!("ghwt version {}", env!("CARGO_PKG_VERSION"));
    println!("  rust: {}", rustc_version_runtime::version());
    println!(
        "  os/arch: {}/{}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    ExitCode::SUCCESS
}
