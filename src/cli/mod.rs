//! Inspection CLI over a file-backed session store.
//!
//! Read-mostly: `reap` is the only command that writes.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::Result;
use crate::clock;
use crate::config::{self, Config};
use crate::core::SessionId;
use crate::runtime::SessionRuntime;
use crate::session::{SessionError, SessionState};
use crate::store::FileSessionStore;

mod render;

// =============================================================================
// Entry + global options
// =============================================================================

#[derive(Parser, Debug)]
#[command(
    name = "duplex-session",
    version,
    about = "Inspect and maintain persisted duplex sessions",
    infer_subcommands = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Machine-readable JSON output.
    #[arg(long, global = true)]
    pub json: bool,

    /// Extra config file layered over the user config.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Session store directory (overrides config).
    #[arg(long, global = true, value_name = "DIR", env = "DUPLEX_STORE_DIR")]
    pub store_dir: Option<PathBuf>,

    /// Debug output (repeat for more).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List stored sessions.
    #[command(alias = "ls")]
    List,

    /// Show one session in full.
    Show(ShowArgs),

    /// Sessions holding received events nobody consumed.
    Pending,

    /// Fail sessions whose peer went silent past the heartbeat timeout.
    Reap(ReapArgs),
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    pub id: String,
}

#[derive(Args, Debug)]
pub struct ReapArgs {
    /// Evaluate timeouts as of this wall-clock time (ms since epoch).
    #[arg(long, value_name = "MS")]
    pub now_ms: Option<u64>,
}

// =============================================================================
// Public API
// =============================================================================

pub fn parse_from<I, T>(args: I) -> Cli
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::parse_from(args)
}

/// Run the CLI (used by bin).
pub fn run(cli: Cli, config: Config) -> Result<()> {
    let store_dir = cli
        .store_dir
        .or_else(|| config.session.store_dir.clone())
        .unwrap_or_else(config::default_store_dir);
    tracing::debug!(store_dir = %store_dir.display(), "opening session store");
    let ctx = Ctx {
        runtime: SessionRuntime::new(FileSessionStore::open(store_dir)?, &config),
        json: cli.json,
    };

    match cli.command {
        Commands::List => handle_list(&ctx),
        Commands::Show(args) => handle_show(&ctx, args),
        Commands::Pending => handle_pending(&ctx),
        Commands::Reap(args) => handle_reap(&ctx, args),
    }
}

// =============================================================================
// Context + handlers
// =============================================================================

struct Ctx {
    runtime: SessionRuntime<FileSessionStore>,
    json: bool,
}

fn handle_list(ctx: &Ctx) -> Result<()> {
    let states = ctx.runtime.sessions()?;
    if ctx.json {
        return print_json(&states);
    }
    println!("{}", render::render_list(&states));
    Ok(())
}

fn handle_show(ctx: &Ctx, args: ShowArgs) -> Result<()> {
    let session_id = SessionId::new(args.id)?;
    let state = ctx
        .runtime
        .session(&session_id)?
        .ok_or(SessionError::UnknownSession { session_id })?;
    if ctx.json {
        return print_json(&state);
    }
    println!("{}", render::render_show(&state));
    Ok(())
}

fn handle_pending(ctx: &Ctx) -> Result<()> {
    let pending: Vec<SessionState> = ctx
        .runtime
        .sessions()?
        .into_iter()
        .filter(|state| !state.receive_state().buffered().is_empty())
        .collect();
    if ctx.json {
        return print_json(&pending);
    }
    println!("{}", render::render_pending(&pending));
    Ok(())
}

fn handle_reap(ctx: &Ctx, args: ReapArgs) -> Result<()> {
    let now_ms = args.now_ms.unwrap_or_else(clock::wall_ms);
    let reaped = ctx.runtime.reap_expired(now_ms)?;
    if ctx.json {
        return print_json(&reaped);
    }
    println!("{}", render::render_reaped(&reaped));
    Ok(())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).map_err(crate::Error::Render)?;
    println!("{out}");
    Ok(())
}
