mod doctor;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{CommandFactory, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use spatia_core::access::AccessLevel;
use spatia_core::anchor::Payload;
use spatia_core::config::AppConfig;
use spatia_core::error::{Result, SpatiaError};
use spatia_core::id::RefId;
use spatia_core::value::{Record, Value};
use spatia_runtime::{
    AbilityTable, ContextRequest, EdgeFilter, EdgeSpec, ExecutionContext, Response,
    SessionManager, TypeTag,
};

const DEFAULT_CONFIG: &str = "spatia.toml";
const CLI_SESSION: &str = "cli";

#[derive(Parser)]
#[command(name = "spatia", version, about = "Data-spatial graph engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the system and public roots if missing
    Bootstrap,
    /// Bind a principal to a fresh root
    Register {
        principal: String,
    },
    /// Attach `count` demo nodes to the caller's root
    Seed {
        /// Acting principal (public root when omitted)
        #[arg(long, short = 'p')]
        principal: Option<String>,
        #[arg(long, default_value = "3")]
        count: usize,
    },
    /// Print the report projection of an entity
    Show {
        /// Reference id, e.g. n::<24 hex digits>
        reference: String,
        #[arg(long, short = 'p')]
        principal: Option<String>,
    },
    /// Walk outgoing edges breadth-first and collect node names
    Walk {
        #[arg(long, short = 'p')]
        principal: Option<String>,
        /// Start node (the caller's root when omitted)
        #[arg(long)]
        entry: Option<String>,
        /// Include walker returns regardless of config
        #[arg(long)]
        returns: bool,
    },
    /// Grant another principal access to an entity
    Grant {
        reference: String,
        /// Principal receiving the grant
        grantee: String,
        /// NO_ACCESS, READ, WRITE or ADMIN
        level: AccessLevel,
        /// Acting principal, must hold ADMIN on the entity
        #[arg(long = "as")]
        acting: Option<String>,
    },
    /// Show current configuration
    Config,
    /// Check storage and root health
    Doctor,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Completions don't need config
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "spatia", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if !cli.config.exists() {
        warn!("No {} found, using defaults", DEFAULT_CONFIG);
    }

    if let Commands::Config = &cli.command {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let storage = spatia_memory::open_store(&config)?;

    if let Commands::Doctor = &cli.command {
        if !doctor::run_doctor(&config, &storage) {
            std::process::exit(1);
        }
        return Ok(());
    }

    let mut runtime = config.runtime.clone();
    if let Commands::Walk { returns: true, .. } = &cli.command {
        runtime.show_returns = true;
    }
    let sessions = Arc::new(SessionManager::new(storage, runtime));

    let response = tokio::task::spawn_blocking(move || dispatch(&sessions, cli.command))
        .await
        .context("command task panicked")?;

    println!("{}", serde_json::to_string_pretty(&response.to_json())?);
    if !response.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }
    if path.as_os_str() == DEFAULT_CONFIG {
        return Ok(AppConfig::default());
    }
    Err(SpatiaError::ConfigNotFound(path.display().to_string()).into())
}

fn request(principal: Option<String>, entry: Option<String>) -> ContextRequest {
    let mut request = match principal {
        Some(name) => ContextRequest::for_principal(name),
        None => ContextRequest::anonymous(),
    };
    if let Some(entry) = entry {
        request = request.at(entry);
    }
    request
}

fn dispatch(sessions: &SessionManager, command: Commands) -> Response {
    match command {
        Commands::Bootstrap => execute(sessions, ContextRequest::anonymous(), |ctx| {
            ctx.report(
                Record::new("Roots")
                    .field("system", ctx.system_root())
                    .field("public", ctx.root_id()),
            );
            Ok(Vec::new())
        }),
        Commands::Register { principal } => {
            let root = match sessions.registry().register(&principal) {
                Ok(root) => root,
                Err(e) => return Response::error(&e),
            };
            info!(principal = %principal, root = %root, "Principal registered");
            execute(sessions, ContextRequest::for_principal(principal), |ctx| {
                ctx.report(Value::Entity(ctx.root_id()));
                Ok(Vec::new())
            })
        }
        Commands::Seed { principal, count } => {
            execute(sessions, request(principal, None), move |ctx| {
                seed(ctx, count)?;
                Ok(Vec::new())
            })
        }
        Commands::Show {
            reference,
            principal,
        } => {
            let id: RefId = match reference.parse() {
                Ok(id) => id,
                Err(e) => return Response::error(&e),
            };
            execute(sessions, request(principal, None), move |ctx| {
                ctx.report(Value::Entity(id));
                Ok(Vec::new())
            })
        }
        Commands::Walk {
            principal, entry, ..
        } => execute(sessions, request(principal, entry), |ctx| {
            let outcome = ctx.run_walker(Payload::new("Explorer"), &explorer())?;
            ctx.report(
                Record::new("WalkSummary")
                    .field("walker", outcome.walker)
                    .field("status", format!("{:?}", outcome.status))
                    .field("visited", outcome.visited.len()),
            );
            Ok(outcome.returns)
        }),
        Commands::Grant {
            reference,
            grantee,
            level,
            acting,
        } => {
            let target: RefId = match reference.parse() {
                Ok(id) => id,
                Err(e) => return Response::error(&e),
            };
            let grantee_root = match sessions.registry().resolve(&grantee) {
                Ok(Some(root)) => root,
                Ok(None) => {
                    return Response::error(&SpatiaError::NotFound(format!(
                        "principal {}",
                        grantee
                    )))
                }
                Err(e) => return Response::error(&e),
            };
            execute(sessions, request(acting, None), move |ctx| {
                if ctx.grant(target, grantee_root, level)? {
                    ctx.report(Value::Entity(target));
                }
                Ok(Vec::new())
            })
        }
        Commands::Config | Commands::Doctor | Commands::Completions { .. } => {
            unreachable!("handled before dispatch")
        }
    }
}

/// Open a context, run `body`, build the response and close the context.
fn execute<F>(sessions: &SessionManager, request: ContextRequest, body: F) -> Response
where
    F: FnOnce(&mut ExecutionContext) -> Result<Vec<Value>>,
{
    if let Err(e) = sessions.open(CLI_SESSION, request) {
        return Response::error(&e);
    }
    let response = sessions.with_context(CLI_SESSION, |ctx| {
        let returns = body(ctx)?;
        ctx.response(returns)
    });
    let closed = sessions.close(CLI_SESSION);
    match (response, closed) {
        (Ok(response), Ok(stats)) => {
            info!(
                written = stats.written,
                unchanged = stats.unchanged,
                deleted = stats.deleted,
                "Changes committed"
            );
            response
        }
        (Err(e), _) | (Ok(_), Err(e)) => Response::error(&e),
    }
}

fn seed(ctx: &mut ExecutionContext, count: usize) -> Result<()> {
    let root = ctx.root_id();
    for i in 0..count {
        let node = ctx.spawn_node(Payload::new("Spot").with("name", format!("spot-{}", i)))?;
        if ctx.connect(root, node, EdgeSpec::new("Path"))?.is_some() {
            ctx.report(Value::Entity(node));
        }
    }
    Ok(())
}

/// Breadth-first explorer returning every named node it enters.
fn explorer() -> AbilityTable {
    let mut table = AbilityTable::new();
    table.on_entry(TypeTag::Any, |step| {
        if let Some(name) = step.node()?.and_then(|p| p.get("name").cloned()) {
            step.ret(name);
        }
        step.visit_edges(&EdgeFilter::outgoing())?;
        Ok(())
    });
    table
}
