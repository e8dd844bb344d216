use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use reqwest::Url;
use std::path::PathBuf;
use tracing::{info, warn};

use xero_archiver::auth::{
    export_token, import_token, refresh_session, require_token, Authorized, CredentialStore,
    IdentityClient, SqliteCredentialStore,
};
use xero_archiver::config::{self, Config};
use xero_archiver::db;
use xero_archiver::sync::report::render;
use xero_archiver::sync::Archiver;
use xero_archiver::xero::{self, XeroClient};

#[derive(Debug, Parser)]
#[command(author, version, about = "Archive Xero invoices, expenses, receipts and bills")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Credential-store session (defaults to app.session)
    #[arg(long)]
    session: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download paid sales invoices as PDFs
    Invoices,
    /// List paid expense claims
    Expenses,
    /// Download receipts from the Files inbox
    Receipts,
    /// Download bills from the Files inbox
    Bills,
    /// Manage the stored OAuth2 token
    #[command(subcommand)]
    Token(TokenCommand),
    /// Forget the stored token
    Logout,
}

#[derive(Debug, Subcommand)]
enum TokenCommand {
    /// Print the stored token
    Show,
    /// Store a token read from a JSON file
    Import { path: PathBuf },
    /// Write the stored token to a JSON file
    Export { path: PathBuf },
    /// Exchange the refresh token for a new token
    Refresh,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.database_url());
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let store = SqliteCredentialStore::new(pool.clone());
    let session = args.session.clone().unwrap_or_else(|| cfg.app.session.clone());

    match args.command {
        Command::Token(TokenCommand::Show) => {
            let out = match store.get(&session).await? {
                Some(token) => render(&token)?,
                None => render(&serde_json::json!({}))?,
            };
            println!("{}", out);
        }
        Command::Token(TokenCommand::Import { path }) => {
            import_token(&store, &session, &path).await?;
        }
        Command::Logout => {
            store.clear(&session).await?;
            info!(session = %session, "logged out");
        }
        Command::Token(TokenCommand::Export { path }) => {
            let auth = require_token(&store, &session).await?;
            export_token(&auth, &path).await?;
            info!(path = %path.display(), "token exported");
        }
        Command::Token(TokenCommand::Refresh) => {
            let auth = require_token(&store, &session).await?;
            refresh_session(&store, &identity(&cfg)?, &auth).await?;
        }
        Command::Invoices => run(&store, &cfg, &pool, &session, Run::Invoices).await?,
        Command::Expenses => run(&store, &cfg, &pool, &session, Run::Expenses).await?,
        Command::Receipts => run(&store, &cfg, &pool, &session, Run::Receipts).await?,
        Command::Bills => run(&store, &cfg, &pool, &session, Run::Bills).await?,
    }

    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Run {
    Invoices,
    Expenses,
    Receipts,
    Bills,
}

/// Pass the token gate, resolve the tenant and run one endpoint.
async fn run(
    store: &SqliteCredentialStore,
    cfg: &Config,
    pool: &db::Pool,
    session: &str,
    which: Run,
) -> Result<()> {
    let auth = require_token(store, session).await?;
    let auth = ensure_fresh(store, cfg, auth).await?;
    let api_base = Url::parse(&cfg.xero.api_base).context("invalid xero.api_base")?;
    let tenant_id = match &cfg.xero.tenant_id {
        Some(tenant) => tenant.clone(),
        None => {
            let conns = xero::connections(&api_base, auth.access_token()).await?;
            xero::organisation_tenant(&conns)
                .map(str::to_string)
                .ok_or_else(|| anyhow!("no ORGANISATION tenant connected to this token"))?
        }
    };
    let client = XeroClient::authorized(&auth, tenant_id, api_base)?;
    let archiver = Archiver::new(&client, cfg, &auth);

    let summary = match which {
        Run::Invoices => archiver.invoices(pool).await?,
        Run::Expenses => archiver.expenses().await?,
        Run::Receipts => archiver.receipts().await?,
        Run::Bills => archiver.bills().await?,
    };
    if summary.incomplete {
        warn!(scan = ?summary.scan, "scan ended before reaching the date floor");
    }
    println!("{}", render(&summary)?);
    Ok(())
}

fn identity(cfg: &Config) -> Result<IdentityClient> {
    let base = Url::parse(&cfg.xero.identity_base).context("invalid xero.identity_base")?;
    IdentityClient::new(base, cfg.xero.client_id.clone(), cfg.xero.client_secret.clone())
}

/// Refresh an expired token before a run when a refresh token is available.
async fn ensure_fresh(
    store: &SqliteCredentialStore,
    cfg: &Config,
    auth: Authorized,
) -> Result<Authorized> {
    let token = auth.token();
    if !token.is_expired(Utc::now()) || token.refresh_token.is_none() {
        return Ok(auth);
    }
    info!(session = auth.session_id(), "access token expired; refreshing");
    refresh_session(store, &identity(cfg)?, &auth).await
}
