mod config;
mod error;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use gateway::AccessGateway;
use policy::{Catalog, Operation, PolicyDef, Principal, Request};
use serde::Serialize;
use storage::{Row, RowKey, SqliteStore};
use tracing_subscriber::EnvFilter;

use config::Config;
use error::{Error, Result};

const CONFIG_FILE: &str = "rowgate.toml";

#[derive(Parser)]
#[command(name = "rowgate")]
#[command(about = "Row-level access control for credential storage", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./rowgate.toml, or the built-in provisioning)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite row store path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Principal to run as
    #[arg(long = "as", global = true, value_name = "PRINCIPAL")]
    principal: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter config with the provisioned tables and policies
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// List tables and their RLS state
    Tables,
    /// List installed policies
    Policies {
        /// Only show policies on this table
        #[arg(short, long)]
        table: Option<String>,
    },
    /// Decide a request without touching the row store
    Check {
        table: String,
        operation: Operation,
        /// New row shape (insert, update), as JSON
        #[arg(long)]
        row: Option<String>,
        /// Current row (select, update, delete), as JSON
        #[arg(long)]
        existing: Option<String>,
    },
    /// Insert a row
    Insert {
        table: String,
        key: String,
        /// Row as a JSON object
        row: String,
    },
    /// Read a row
    Get { table: String, key: String },
    /// Replace a row
    Update {
        table: String,
        key: String,
        /// Row as a JSON object
        row: String,
    },
    /// Delete a row
    Delete { table: String, key: String },
    /// List the rows of a table visible to the principal
    Scan { table: String },
}

fn main() {
    init_tracing();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { force } = cli.command {
        let path = cli.config.unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
        return cmd_init(&path, force);
    }

    let config = load_config(cli.config.as_deref())?;
    let catalog = Arc::new(Catalog::new());
    config.manifest.apply(&catalog)?;

    let principal = cli
        .principal
        .map(Principal::from)
        .unwrap_or_else(|| config.default_principal());

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Tables => cmd_tables(&catalog),
        Commands::Policies { table } => cmd_policies(&catalog, table.as_deref()),
        Commands::Check {
            table,
            operation,
            row,
            existing,
        } => cmd_check(&catalog, &table, operation, &principal, row, existing),
        command => {
            let db_path = db_path(cli.db, &config)?;
            let gateway = AccessGateway::new(catalog, SqliteStore::open(&db_path)?);
            cmd_rows(&gateway, &principal, command)
        }
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(Error::ConfigExists {
            path: path.to_path_buf(),
        });
    }
    std::fs::write(path, Config::starter()?)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn cmd_tables(catalog: &Catalog) -> Result<()> {
    let tables = catalog.schema().tables()?;
    if tables.is_empty() {
        println!("No tables declared.");
        return Ok(());
    }

    println!("{:<24}  {:<4}  COLUMNS", "TABLE", "RLS");
    println!("{}", "-".repeat(60));
    for table in tables {
        let rls = if table.rls_enabled { "on" } else { "off" };
        let columns = table
            .columns
            .map(|c| c.join(", "))
            .unwrap_or_else(|| "*".to_string());
        println!("{:<24}  {:<4}  {columns}", table.name, rls);
    }
    Ok(())
}

fn cmd_policies(catalog: &Catalog, table: Option<&str>) -> Result<()> {
    let policies = match table {
        Some(table) => catalog.policies().policies_on(table)?,
        None => catalog.policies().all()?,
    };
    if policies.is_empty() {
        println!("No policies installed.");
        return Ok(());
    }

    println!(
        "{:<32}  {:<16}  {:<7}  {:<12}  PREDICATES",
        "POLICY", "TABLE", "OP", "TO"
    );
    println!("{}", "-".repeat(100));
    for policy in &policies {
        let def = PolicyDef::from(policy);
        let mut predicates = Vec::new();
        if let Some(using) = &def.using {
            predicates.push(format!("USING ({using})"));
        }
        if let Some(check) = &def.check {
            predicates.push(format!("WITH CHECK ({check})"));
        }
        println!(
            "{:<32}  {:<16}  {:<7}  {:<12}  {}",
            def.name,
            def.table,
            def.operation,
            def.to.join(","),
            predicates.join(" ")
        );
    }
    Ok(())
}

fn cmd_check(
    catalog: &Catalog,
    table: &str,
    operation: Operation,
    principal: &Principal,
    row: Option<String>,
    existing: Option<String>,
) -> Result<()> {
    let row = row.as_deref().map(|s| parse_row("--row", s)).transpose()?;
    let existing = existing
        .as_deref()
        .map(|s| parse_row("--existing", s))
        .transpose()?;

    let mut request = Request::new(table, operation, principal);
    request.candidate = row.as_ref();
    request.existing = existing.as_ref();

    let decision = catalog.authorize(&request)?;
    print_json(&decision)
}

fn cmd_rows(
    gateway: &AccessGateway<SqliteStore>,
    principal: &Principal,
    command: Commands,
) -> Result<()> {
    match command {
        Commands::Insert { table, key, row } => {
            gateway.insert(&table, principal, &RowKey::new(key), &parse_row("row", &row)?)?;
            println!("inserted");
        }
        Commands::Get { table, key } => match gateway.select(&table, principal, &RowKey::new(key))? {
            Some(row) => print_json(&row)?,
            None => println!("not found"),
        },
        Commands::Update { table, key, row } => {
            gateway.update(&table, principal, &RowKey::new(key), &parse_row("row", &row)?)?;
            println!("updated");
        }
        Commands::Delete { table, key } => {
            gateway.delete(&table, principal, &RowKey::new(key))?;
            println!("deleted");
        }
        Commands::Scan { table } => {
            let rows: serde_json::Map<String, serde_json::Value> = gateway
                .scan(&table, principal)?
                .into_iter()
                .map(|(key, row)| (key.0, row.into_value()))
                .collect();
            print_json(&rows)?;
        }
        Commands::Init { .. } | Commands::Tables | Commands::Policies { .. } | Commands::Check { .. } => {}
    }
    Ok(())
}

fn parse_row(what: &'static str, json: &str) -> Result<Row> {
    let value: serde_json::Value = serde_json::from_str(json).map_err(|e| Error::InvalidRow {
        what,
        reason: e.to_string(),
    })?;
    Row::try_from(value).map_err(|other| Error::InvalidRow {
        what,
        reason: format!("got {other}"),
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        return Ok(Config::load(path)?);
    }

    let default_path = Path::new(CONFIG_FILE);
    if default_path.exists() {
        tracing::debug!(path = CONFIG_FILE, "loading config");
        Ok(Config::load(default_path)?)
    } else {
        tracing::debug!("no config file, using provisioned defaults");
        Ok(Config::default_config())
    }
}

fn db_path(explicit: Option<PathBuf>, config: &Config) -> Result<PathBuf> {
    if let Some(path) = explicit.or_else(|| config.store.path.clone()) {
        return Ok(path);
    }

    let data_dir = dirs_data_dir().unwrap_or_else(|| ".rowgate".into());
    std::fs::create_dir_all(&data_dir)?;
    Ok(data_dir.join("rows.db"))
}

fn dirs_data_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share/rowgate"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
            .map(|p| p.join("rowgate"))
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|h| PathBuf::from(h).join("rowgate"))
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        None
    }
}
