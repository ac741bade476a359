//! Graphcache CLI - inspect and edit an object-graph cache from the shell

use clap::{Parser, Subcommand};
use graphcache::codec::{self, Decoder};
use graphcache::config::{self, StoreConfig};
use graphcache::ui::{self, Icons};
use graphcache::{Condition, Literal, Object, ObjectKey, Order, Store};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "graphcache")]
#[command(version)]
#[command(about = "Embedded object-graph cache backed by SQLite")]
#[command(long_about = r#"
Graphcache mirrors graphs of application objects into a local SQLite store.

Example usage:
  graphcache init
  graphcache import --file objects.json
  graphcache find --class Note --eq title=hi --first
  graphcache get --class Note --id n1
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file (defaults to graphcache.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to the database file, overriding the config
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a config file and create the database
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Show row counts per class
    Stats,

    /// Show one object
    Get {
        #[arg(long)]
        class: String,

        #[arg(long)]
        id: String,
    },

    /// Query objects of a class
    Find {
        #[arg(long)]
        class: String,

        /// Equality filter as field=value; repeat to combine with AND
        #[arg(long = "eq", value_name = "FIELD=VALUE")]
        filters: Vec<String>,

        /// Sort by a field
        #[arg(long)]
        order_by: Option<String>,

        /// Sort descending
        #[arg(long, requires = "order_by")]
        desc: bool,

        /// Return only the first match
        #[arg(long)]
        first: bool,

        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Save objects from a JSON file
    Import {
        /// JSON array of {className, objectId, fields} documents
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Remove one object
    Remove {
        #[arg(long)]
        class: String,

        #[arg(long)]
        id: String,
    },
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(e) = run(cli) {
        ui::error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut store_config = config::load_config(cli.config.as_deref())?.unwrap_or_default();
    if let Some(database) = &cli.database {
        store_config.path = Some(database.clone());
        store_config.shared_location = None;
    }

    match cli.command {
        Commands::Init { force } => {
            let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
            run_init(&config_path, store_config, force)?;
        }

        Commands::Stats => {
            let store = Store::open(store_config)?;
            let stats = store.stats().wait()?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                ui::header(&format!("Graphcache Statistics ({})", store_location(&store)));
                println!("{}", ui::stats_table(&stats));
                ui::info("Total rows", &stats.rows.to_string());
            }
        }

        Commands::Get { class, id } => {
            let store = Store::open(store_config)?;
            match store.get(&class, &id).wait()? {
                Some(object) if cli.json => {
                    println!("{}", serde_json::to_string_pretty(&codec::to_json(&object))?);
                }
                Some(object) => {
                    ui::object_header(&object);
                    println!("{}", ui::fields_table(&object));
                    ui::references(&object);
                }
                None => ui::warn(&format!("{} not found", ObjectKey::new(class, id))),
            }
        }

        Commands::Find {
            class,
            filters,
            order_by,
            desc,
            first,
            limit,
        } => {
            let store = Store::open(store_config)?;
            let mut query = store.query(&class);
            for filter in &filters {
                let (field, value) = filter
                    .split_once('=')
                    .ok_or_else(|| anyhow::anyhow!("filter `{}` is not FIELD=VALUE", filter))?;
                query.and(Condition::eq(field, parse_literal(value)));
            }
            if let Some(field) = order_by {
                query.order_by(field, if desc { Order::Descending } else { Order::Ascending });
            }
            if let Some(limit) = limit {
                query.limit(limit);
            }

            let objects: Vec<_> = if first {
                query.find_first().wait()?.into_iter().collect()
            } else {
                query.find_all().wait()?
            };

            if cli.json {
                let documents: Vec<_> = objects.iter().map(|o| codec::to_json(o)).collect();
                println!("{}", serde_json::to_string_pretty(&documents)?);
            } else if objects.is_empty() {
                ui::warn(&format!("No {} objects matched", class));
            } else {
                println!("{} {} match(es)", Icons::SEARCH, objects.len());
                println!("{}", ui::objects_table(&objects));
            }
        }

        Commands::Import { file } => {
            let contents = std::fs::read_to_string(&file)?;
            let documents: Vec<serde_json::Value> = serde_json::from_str(&contents)?;

            // One decoder, so pointers between documents share objects
            let mut decoder = Decoder::new();
            let objects = documents
                .iter()
                .map(|document| decoder.decode_document(document))
                .collect::<graphcache::Result<Vec<_>>>()?;

            let store = Store::open(store_config)?;
            let written = store.save_many(&objects).wait()?;

            if cli.json {
                println!("{}", serde_json::json!({ "documents": objects.len(), "rows": written }));
            } else {
                ui::success(&format!(
                    "Imported {} documents ({} rows) from {}",
                    objects.len(),
                    written,
                    file.display()
                ));
            }
        }

        Commands::Remove { class, id } => {
            let store = Store::open(store_config)?;
            let key = ObjectKey::new(class, id);
            let removed = store.remove(&Object::stub(&key)).wait()?;

            if cli.json {
                println!("{}", serde_json::json!({ "key": key, "removed": removed }));
            } else if removed == 0 {
                ui::warn(&format!("{} was not stored", key));
            } else {
                println!("{} Removed {}", Icons::DEL, key);
            }
        }
    }

    Ok(())
}

fn run_init(config_path: &Path, mut store_config: StoreConfig, force: bool) -> anyhow::Result<()> {
    if store_config.path.is_none() && store_config.shared_location.is_none() {
        store_config.path = Some(config::default_database_path_in(Path::new(".")));
    }

    config::write_config(config_path, &store_config, force)?;
    if let Some(root) = config_path.parent() {
        let root = if root.as_os_str().is_empty() { Path::new(".") } else { root };
        config::ensure_gitignore(root)?;
    }

    let store = Store::open(store_config)?;
    ui::success(&format!("Wrote {}", config_path.display()));
    ui::info("Database", &store_location(&store));
    Ok(())
}

fn store_location(store: &Store) -> String {
    store
        .config()
        .database_path()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "in-memory".to_string())
}

/// Interpret a command-line value as JSON when possible, text otherwise
fn parse_literal(value: &str) -> Literal {
    match serde_json::from_str::<serde_json::Value>(value) {
        Ok(serde_json::Value::Null) => Literal::Null,
        Ok(serde_json::Value::Bool(b)) => Literal::Bool(b),
        Ok(serde_json::Value::Number(n)) => match n.as_i64() {
            Some(i) => Literal::Integer(i),
            None => n.as_f64().map_or_else(|| Literal::Text(value.to_string()), Literal::Real),
        },
        Ok(serde_json::Value::String(s)) => Literal::Text(s),
        _ => Literal::Text(value.to_string()),
    }
}
