use clap::{Parser, Subcommand, ValueEnum};
use schematree::config::{parse_config, RegistryConfig};
use schematree::schema::parse_collections;
use schematree::{
    CollectionNode, DataType, DirectoryGateway, PersistenceGateway, Properties, Property,
    SchemaRegistry, SchemaView, SqliteGateway, UpdateMode,
};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

/// schematree CLI: browse and edit a collection schema registry
#[derive(Parser)]
#[command(name = "schematree", version, about)]
struct Cli {
    /// SQLite database holding the registry (default: schema.db)
    #[arg(long, conflicts_with = "dir")]
    db: Option<PathBuf>,

    /// Directory of <id>.json root documents instead of a database
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Registry config file (YAML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// List every collection in path order
    Tree,

    /// Show one collection by schema path (e.g. blog/comments)
    Get {
        /// Schema path
        path: String,
    },

    /// Show the collection a document path belongs to (e.g. blog/42/comments)
    Resolve {
        /// Document path
        path: String,
    },

    /// Create a collection chain (e.g. blog/comments/replies)
    Create {
        /// Schema path
        path: String,
    },

    /// Remove a root collection or a nested branch
    Remove {
        /// Schema path
        path: String,
        /// Show what would be removed without removing it
        #[arg(long)]
        dry_run: bool,
    },

    /// Set property definitions on a collection
    SetProps {
        /// Schema path
        path: String,
        /// Property definitions (e.g. --prop title=string --prop score=number)
        #[arg(long = "prop", value_parser = parse_key_value)]
        props: Vec<(String, String)>,
        /// Replace the existing properties instead of merging into them
        #[arg(long)]
        replace: bool,
    },

    /// Import root collections from a YAML or JSON seed file
    Import {
        /// Seed file
        file: PathBuf,
    },

    /// Find collections whose id or name contains a term
    Search {
        /// Search term
        term: String,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid key=value pair: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &cli.config {
        Some(path) => parse_config(path)?,
        None => RegistryConfig::default(),
    };

    let gateway: Arc<dyn PersistenceGateway> = match (&cli.dir, &cli.db) {
        (Some(dir), _) => {
            log::info!("Opening schema directory {}", dir.display());
            Arc::new(DirectoryGateway::open(dir, config.merge_mode)?)
        }
        (None, db) => {
            let db = db.clone().unwrap_or_else(|| PathBuf::from("schema.db"));
            log::info!("Opening schema database {}", db.display());
            Arc::new(SqliteGateway::open(&db, &config.namespace, config.merge_mode)?)
        }
    };
    let registry = SchemaRegistry::new(gateway, config);

    match cli.command {
        Command::Tree => {
            registry.start()?;
            print_output(&view_to_json(&registry.view()), &cli.format)?;
        }

        Command::Get { path } => {
            let node = registry.resolve(&path)?;
            print_output(&node_or_null(node.as_ref())?, &cli.format)?;
        }

        Command::Resolve { path } => {
            let node = registry.resolve_by_document_path(&path)?;
            print_output(&node_or_null(node.as_ref())?, &cli.format)?;
        }

        Command::Create { path } => {
            registry.create_collections(&path)?;
            print_output(&serde_json::json!({ "ok": true, "created": path }), &cli.format)?;
        }

        Command::Remove { path, dry_run } => {
            if dry_run {
                let node = registry.resolve(&path)?;
                print_output(
                    &serde_json::json!({
                        "dry_run": true,
                        "would_remove": path,
                        "collection": node_or_null(node.as_ref())?,
                    }),
                    &cli.format,
                )?;
            } else {
                registry.remove_collections(&path)?;
                print_output(&serde_json::json!({ "ok": true, "removed": path }), &cli.format)?;
            }
        }

        Command::SetProps {
            path,
            props,
            replace,
        } => {
            let properties = props_to_properties(&props);
            let mode = if replace {
                UpdateMode::Replace
            } else {
                registry.config().update_mode
            };
            let mut target = registry
                .resolve(&path)?
                .ok_or_else(|| format!("No collection at '{path}'"))?;
            target.collection.properties = properties;
            registry.update_properties_with(&target, mode)?;
            print_output(&serde_json::json!({ "ok": true, "path": path }), &cli.format)?;
        }

        Command::Import { file } => {
            let roots = parse_collections(&file)?;
            let count = registry.import_collections(&roots)?;
            print_output(&serde_json::json!({ "ok": true, "imported": count }), &cli.format)?;
        }

        Command::Search { term } => {
            registry.start()?;
            let view = registry.view();
            let hits: Vec<_> = view
                .search(&term)
                .into_iter()
                .map(|node| node_summary(&view, node))
                .collect();
            print_output(&serde_json::Value::Array(hits), &cli.format)?;
        }
    }

    Ok(())
}

fn print_output(
    value: &serde_json::Value,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

/// `--prop name=dataType` pairs; the value may also be a JSON property object
fn props_to_properties(props: &[(String, String)]) -> Properties {
    let mut properties = Properties::new();
    for (field, value) in props {
        let property = serde_json::from_str::<Property>(value)
            .unwrap_or_else(|_| Property::new(DataType::from_tag(value)));
        properties.insert(field.clone(), property);
    }
    properties
}

fn node_summary(view: &SchemaView, node: &CollectionNode) -> serde_json::Value {
    serde_json::json!({
        "path": node.path,
        "id": node.id,
        "name": node.name,
        "depth": node.depth(),
        "properties": node.property_count(),
        "subcollections": view.children(node).len(),
    })
}

fn node_or_null(node: Option<&CollectionNode>) -> Result<serde_json::Value, serde_json::Error> {
    let Some(node) = node else {
        return Ok(serde_json::Value::Null);
    };
    let mut value = serde_json::to_value(&node.collection)?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert("path".into(), serde_json::Value::String(node.path.clone()));
    }
    Ok(value)
}

fn view_to_json(view: &SchemaView) -> serde_json::Value {
    serde_json::Value::Array(view.iter().map(|node| node_summary(view, node)).collect())
}
