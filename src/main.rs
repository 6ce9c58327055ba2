use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use nodegraph::{
    BooleanFilter, EngineConfig, FindOptions, MariaDbDialect, NodeCatalog, NodeSelection,
    OrderingExpression, StatementGenerator,
};

/// nodegraph - compile node statements into MariaDB SQL
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// YAML node schema
    #[arg(long)]
    schema: PathBuf,

    /// Optional YAML engine configuration; environment variables are used otherwise
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the find statement for a node, plus its deferred fetches
    Compile {
        #[arg(long)]
        node: String,

        /// Where-input as JSON
        #[arg(long = "where")]
        filter: Option<String>,

        /// Sort keys such as `views_DESC`, repeatable
        #[arg(long = "order-by")]
        order_by: Vec<String>,

        /// Selection-input as JSON; defaults to the identifier
        #[arg(long)]
        select: Option<String>,

        #[arg(long)]
        first: Option<u64>,

        #[arg(long, default_value_t = 0)]
        skip: u64,
    },
    /// Print the reduced filter and its dependency graph
    Dependencies {
        #[arg(long)]
        node: String,

        #[arg(long = "where")]
        filter: String,
    },
}

fn parse_json(flag: &str, input: &str) -> anyhow::Result<serde_json::Value> {
    serde_json::from_str(input).with_context(|| format!("--{} is not valid JSON", flag))
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    // Defaults to INFO level, can be overridden with RUST_LOG
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_yaml_file(path)?,
        None => EngineConfig::from_env()?,
    };
    let catalog = NodeCatalog::from_yaml_file(&cli.schema)
        .with_context(|| format!("loading schema {}", cli.schema.display()))?;
    log::info!("Loaded {} nodes from {}", catalog.len(), cli.schema.display());

    match cli.command {
        Command::Compile {
            node,
            filter,
            order_by,
            select,
            first,
            skip,
        } => {
            let node = catalog.node(&node)?;
            let filter = filter
                .map(|input| -> anyhow::Result<_> {
                    Ok(BooleanFilter::parse(&catalog, node, &parse_json("where", &input)?)?)
                })
                .transpose()?;
            let ordering = if order_by.is_empty() {
                None
            } else {
                Some(OrderingExpression::parse(node, &order_by)?)
            };
            let selection = match select {
                Some(input) => NodeSelection::parse(&catalog, node, &parse_json("select", &input)?)?,
                None => NodeSelection::identifier(&catalog, node)?,
            };

            let generator = StatementGenerator::new(&catalog, &MariaDbDialect, &config);
            let statement = generator.find(
                &selection,
                &FindOptions {
                    filter,
                    ordering,
                    offset: skip,
                    limit: first,
                },
            )?;
            println!("{};", statement.sql);
            for fetch in &statement.deferred {
                println!(
                    "\n-- deferred {} ({} per parent)",
                    fetch.path.join("."),
                    fetch.selection.limit
                );
                println!("{}", fetch.selection.head_selection);
            }
        }
        Command::Dependencies { node, filter } => {
            let node = catalog.node(&node)?;
            let filter = BooleanFilter::parse(&catalog, node, &parse_json("where", &filter)?)?;
            let reduced = filter.reduced();
            println!("{}\n", reduced);
            print!("{}", reduced.dependencies());
        }
    }

    Ok(())
}
