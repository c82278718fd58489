//! flatbridge: ClickHouse ⇄ flat file transfers
//!
//! # Usage
//!
//! ```bash
//! # List tables and describe one
//! flatbridge tables
//! flatbridge describe orders
//!
//! # Preview a join
//! flatbridge preview orders customers -c orders:id -c customers:name \
//!     --join inner --on "orders.cust_id = customers.id"
//!
//! # Export / import
//! flatbridge export orders -o orders.csv
//! flatbridge import people.tsv people --delimiter tab --batch-size 5000
//! ```

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::*;
use flatbridge::prelude::*;
use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[command(name = "flatbridge")]
#[command(version)]
#[command(about = "Move data between ClickHouse and delimited flat files", long_about = None)]
#[command(after_help = "EXAMPLES:
    flatbridge describe orders
    flatbridge export orders customers --join inner --on 'orders.cust_id = customers.id'
    flatbridge import people.csv people --columns id,name")]
struct Cli {
    /// Configuration file (defaults to ./flatbridge.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format for tabular results
    #[arg(short, long, value_enum, default_value = "table", global = true)]
    format: OutputFormat,

    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConnectionArgs {
    #[arg(long, global = true)]
    host: Option<String>,

    #[arg(long, global = true)]
    port: Option<u16>,

    #[arg(long, global = true)]
    database: Option<String>,

    #[arg(long, global = true)]
    user: Option<String>,

    #[arg(long, global = true, env = "FLATBRIDGE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// JWT bearer token
    #[arg(long, global = true, env = "FLATBRIDGE_JWT", hide_env_values = true)]
    jwt: Option<String>,

    /// Force TLS on or off
    #[arg(long, global = true)]
    secure: Option<bool>,
}

#[derive(Args)]
struct FileArgs {
    /// Field delimiter (a single character, or `tab`)
    #[arg(short, long, default_value = ",")]
    delimiter: String,

    /// The file has no header row
    #[arg(long)]
    no_header: bool,
}

impl FileArgs {
    fn format(&self) -> FileFormat {
        FileFormat::new(self.delimiter.clone(), !self.no_header)
    }
}

#[derive(Args)]
struct SelectArgs {
    /// Tables to read, primary first
    #[arg(required = true)]
    tables: Vec<String>,

    /// Columns per table as `table:col1,col2` (repeatable)
    #[arg(short, long = "columns")]
    columns: Vec<String>,

    /// Join type: inner, left, right, full
    #[arg(short, long)]
    join: Option<JoinType>,

    /// Join condition for each non-primary table, in order
    #[arg(long)]
    on: Vec<String>,
}

impl SelectArgs {
    fn projection(&self) -> anyhow::Result<ProjectionSpec> {
        parse_selection(&self.columns)
    }

    fn join_spec(&self) -> Option<JoinSpec> {
        self.join.map(|join_type| JoinSpec {
            join_type,
            conditions: self.on.clone(),
        })
    }
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// List tables in the database
    Tables,
    /// Show the columns of a table
    Describe {
        table: String,
    },
    /// Show the columns and first rows of a flat file
    Inspect {
        file: PathBuf,

        #[command(flatten)]
        file_args: FileArgs,

        /// Rows to show
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Preview rows of a table or join
    Preview {
        #[command(flatten)]
        select: SelectArgs,

        /// Rows to show
        #[arg(short, long)]
        limit: Option<usize>,

        /// Only print the generated SQL
        #[arg(long)]
        dry_run: bool,
    },
    /// Export a table or join to a flat file
    Export {
        #[command(flatten)]
        select: SelectArgs,

        /// Output file (defaults to export_<job id>.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        file_args: FileArgs,
    },
    /// Import a flat file into a table
    Import {
        file: PathBuf,

        /// Target table, created when absent
        table: String,

        /// Columns to load (comma separated); all when omitted
        #[arg(short, long, value_delimiter = ',')]
        columns: Vec<String>,

        #[command(flatten)]
        file_args: FileArgs,

        #[arg(long)]
        batch_size: Option<usize>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "flatbridge=debug" } else { "flatbridge=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = BridgeConfig::load(cli.config.as_deref())?;
    apply_connection_args(&mut config.clickhouse, &cli.connection);
    config.validate()?;

    match cli.command {
        Commands::Tables => {
            let session = ClickHouseSession::connect(&config.clickhouse).await?;
            for table in list_tables(&session).await? {
                println!("{}", table);
            }
        }
        Commands::Describe { table } => {
            let session = ClickHouseSession::connect(&config.clickhouse).await?;
            let desc = describe_table(&session, &table).await?;
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&desc)?),
                OutputFormat::Table => {
                    println!("{}", desc.name.cyan().bold());
                    for col in &desc.columns {
                        println!("  {} {}", col.name.white(), col.data_type.dimmed());
                    }
                }
            }
        }
        Commands::Inspect {
            file,
            file_args,
            limit,
        } => {
            let format = file_args.format();
            let mut reader =
                File::open(&file).with_context(|| format!("failed to open {}", file.display()))?;
            let columns = infer_file_schema(&mut reader, &format)?;
            println!("{} {}", "Columns:".green().bold(), columns.join(", ").white());
            println!();
            let rows = TransferEngine::new().preview_file(
                &mut reader,
                &format,
                &[],
                Some(limit.unwrap_or(config.transfer.preview_limit)),
            )?;
            format_output(&rows, &cli.format);
        }
        Commands::Preview {
            select,
            limit,
            dry_run,
        } => {
            let session = ClickHouseSession::connect(&config.clickhouse).await?;
            let tables = describe_tables(&session, &select.tables).await?;
            let limit = limit.unwrap_or(config.transfer.preview_limit);
            let plan = build_plan(
                &tables,
                &select.projection()?,
                select.join_spec().as_ref(),
                Some(limit),
            )?;

            if dry_run {
                println!("{}", "Generated SQL:".green().bold());
                println!("{}", plan.to_sql().white());
                return Ok(());
            }
            if cli.verbose {
                println!("{} {}", "SQL:".dimmed(), plan.to_sql().yellow());
            }

            let rows = TransferEngine::new()
                .stream_preview(&session, &plan, Some(limit))
                .await?;
            format_output(&rows, &cli.format);
        }
        Commands::Export {
            select,
            output,
            file_args,
        } => {
            let mut request = ExportRequest::new(config.clickhouse.clone(), select.tables.clone());
            request.columns = select.projection()?;
            request.join = select.join_spec();
            request.output_file = output;
            request.format = file_args.format();
            run_job(&config, request.into()).await?;
        }
        Commands::Import {
            file,
            table,
            columns,
            file_args,
            batch_size,
        } => {
            let mut request = ImportRequest::new(config.clickhouse.clone(), file, table)
                .columns(columns)
                .format(file_args.format());
            request.batch_size = batch_size;
            run_job(&config, request.into()).await?;
        }
    }

    Ok(())
}

fn apply_connection_args(conn: &mut ConnectionConfig, args: &ConnectionArgs) {
    if let Some(host) = &args.host {
        conn.host = host.clone();
    }
    if let Some(port) = args.port {
        conn.port = port;
    }
    if let Some(database) = &args.database {
        conn.database = database.clone();
    }
    if let Some(user) = &args.user {
        conn.user = user.clone();
    }
    if let Some(password) = &args.password {
        conn.password = Some(password.clone());
    }
    if let Some(jwt) = &args.jwt {
        conn.jwt_token = Some(jwt.clone());
    }
    if args.secure.is_some() {
        conn.secure = args.secure;
    }
}

/// Parse `table:col1,col2` selections. A bare `table` selects every column.
fn parse_selection(items: &[String]) -> anyhow::Result<ProjectionSpec> {
    let mut spec = ProjectionSpec::new();
    for item in items {
        let (table, cols) = item.split_once(':').unwrap_or((item.as_str(), ""));
        if table.trim().is_empty() {
            bail!("invalid column selection '{}': expected table:col1,col2", item);
        }
        spec.entry(table.trim().to_string()).or_default().extend(
            cols.split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
        );
    }
    Ok(spec)
}

async fn run_job(config: &BridgeConfig, request: TransferRequest) -> anyhow::Result<()> {
    let tracker = JobTracker::new(Arc::new(ClickHouseConnector), config.transfer.clone());
    let id = tracker.submit(request)?;
    println!("{} {}", "Job:".dimmed(), id.cyan());

    let job = tracker.wait(&id, POLL_INTERVAL).await?;
    match job.status {
        JobStatus::Completed => {
            println!(
                "{} {} record(s) transferred",
                "✓".green(),
                job.records_processed.to_string().cyan()
            );
            if let Some(path) = &job.output_file {
                println!("  {} {}", "Output:".dimmed(), path.display().to_string().white());
            }
            Ok(())
        }
        _ => bail!(job.error.unwrap_or_else(|| format!("job ended as {}", job.status))),
    }
}

fn format_output(results: &[PreviewRow], format: &OutputFormat) {
    if results.is_empty() {
        println!("{}", "(no results)".dimmed());
        return;
    }

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(results).unwrap_or_default());
        }
        OutputFormat::Table => {
            let columns: Vec<&String> = results[0].keys().collect();

            let mut widths: HashMap<&String, usize> =
                columns.iter().map(|c| (*c, c.chars().count())).collect();
            for row in results {
                for (col, val) in row {
                    let len = val_to_string(val).chars().count();
                    if let Some(w) = widths.get_mut(col) {
                        *w = (*w).max(len);
                    }
                }
            }

            let header: Vec<String> = columns
                .iter()
                .map(|c| format!("{:width$}", c, width = widths[*c]))
                .collect();
            println!("{}", header.join(" │ ").white().bold());

            let sep: Vec<String> = columns.iter().map(|c| "─".repeat(widths[*c])).collect();
            println!("{}", sep.join("─┼─").dimmed());

            for row in results {
                let cells: Vec<String> = columns
                    .iter()
                    .map(|c| {
                        let val = row.get(*c).map(val_to_string).unwrap_or_default();
                        format!("{:width$}", val, width = widths[*c])
                    })
                    .collect();
                println!("{}", cells.join(" │ "));
            }

            println!();
            println!("{} row(s) returned", results.len().to_string().cyan());
        }
    }
}

fn val_to_string(val: &serde_json::Value) -> String {
    match val {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::String(s) => s.clone(),
        _ => val.to_string(),
    }
}
