use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use sql_flow::commands::parse::{parse_command, SqlInput};
use sql_flow::display;
use sql_flow::flow::export::OutputFormat;

/// sqlflow CLI - SQL lineage to ETL flow graphs
#[derive(Parser)]
#[command(name = "sqlflow", about = "sqlflow - SQL lineage to ETL flow graphs", version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse SQL and print its ETL flow graph
    Parse {
        /// SQL file, directory of .sql files, or - for stdin
        #[arg(short, long, conflicts_with = "sql", required_unless_present = "sql")]
        file: Option<PathBuf>,

        /// SQL text to parse
        #[arg(long)]
        sql: Option<String>,

        /// Output format for the graph
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Remote parse service endpoint, tried before the local parser
        #[arg(long)]
        remote: Option<String>,

        /// Configuration file (defaults to ./sqlflow.yaml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show the node role legend
    Legend,

    /// Show version information
    Version,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Parse {
            file,
            sql,
            format,
            remote,
            config,
        } => {
            let input = match (file, sql) {
                (_, Some(sql)) => SqlInput::Inline(sql),
                (Some(file), None) => SqlInput::from_file_arg(&file),
                (None, None) => {
                    eprintln!("Error: either --file or --sql is required");
                    process::exit(2);
                }
            };

            match parse_command(&input, format, remote, config) {
                Ok(0) => {}
                Ok(_) => process::exit(1),
                Err(err) => {
                    eprintln!("Error: {:#}", err);
                    process::exit(1);
                }
            }
        }
        Command::Legend => display::display_legend(),
        Command::Version => display::display_version(),
    }
}
