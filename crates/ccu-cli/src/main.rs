use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "ccu")]
#[command(about = "Cell control unit operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> site -> overrides...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Inspect production flows
    Flows {
        #[command(subcommand)]
        cmd: FlowsCmd,
    },
}

#[derive(Subcommand)]
enum FlowsCmd {
    /// List configured flows (stock flows plus configured ones)
    List {
        /// Layered config paths in merge order. Omit for stock flows only.
        #[arg(long = "config")]
        config_paths: Vec<String>,
    },

    /// Compile one flow and print the resulting step chain as JSON
    Compile {
        /// Flow name (e.g. RED). STORAGE prints the fixed storage route.
        name: String,

        /// Layered config paths in merge order. Omit for stock flows only.
        #[arg(long = "config")]
        config_paths: Vec<String>,

        /// One line per step instead of JSON.
        #[arg(long, default_value_t = false)]
        summary: bool,
    },
}

fn main() -> Result<()> {
    // Dev convenience; silent if the file does not exist.
    let _ = dotenvy::from_filename(".env.local");

    // Diagnostics go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = ccu_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Flows { cmd } => match cmd {
            FlowsCmd::List { config_paths } => {
                let table = commands::load_flow_table(&config_paths)?;
                for line in commands::flows::list_lines(&table) {
                    println!("{line}");
                }
            }
            FlowsCmd::Compile {
                name,
                config_paths,
                summary,
            } => {
                let table = commands::load_flow_table(&config_paths)?;
                let chain = commands::flows::compile(&table, &name)?;
                if summary {
                    for line in commands::flows::summary_lines(&chain) {
                        println!("{line}");
                    }
                } else {
                    println!("{}", serde_json::to_string_pretty(&chain)?);
                }
            }
        },
    }

    Ok(())
}
