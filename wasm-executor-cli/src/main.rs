// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! WASM Executor CLI
//!
//! Command-line front end for trying modules outside the database. Every
//! command registers the module in a fresh executor before acting on it.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;
use wasm_executor_core::{ExecutorConfig, WasmExecutor};

#[derive(Parser)]
#[command(name = "wasm-executor")]
#[command(about = "Register WebAssembly modules and call their exported functions", long_about = None)]
struct Cli {
    /// Executor config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose mode
    #[arg(short, long)]
    verbose: bool,

    /// Output as JSON (machine-readable)
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a module and print its instance id
    Register {
        /// Path to the .wasm file
        path: PathBuf,
    },

    /// List the exported functions of a module
    Functions {
        /// Path to the .wasm file
        path: PathBuf,
    },

    /// Call an integer function
    Call {
        /// Path to the .wasm file
        path: PathBuf,

        /// Exported function name
        function: String,

        /// Integer arguments (up to 5)
        #[arg(allow_negative_numbers = true)]
        args: Vec<i64>,
    },

    /// Call a text function
    CallText {
        /// Path to the .wasm file
        path: PathBuf,

        /// Exported function name
        function: String,

        /// Text arguments (1 or 2)
        #[arg(required = true)]
        args: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => ExecutorConfig::from_file(path)
            .with_context(|| format!("Failed to load config {:?}", path))?,
        None => ExecutorConfig::default(),
    };
    let executor = WasmExecutor::new(config).context("Failed to create executor")?;

    match cli.command {
        Commands::Register { path } => {
            let id = register(&executor, &path)?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({ "id": id, "path": path.to_string_lossy() })
                );
            } else {
                println!("✓ Registered {:?}", path);
                println!("  Instance ID: {}", id);
            }
        }

        Commands::Functions { path } => {
            let id = register(&executor, &path)?;
            let rows = executor
                .exported_functions(id)
                .with_context(|| format!("Failed to read exports of {:?}", path))?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if rows.is_empty() {
                println!("No exported functions");
            } else {
                println!("{:<32} {:<40} OUTPUT", "FUNCTION", "INPUTS");
                for row in &rows {
                    println!("{:<32} {:<40} {}", row.name, row.inputs, row.output);
                }
            }
        }

        Commands::Call {
            path,
            function,
            args,
        } => {
            let id = register(&executor, &path)?;
            let result = executor
                .invoke_int8(id, &function, &args)
                .with_context(|| format!("Call to {} failed", function))?;

            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({ "function": function, "result": result })
                );
            } else {
                println!("{}", result);
            }
        }

        Commands::CallText {
            path,
            function,
            args,
        } => {
            let id = register(&executor, &path)?;
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            let result = executor
                .invoke_text(id, &function, &args)
                .with_context(|| format!("Call to {} failed", function))?;

            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({ "function": function, "result": result })
                );
            } else {
                println!("{}", result);
            }
        }
    }

    Ok(())
}

fn register(executor: &WasmExecutor, path: &Path) -> Result<i64> {
    let id = executor
        .create_instance(path)
        .with_context(|| format!("Failed to register {:?}", path))?;
    info!(id, path = ?path, "module registered");
    Ok(id)
}
