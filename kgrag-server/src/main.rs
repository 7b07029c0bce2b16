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

use anyhow::Result;
use clap::{Parser, Subcommand};
use kgrag_server::{build_retriever, config::KgragConfig, init_tracing, run_server};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long, global = true, env = "KGRAG_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API
    Serve {
        /// HTTP listen address (overrides config file)
        #[arg(long)]
        http_addr: Option<String>,

        /// Require bearer tokens on /ask
        #[arg(long)]
        auth_enabled: bool,
    },
    /// Answer one question and print it to stdout
    Ask {
        question: String,

        /// Also print the executed SPARQL query, rows and passages
        #[arg(short, long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    // Load configuration
    let mut config = KgragConfig::load(args.config)?;

    match args.command {
        Command::Serve {
            http_addr,
            auth_enabled,
        } => {
            // Apply CLI overrides
            if let Some(addr) = http_addr {
                config.server.listen_addr = addr;
            }
            if auth_enabled {
                config.auth.enabled = true;
            }
            run_server(config).await
        }
        Command::Ask { question, verbose } => {
            config.validate()?;
            let retriever = build_retriever(&config)?;
            let answer = retriever.answer_detailed(&question).await?;

            if verbose {
                eprintln!("SPARQL query ({} attempt(s)):\n{}\n", answer.attempts, answer.sparql_query);
                match &answer.structured_rows {
                    Some(rows) => {
                        eprintln!("Structured rows ({}):", rows.len());
                        for row in rows {
                            eprintln!("  {}", row.to_json_line());
                        }
                    }
                    None => eprintln!("Structured rows: unavailable (query failed)"),
                }
                eprintln!("Passages: {}\n", answer.passages.len());
            }
            println!("{}", answer.answer);
            Ok(())
        }
    }
}
