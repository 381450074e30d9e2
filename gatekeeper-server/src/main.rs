// Copyright 2026 Gatekeeper Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use anyhow::Result;
use clap::Parser;
use gatekeeper_server::{config::GatekeeperConfig, run_server};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Gatekeeper Tier-1 streaming anomaly detection engine", long_about = None)]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP listen address (overrides config file and defaults)
    #[arg(long)]
    http_addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = GatekeeperConfig::load(args.config)?;
    if let Some(addr) = args.http_addr {
        config.server.listen_addr = addr;
    }

    if let Err(err) = run_server(config).await {
        tracing::error!(error = %err, "Gatekeeper terminated with an unrecoverable error");
        std::process::exit(1);
    }

    Ok(())
}
