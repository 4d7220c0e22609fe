use std::path::PathBuf;

use clap::Parser;

#[derive(Parser)]
#[command(version, about = "Burrow resolves your SSH tunnels and checks they are ready to connect", long_about = None)]
pub(crate) struct BurrowCli {
    /// custom tunnels file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// enable debug output (same as setting DEBUG)
    #[arg(short, long)]
    pub debug: bool,
    /// write logs to this file instead of stdout
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}
