use clap::{Parser, Subcommand};
use client::{download, serve, version};
use std::process;
use tracing_subscriber::{EnvFilter, Registry, prelude::*};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Parameters {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the agent API next to a game server
    Serve(serve::Parameters),
    /// Download the data directory of an instance as a tar.gz archive
    Download(download::Parameters),
    /// Print the agent version
    Version(version::Parameters),
}

#[tokio::main]
async fn main() {
    let logger = tracing_subscriber::fmt::layer();
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    let collector = Registry::default().with(logger).with(env_filter);
    tracing::subscriber::set_global_default(collector).unwrap();

    let args = Parameters::parse();
    match &args.command {
        Commands::Serve(args) => serve::run(args).await.unwrap_or_else(|e| {
            tracing::error!("Agent server failed with: {e:}");
            process::exit(1)
        }),
        Commands::Download(args) => download::run(args).await.unwrap_or_else(|e| {
            tracing::error!("Download failed with: {e:}");
            process::exit(2)
        }),
        Commands::Version(args) => version::run(args).await.unwrap_or_else(|e| {
            tracing::error!("Version failed with: {e:}");
            process::exit(3)
        }),
    }
}
