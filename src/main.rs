use anyhow::Context;
use clap::Parser;

use runbox::cli::Cli;
use runbox::config::{Config, ConfigStore};
use runbox::server::Server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    runbox::init_tracing();
    let cli = Cli::parse();

    let path = cli.config_path();
    let mut config = Config::load_from(&path)
        .with_context(|| format!("load config: {}", path.display()))?;
    cli.apply(&mut config);
    config.validate().context("command-line overrides")?;
    tracing::info!(
        config = %path.display(),
        bind = %config.server.bind_addr,
        max_sessions = config.sessions.max_sessions,
        "configuration loaded"
    );

    let store = ConfigStore::new(config, path);
    let mut server = Server::new(&store);
    server.try_bind().await?;
    server.run().await?;
    Ok(())
}
