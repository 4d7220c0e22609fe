use std::{process::ExitCode, sync::Arc};

use burrow::{
    SshPaths, Tunnel, TunnelError, TunnelsConfig, config,
    log::{self, DiagnosticSink, TracingSink},
};
use clap::Parser;
use cli::BurrowCli;
use futures::future::join_all;

mod cli;

#[tokio::main]
pub async fn main() -> Result<ExitCode, TunnelError> {
    let cli = BurrowCli::parse();
    log::init(cli.debug, cli.log_file.as_deref())?;

    let paths = SshPaths::from_env()?;
    let config_path = cli
        .config
        .unwrap_or_else(|| paths.expand(config::DEFAULT_PATH));
    let loaded_config = TunnelsConfig::load(&config_path)?;
    let sink: Arc<dyn DiagnosticSink> = Arc::new(TracingSink);

    // each tunnel resolves on its own blocking thread; one failure never
    // affects the others
    let handlers = loaded_config.tunnels.into_iter().map(|declaration| {
        let paths = paths.clone();
        let sink = sink.clone();
        let name = declaration.name.clone();
        let handle =
            tokio::task::spawn_blocking(move || Tunnel::new(declaration, &paths, sink.as_ref()));
        async move { (name, handle.await) }
    });

    let mut failed = 0;
    for (name, result) in join_all(handlers).await {
        match result {
            Ok(Ok(tunnel)) => {
                let rc = tunnel.run_config();
                tracing::info!(
                    "{}: {} -> {} via {}@{}:{} ({} keys)",
                    tunnel.name(),
                    rc.local_address,
                    rc.remote_address,
                    rc.user,
                    rc.host_name,
                    rc.port,
                    rc.client_config.auth().signers().len()
                );
            }
            Ok(Err(e)) => {
                failed += 1;
                tracing::error!("{name}: {e}");
            }
            Err(e) => {
                failed += 1;
                tracing::error!("{name}: resolution task failed: {e}");
            }
        }
    }

    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
