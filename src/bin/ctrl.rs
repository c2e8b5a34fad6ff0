//! Shardset shard controller executable.

use std::net::SocketAddr;

use clap::Parser;

use env_logger::Env;

use tokio::runtime::Builder;
use tokio::signal;

use shardset::{pf_error, pf_info, CtrlService, ShardsetError};

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Controller service port.
    #[arg(short, long, default_value_t = 52600)]
    port: u16,

    /// Number of tokio worker threads.
    #[arg(long, default_value_t = 2)]
    threads: usize,
}

impl CliArgs {
    /// Sanitize command line arguments.
    fn sanitize(&self) -> Result<(), ShardsetError> {
        if self.port <= 1024 {
            Err(ShardsetError(format!("invalid port {}", self.port)))
        } else if self.threads < 2 {
            Err(ShardsetError(format!(
                "invalid number of threads {}",
                self.threads
            )))
        } else {
            Ok(())
        }
    }
}

// Controller executable main entrance.
fn ctrl_main() -> Result<(), ShardsetError> {
    let args = CliArgs::parse();
    args.sanitize()?;

    let runtime = Builder::new_multi_thread()
        .enable_all()
        .worker_threads(args.threads)
        .thread_name("tokio-worker-ctrl")
        .build()?;

    runtime.block_on(async move {
        let bind_addr: SocketAddr =
            format!("127.0.0.1:{}", args.port).parse()?;
        let service = CtrlService::new_and_setup(bind_addr).await?;

        signal::ctrl_c().await?;
        pf_info!("ctrl"; "controller shutting down");
        service.kill();
        Ok::<(), ShardsetError>(())
    })
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .format_module_path(true)
        .format_target(false)
        .init();

    if let Err(e) = ctrl_main() {
        pf_error!("ctrl"; "ctrl_main exitted: {}", e);
    }
}

#[cfg(test)]
mod ctrl_args_tests {
    use super::*;

    #[test]
    fn sanitize_valid() {
        let args = CliArgs {
            port: 52600,
            threads: 2,
        };
        assert!(args.sanitize().is_ok());
    }

    #[test]
    fn sanitize_invalid_port() {
        let args = CliArgs {
            port: 80,
            threads: 2,
        };
        assert!(args.sanitize().is_err());
    }
}
