//! Shardset group server executable: runs all replicas of one group in a
//! single process over the bundled local consensus engine, and registers the
//! group with the shard controller.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;

use env_logger::Env;

use tokio::runtime::Builder;
use tokio::signal;

use shardset::{
    pf_error, pf_info, CtrlStub, Gid, LocalGroup, ReplicaId, ShardServer,
    ShardsetError,
};

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Group ID of this replica group (must be nonzero).
    #[arg(short, long)]
    gid: Gid,

    /// Shard controller service address.
    #[arg(short, long)]
    ctrl: SocketAddr,

    /// Number of replicas in this group.
    #[arg(short, long, default_value_t = 3)]
    population: u8,

    /// Base key-value API port; replica i listens on port + i.
    #[arg(short, long, default_value_t = 52700)]
    api_port: u16,

    /// Base group-to-group port; replica i listens on port + i.
    #[arg(long, default_value_t = 52800)]
    peer_port: u16,

    /// Replica initially assigned leadership.
    #[arg(short, long, default_value_t = 0)]
    leader: ReplicaId,

    /// Number of tokio worker threads.
    #[arg(long, default_value_t = 2)]
    threads: usize,

    /// Server configuration TOML string. Every '+' is treated as newline.
    #[arg(long, default_value_t = String::from(""))]
    config: String,
}

impl CliArgs {
    /// Sanitize command line arguments.
    fn sanitize(&self) -> Result<(), ShardsetError> {
        if self.gid == 0 {
            Err(ShardsetError::msg("group ID 0 is reserved"))
        } else if self.population == 0 || self.population > 5 {
            Err(ShardsetError(format!(
                "invalid population {}",
                self.population
            )))
        } else if self.leader >= self.population {
            Err(ShardsetError(format!(
                "invalid leader replica {} / {}",
                self.leader, self.population
            )))
        } else if self.api_port <= 1024 || self.peer_port <= 1024 {
            Err(ShardsetError(format!(
                "invalid ports {} / {}",
                self.api_port, self.peer_port
            )))
        } else if self.api_port.abs_diff(self.peer_port)
            < self.population as u16
        {
            Err(ShardsetError(format!(
                "api/peer port ranges {}.. and {}.. overlap",
                self.api_port, self.peer_port
            )))
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

// Group server executable main entrance.
fn server_main() -> Result<(), ShardsetError> {
    let args = CliArgs::parse();
    args.sanitize()?;
    let config_str = if args.config.is_empty() {
        None
    } else {
        Some(args.config.replace('+', "\n"))
    };

    // create tokio multi-threaded runtime
    let runtime = Builder::new_multi_thread()
        .enable_all()
        .worker_threads(args.threads)
        .thread_name(format!("tokio-worker-group{}", args.gid))
        .build()?;

    // enter tokio runtime, set up all replicas of the group, and block on
    // the termination signal
    runtime.block_on(async move {
        let group = LocalGroup::new();
        group.set_leader(Some(args.leader));

        let mut servers = vec![];
        for id in 0..args.population {
            let (engine, apply_rx) = group.attach(id);
            let api_addr: SocketAddr =
                format!("127.0.0.1:{}", args.api_port + id as u16).parse()?;
            let peer_addr: SocketAddr =
                format!("127.0.0.1:{}", args.peer_port + id as u16).parse()?;

            let server = ShardServer::new_and_setup(
                id,
                args.gid,
                api_addr,
                peer_addr,
                args.ctrl,
                Arc::new(engine),
                apply_rx,
                config_str.as_deref(),
            )
            .await?;
            servers.push(server);
        }

        // register this group's servers with the controller
        let peer_addrs =
            servers.iter().map(|server| server.peer_addr()).collect();
        let published =
            CtrlStub::new(args.ctrl).join(args.gid, peer_addrs).await?;
        pf_info!("server"; "group {} registered under config {}",
                           args.gid, published.num);

        signal::ctrl_c().await?;
        pf_info!("server"; "group {} shutting down", args.gid);
        for server in servers {
            server.kill();
        }
        Ok::<(), ShardsetError>(())
    })
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .format_module_path(true)
        .format_target(false)
        .init();

    if let Err(e) = server_main() {
        pf_error!("server"; "server_main exitted: {}", e);
    }
}

#[cfg(test)]
mod server_args_tests {
    use super::*;

    fn base_args() -> CliArgs {
        CliArgs {
            gid: 1,
            ctrl: "127.0.0.1:52600".parse().unwrap(),
            population: 3,
            api_port: 52700,
            peer_port: 52800,
            leader: 0,
            threads: 2,
            config: "".into(),
        }
    }

    #[test]
    fn sanitize_valid() {
        assert!(base_args().sanitize().is_ok());
    }

    #[test]
    fn sanitize_reserved_gid() {
        let mut args = base_args();
        args.gid = 0;
        assert!(args.sanitize().is_err());
    }

    #[test]
    fn sanitize_invalid_population() {
        let mut args = base_args();
        args.population = 9;
        assert!(args.sanitize().is_err());
    }

    #[test]
    fn sanitize_invalid_leader() {
        let mut args = base_args();
        args.leader = 3;
        assert!(args.sanitize().is_err());
    }

    #[test]
    fn sanitize_overlapping_ports() {
        let mut args = base_args();
        args.peer_port = 52702;
        assert!(args.sanitize().is_err());
    }

    #[test]
    fn sanitize_invalid_threads() {
        let mut args = base_args();
        args.threads = 1;
        assert!(args.sanitize().is_err());
    }
}
