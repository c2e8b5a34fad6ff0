//! Shardset interactive client executable: a small REPL over the client
//! stub, for poking at a running cluster.

use std::net::SocketAddr;

use clap::Parser;

use env_logger::Env;

use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::runtime::Builder;

use shardset::{pf_error, ShardsetClient, ShardsetError};

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Client API addresses of servers to rotate through.
    /// Example: '-s host1:api_port1 -s host2:api_port2'.
    #[arg(short, long, required = true)]
    servers: Vec<SocketAddr>,

    /// Client configuration TOML string. Every '+' is treated as newline.
    #[arg(long, default_value_t = String::from(""))]
    config: String,

    /// Number of tokio worker threads.
    #[arg(long, default_value_t = 2)]
    threads: usize,
}

/// One iteration of the REPL; returns `false` on exit.
async fn one_iter(
    client: &mut ShardsetClient,
    line: &str,
) -> Result<bool, ShardsetError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    match tokens.as_slice() {
        [] => {}
        ["get", key] => {
            let value = client.get(key).await?;
            println!("{:?}", value);
        }
        ["put", key, value] => {
            client.put(key, value).await?;
            println!("ok");
        }
        ["append", key, value] => {
            client.append(key, value).await?;
            println!("ok");
        }
        ["help"] => {
            println!(
                "commands: get <key> | put <key> <value> | \
                 append <key> <value> | exit"
            );
        }
        ["exit"] | ["quit"] => return Ok(false),
        _ => println!("unrecognized command; try 'help'"),
    }
    Ok(true)
}

// Client executable main entrance.
fn client_main() -> Result<(), ShardsetError> {
    let args = CliArgs::parse();
    let config_str = if args.config.is_empty() {
        None
    } else {
        Some(args.config.replace('+', "\n"))
    };

    let runtime = Builder::new_multi_thread()
        .enable_all()
        .worker_threads(args.threads.max(2))
        .thread_name("tokio-worker-client")
        .build()?;

    runtime.block_on(async move {
        let mut client =
            ShardsetClient::new(args.servers, config_str.as_deref())?;

        let mut lines = BufReader::new(io::stdin()).lines();
        let mut stdout = io::stdout();
        loop {
            stdout.write_all(b"shardset> ").await?;
            stdout.flush().await?;
            match lines.next_line().await? {
                Some(line) => {
                    if !one_iter(&mut client, &line).await? {
                        break;
                    }
                }
                None => break, // stdin closed
            }
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

    if let Err(e) = client_main() {
        pf_error!("client"; "client_main exitted: {}", e);
    }
}
