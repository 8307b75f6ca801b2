mod arq;
mod config;
mod daemon;
mod discovery;
mod error;
mod handler;
mod hash;
mod ip;
mod ipc;
mod neighbors;
mod reward;
mod routing;

use colorful::{
    Color,
    Colorful,
};
use config::Config;
use daemon::Daemon;
use log::{
    error,
    info,
    LevelFilter,
};
use simple_logger::SimpleLogger;
use std::process::exit;
use tokio::{
    io::{
        AsyncBufReadExt,
        AsyncWriteExt,
        BufReader,
    },
    net::UnixStream,
};

const DEFAULT_CONFIG_PATH: &str = "/etc/adhocd.conf";

const BANNER: &str = r#"            __  __                __
  ____ _  / / / /_  ____  _____/ /
 / __ `/ / /_/ __ \/ __ \/ ___/ /
/ /_/ / / __/ / / / /_/ / /__/_/
\__,_/ /_/ /_/ /_/\____/\___(_)
  RL-routed mesh daemon"#;

fn usage() -> ! {
    eprintln!("usage: adhocd <start|stop|restart|status> [config path]");
    exit(-1);
}

#[tokio::main]
async fn main() {
    if let Err(error) = SimpleLogger::new().with_level(LevelFilter::Info).init() {
        println!("Unable to initialize logging => {error}");
        exit(-1);
    }
    println!("{}\n", BANNER.gradient(Color::Green).bold());

    let mut args = std::env::args().skip(1);
    let Some(command) = args.next() else {
        usage();
    };
    let config_path = args.next().unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_owned());

    let result = match command.as_str() {
        "start" => run_start(&config_path).await,
        "stop" => run_stop(&config_path).await,
        "restart" => match run_stop(&config_path).await {
            Ok(()) => run_start(&config_path).await,
            Err(error) => Err(error),
        },
        "status" => run_status(&config_path).await,
        other => {
            error!("unknown command {other:?}");
            usage();
        }
    };

    if let Err(error) = result {
        error!("{error}");
        exit(-1);
    }
}

/// Runs the daemon in the foreground until Ctrl+C, or until a `stop` command arrives over the
/// IPC socket and cancels the shared token from the other side.
async fn run_start(config_path: &str) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    let socket_path = config.ipc_socket_path.clone();
    let daemon = Daemon::start(config).await?;
    info!("adhocd running; control socket at {socket_path}");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received Ctrl+C, shutting down"),
        _ = daemon.wait_until_stopped() => info!("received shutdown command, shutting down"),
    }
    daemon.shutdown().await;
    Ok(())
}

/// Sends `shutdown` to the running instance's control socket.
async fn run_stop(config_path: &str) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    let response = send_command(&config.ipc_socket_path, "shutdown").await?;
    info!("{response}");
    Ok(())
}

/// Prints the routing table and neighbor set of the running instance.
async fn run_status(config_path: &str) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    println!("{}", send_command(&config.ipc_socket_path, "routes").await?);
    println!("{}", send_command(&config.ipc_socket_path, "neighbors").await?);
    Ok(())
}

async fn send_command(socket_path: &str, command: &str) -> anyhow::Result<String> {
    let stream = UnixStream::connect(socket_path).await?;
    let (reader, mut writer) = stream.into_split();
    writer.write_all(command.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;

    let mut lines = BufReader::new(reader).lines();
    match lines.next_line().await? {
        Some(line) => Ok(line),
        None => anyhow::bail!("control socket closed without a reply"),
    }
}
