use clap::Parser;
use comb::logging;
use std::path::PathBuf;

mod core;

use crate::core::Config;

#[derive(Parser)]
#[command(name = "waggled", about = "Runs the waggle port mapper.", version)]
struct Cli {
    /// Path to the TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen port
    #[arg(long)]
    port: Option<u16>,

    /// Limit size of registration table to prune unregistered nodes
    #[arg(long = "nodes-limit")]
    nodes_limit: Option<usize>,

    /// Prune unregistered nodes if unregistration older than this value in minutes
    #[arg(long = "unreg-ttl")]
    unreg_ttl: Option<u64>,

    /// Publish a local node and accept distribution peers
    #[arg(long)]
    node: bool,

    /// Name of the published node
    #[arg(long = "node-name")]
    node_name: Option<String>,

    /// Cookie of the published node
    #[arg(long = "node-cookie")]
    node_cookie: Option<String>,

    /// Distribution listen port of the published node
    #[arg(long = "node-port")]
    node_port: Option<u16>,

    /// Log severity (trace, debug, info, warning, error, critical)
    #[arg(long = "log-level")]
    log_level: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    let mut config: Config = match &cli.config {
        Some(path) => serdeconv::from_toml_file(path).expect("Error parsing config file"),
        None => Config::default(),
    };
    apply_overrides(&mut config, &cli);

    let log = logging::init(&config.log_level);

    let daemon = match crate::core::run(&config, &log) {
        Ok(daemon) => daemon,
        Err(err) => {
            logging::crit!(log, "startup failed"; "error" => %err);
            std::process::exit(1);
        }
    };

    let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .expect("Error installing signal handler");

    let _ = stop_rx.recv();
    logging::info!(log, "shutting down");
    drop(daemon);
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(port) = cli.port {
        config.listen_port = port;
    }
    if let Some(limit) = cli.nodes_limit {
        config.reg_limit = limit;
    }
    if let Some(ttl) = cli.unreg_ttl {
        config.unreg_ttl = ttl;
    }
    if cli.node {
        config.publish_self = true;
    }
    if let Some(name) = &cli.node_name {
        config.node_name = name.clone();
    }
    if let Some(cookie) = &cli.node_cookie {
        config.node_cookie = comb::cookie::Cookie::from(cookie.as_str());
    }
    if let Some(port) = cli.node_port {
        config.node_port = port;
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
}
