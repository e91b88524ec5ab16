//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]

mod config;

use clap::{App, Arg};
use config::Config;
use rift::instance::Instance;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}

fn main() {
    // Parse command-line parameters.
    let matches = App::new("riftd")
        .version(env!("CARGO_PKG_VERSION"))
        .about("RIFT routing daemon")
        .arg(
            Arg::with_name("config")
                .short("f")
                .long("config")
                .value_name("FILE")
                .help("Topology configuration file")
                .required(true)
                .takes_value(true),
        )
        .arg(
            Arg::with_name("node")
                .short("n")
                .long("node")
                .value_name("NAME")
                .help("Run only the named node from the topology")
                .takes_value(true),
        )
        .get_matches();

    init_tracing();

    // Load the topology configuration.
    let config_file = matches.value_of("config").unwrap();
    let config = match Config::load(config_file) {
        Ok(config) => config,
        Err(error) => {
            error!(%error, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let node_filter = matches.value_of("node");
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");

    runtime.block_on(async {
        let mut tasks = vec![];

        for node in config
            .nodes()
            .filter(|node| node_filter.is_none_or(|name| node.name == name))
        {
            let (instance_cfg, interface_cfgs) =
                node.resolve(&config.constants);
            info!(name = %node.name, "starting node");
            let instance =
                Instance::new(node.name.clone(), instance_cfg, interface_cfgs);
            tasks.push(tokio::spawn(instance.run()));
        }

        if tasks.is_empty() {
            error!("no nodes to run");
            return;
        }

        // Run until interrupted.
        let _ = tokio::signal::ctrl_c().await;
        info!("shutting down");
    });
}
