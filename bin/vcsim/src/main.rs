// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::Parser;
use dropshot::{ConfigDropshot, HandlerTaskMode};
use slog::{info, Drain};

#[derive(Debug, Parser)]
#[clap(about, version)]
/// An in-memory vCenter and ESXi simulator
enum Args {
    /// Generates the OpenAPI specification.
    OpenApi,
    /// Runs the simulator.
    Run {
        /// TOML configuration; every table is optional.
        #[clap(long, action)]
        config: Option<PathBuf>,

        #[clap(name = "IP:PORT", action, default_value = "127.0.0.1:8989")]
        listen_addr: SocketAddr,

        /// Simulate a standalone ESXi host instead of a vCenter.
        #[clap(long, action)]
        esx: bool,

        /// Number of datacenters.
        #[clap(long, action)]
        dc: Option<usize>,

        /// Number of clusters per datacenter.
        #[clap(long, action)]
        cluster: Option<usize>,

        /// Number of standalone hosts per datacenter.
        #[clap(long, action)]
        host: Option<usize>,

        /// Number of VMs per host and resource pool.
        #[clap(long, action)]
        vm: Option<usize>,

        /// Number of datastores per datacenter.
        #[clap(long, action)]
        ds: Option<usize>,
    },
}

fn build_logger() -> slog::Logger {
    let main_drain = if atty::is(atty::Stream::Stdout) {
        let decorator = slog_term::TermDecorator::new().build();
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        slog_async::Async::new(drain)
            .overflow_strategy(slog_async::OverflowStrategy::Block)
            .build_no_guard()
    } else {
        let drain = slog_bunyan::with_name("vcsim", std::io::stdout())
            .build()
            .fuse();
        slog_async::Async::new(drain)
            .overflow_strategy(slog_async::OverflowStrategy::Block)
            .build_no_guard()
    };

    let (dtrace_drain, probe_reg) = slog_dtrace::Dtrace::new();

    let filtered_main = slog::LevelFilter::new(main_drain, slog::Level::Info);

    let log = slog::Logger::root(
        slog::Duplicate::new(filtered_main.fuse(), dtrace_drain.fuse()).fuse(),
        slog::o!(),
    );

    if let slog_dtrace::ProbeRegistration::Failed(err) = probe_reg {
        slog::error!(&log, "Error registering slog-dtrace probes: {:?}", err);
    }

    log
}

pub fn run_openapi() -> Result<(), String> {
    vcsim::api()
        .openapi("vSphere Simulator API", dropshot::semver::Version::new(0, 0, 1))
        .description(
            "VI/JSON, vAPI, lookup and SSO admin services of a simulated vCenter.",
        )
        .write(&mut std::io::stdout())
        .map_err(|e| e.to_string())
}

/// Applies command line overrides to the configured model.
fn apply_overrides(sim: &mut vcsim_config_toml::Config, args: Overrides) {
    if args.esx {
        let autostart = sim.model.autostart;
        sim.model = vcsim_config_toml::Model { autostart, ..vcsim_config_toml::Model::esx() };
    }
    let model = &mut sim.model;
    let pairs = [
        (args.dc, &mut model.datacenter),
        (args.cluster, &mut model.cluster),
        (args.host, &mut model.host),
        (args.vm, &mut model.machine),
        (args.ds, &mut model.datastore),
    ];
    for (value, field) in pairs {
        if let Some(value) = value {
            *field = value;
        }
    }
}

struct Overrides {
    esx: bool,
    dc: Option<usize>,
    cluster: Option<usize>,
    host: Option<usize>,
    vm: Option<usize>,
    ds: Option<usize>,
}

async fn run_server(
    config_dropshot: ConfigDropshot,
    sim: vcsim_config_toml::Config,
    log: slog::Logger,
) -> anyhow::Result<()> {
    info!(log, "Starting server...");

    let server = vcsim::start(config_dropshot, sim, log)
        .await
        .map_err(|error| anyhow!("Failed to start server: {}", error))?;

    let server_res = server.await;
    server_res.map_err(|e| anyhow!("Server exited with an error: {}", e))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Command line arguments.
    let args = Args::parse();

    match args {
        Args::OpenApi => run_openapi()
            .map_err(|e| anyhow!("Cannot generate OpenAPI spec: {}", e)),
        Args::Run { config, listen_addr, esx, dc, cluster, host, vm, ds } => {
            let mut sim = match config {
                Some(path) => vcsim_config_toml::parse(path)?,
                None => vcsim_config_toml::Config::default(),
            };
            apply_overrides(&mut sim, Overrides { esx, dc, cluster, host, vm, ds });
            sim.validate()?;

            // Dropshot configuration.
            let config_dropshot = ConfigDropshot {
                bind_address: listen_addr,
                default_request_body_max_bytes: 256 * 1024 * 1024, // library uploads
                default_handler_task_mode: HandlerTaskMode::Detached,
                log_headers: vec![],
            };

            let log = build_logger();

            run_server(config_dropshot, sim, log).await
        }
    }
}
