// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use dropshot::{
    ConfigDropshot, ConfigLogging, ConfigLoggingIfExists, ConfigLoggingLevel,
};
use slog::{o, Logger};
use vsphere_client::Client;

pub fn initialize_log(test_name: &str) -> Logger {
    let path = format!("/tmp/vcsim-{}.log", test_name);
    eprintln!("Logging at {}", path);
    let config_logging = ConfigLogging::File {
        level: ConfigLoggingLevel::Debug,
        if_exists: ConfigLoggingIfExists::Truncate,
        path: path.into(),
    };
    config_logging.to_logger(test_name).unwrap()
}

pub async fn initialize_server(
    log: &Logger,
    sim: vcsim_config_toml::Config,
) -> vcsim::Server {
    let config_dropshot = ConfigDropshot {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        ..Default::default()
    };
    vcsim::start(config_dropshot, sim, log.new(o!("component" => "server")))
        .await
        .unwrap()
}

/// A simulator with the default vCenter inventory and a client logged in
/// to it.
pub async fn connect(test_name: &str) -> (vcsim::Server, Client) {
    let log = initialize_log(test_name);
    let server = initialize_server(&log, Default::default()).await;
    let client = Client::new(
        &format!("http://{}", server.local_addr()),
        log.new(o!("component" => "client")),
    )
    .await
    .unwrap();
    client.login("user", "pass").await.unwrap();
    (server, client)
}
