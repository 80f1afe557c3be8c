//! Configuration sourced from the CLI.

use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct Cli {
    /// Base URL of the Consul-compatible HTTP KV endpoint.
    #[arg(long, default_value = "http://127.0.0.1:8500")]
    pub consul_addr: String,

    /// KV prefix under which node records are published.
    #[arg(long, default_value = "condo/nodes")]
    pub nodes_prefix: String,

    /// KV prefix under which role records are published.
    #[arg(long, default_value = "condo/roles")]
    pub roles_prefix: String,

    /// KV prefix under which materialized service documents are written.
    #[arg(long, default_value = "condo/services")]
    pub services_prefix: String,

    /// Blocking-query wait time used for every long poll against Consul.
    #[arg(long, default_value = "300")]
    pub long_poll_wait_secs: u64,

    /// TCP port for the read-only diagnostic query endpoint. Omit to
    /// disable the endpoint entirely.
    #[arg(long)]
    pub query_port: Option<u16>,
}

impl Cli {
    pub fn long_poll_wait(&self) -> Duration {
        Duration::from_secs(self.long_poll_wait_secs)
    }
}
