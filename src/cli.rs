//! Command line interface for the `pipeframe` chat server binary.
//!
//! Also compiled by `build.rs` to generate the manual page, so it depends on
//! nothing but `clap` and `std`.

use std::net::SocketAddr;

use clap::Parser;

/// Command line arguments for the `pipeframe` binary.
#[derive(Debug, Parser)]
#[command(
    name = "pipeframe",
    version,
    about = "Line-based chat server built on pipeframe pipelines"
)]
pub struct Cli {
    /// Address to listen on.
    #[arg(short, long, default_value = "127.0.0.1:7878")]
    pub bind: SocketAddr,

    /// Seconds without traffic before a heartbeat is sent; 0 disables it.
    #[arg(long, default_value_t = 60)]
    pub idle_secs: u64,

    /// Do not echo a member's own lines back to it.
    #[arg(long)]
    pub no_echo: bool,

    /// Longest accepted line in bytes.
    #[arg(long, default_value_t = 8192)]
    pub max_line: usize,

    /// Capacity of each connection's outbound mailbox.
    #[arg(long, default_value_t = 1024)]
    pub mailbox: usize,

    /// Serve Prometheus metrics on this address.
    #[arg(long)]
    pub metrics: Option<SocketAddr>,
}
