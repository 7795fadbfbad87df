#![doc = include_str!("../README.md")]
#![warn(unreachable_pub)]
#![warn(unused_import_braces)]

pub mod antibot;
pub mod callbacks;
pub mod clock;
pub mod config;
pub mod error;
pub mod l4;
pub mod l7;
pub mod manager;
pub mod packet_filter;
pub mod state;
pub mod stats;
pub mod types;
pub mod verify;

#[cfg(feature = "tracing-init")]
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}
