//! # phonon-client
//!
//! Card manager core: the in-memory card store, transfer proposals, the
//! device channel and the coordinator that drives validation and transfer,
//! all tied together by a [`Session`].

pub mod activity;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod error;
pub mod events;
pub mod mining;
pub mod persistence;
pub mod proposal;
pub mod session;
pub mod store;

use tracing_subscriber::{fmt, EnvFilter};

pub use config::ClientConfig;
pub use device::{DeviceChannel, RedeemedPhonon, SimulatedDevice, ValidationPolicy};
pub use error::{ClientError, Result};
pub use events::SessionEvent;
pub use mining::{MiningReport, MiningStatus};
pub use session::Session;
pub use store::{CardStore, MemoryCardStore, Snapshot};

/// Install the global `fmt` subscriber.  `RUST_LOG` overrides the default
/// filter.  Calling it twice is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,phonon_client=debug,phonon_server=debug")
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
