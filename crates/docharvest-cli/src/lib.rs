//! docharvest command line. Configuration, credentials, portal adapters and
//! the harvest loop on top of the `docharvest` core.

pub mod config;
pub mod credentials;
pub mod harvest;
pub mod portals;
pub mod prompt;
pub mod records;
pub mod rename;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{resolve_config_path, HarvestConfig};
pub use harvest::{run, RunOptions, Summary};
pub use portals::{Portal, PortalKind};
pub use records::RecordWriter;
pub use rename::TemplateRenamer;
