//! Master execution core for a distributed DAG workflow scheduler: binds the
//! per-process `DagEngine` (in `dagmaster-engine`) and the cluster failover
//! controller (in `dagmaster-coord`) into one long-running server process.

mod command_source;
mod config;
mod errors;
mod master_server;

pub use command_source::{CommandSource, InMemoryCommandSource};
pub use config::{load as load_config, ConfigSources, CoordinationSection, DatabaseSection, MasterConfig, MasterSection};
pub use errors::{MasterError, MasterResult};
pub use master_server::MasterServer;
