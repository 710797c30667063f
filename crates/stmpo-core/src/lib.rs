pub mod error;
pub use error::{ConfigError, HostError, TopologyError};

pub mod host;
pub use host::query_host_resources;

pub mod topology;
pub use topology::{load_topology, load_topology_best_effort};

pub mod planner;
pub use planner::{PlanConfig, plan};

pub mod splitter;
pub use splitter::split;

pub mod affinity;
pub use affinity::allocate;
