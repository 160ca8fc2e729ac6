//! Replication topology: descriptors, edges, snapshots and the edge store

mod builder;
mod store;
mod types;

pub use builder::{ClusterBuilder, ReplicateConfigurationBuilder};
pub use store::{reverse_edges, TopologyStore};
pub use types::{
    parse_pchannel, pchannel_name, pchannel_names, ClusterDescriptor, ConnectionParam,
    TopologyEdge, TopologySnapshot, PCHANNEL_INFIX,
};
