//! Cluster View & State Machine (spec §4.4): the process-wide registry
//! of spaces, groups, nodes and file systems, and the boot/config/drain/
//! active state machine each file system moves through.

pub mod entity;
pub mod state;
pub mod view;

pub use entity::{ClusterEntity, ConfigStore, EntityKind, ErrcEdge, FileSystemStatSnapshot};
pub use state::{ActiveState, BootState, ConfigState, DrainState};
pub use view::{ClusterView, DrainSignal};
