//! gRPC service implementations.

pub mod agent_svc;
pub mod bootstrap_svc;
pub mod metadata;
pub mod watch_svc;

pub use agent_svc::AgentServiceImpl;
pub use bootstrap_svc::BootstrapServiceImpl;
pub use watch_svc::WatchServiceImpl;
