pub mod alerts;
pub mod ber;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod device;
pub mod poller;
pub mod prober;
pub mod snapshot;
pub mod snmp;
pub mod status;
pub mod sweep;
pub mod uplink;

#[cfg(test)]
mod classifier_tests;
#[cfg(test)]
mod prober_tests;
#[cfg(test)]
mod status_tests;
#[cfg(test)]
mod sweep_tests;
#[cfg(test)]
mod test_support;

pub use alerts::{AlertBadge, AlertBoard, CriticalAlert};
pub use cache::{
    bearer_token, CacheRead, Clock, IngestCache, IngestError, ManualClock, PushAck, SharedSecret,
    SystemClock,
};
pub use config::{
    require_secret, CacheConfig, ConfigError, PollerConfig, ProberConfig, SnmpSettings,
    SnmpVersion, SweepConfig,
};
pub use device::{load_devices, validate_devices, Device};
pub use poller::{FleetTracker, Poller};
pub use prober::{FallbackProber, ProbeOutcome};
pub use snapshot::{
    AgentInfo, DeviceState, DiagnosticResult, DiagnosticTest, ErrorDetail, FailureClass,
    FleetSnapshot, PaperStatus, Provenance, Severity, StatusSnapshot, TestStatus,
};
pub use snmp::{GetResponse, SnmpClient, SnmpError, UdpSnmpClient};
pub use status::{FallbackReason, HybridStatus, StatusService};
pub use sweep::{
    ConnectivityDiagnostic, ProbeReply, Reachability, ReachabilityClass, StaticReachability,
    SweepReport, TcpReachability,
};
pub use uplink::{Uplink, UplinkError};
