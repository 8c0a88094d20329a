//! Default values for configuration parameters
//!
//! This module centralizes the default values used by the router CLI and the
//! socket tuning applied to router and client connections.

// Router configuration defaults

/// Default bind host; `*` binds all interfaces
pub fn default_host() -> String {
    "*".to_string()
}

/// Default router port
pub fn default_port() -> u16 {
    8080
}

/// Default heartbeat timeout (60 seconds) before an assigned task is
/// returned to its queue
pub fn default_heartbeat_timeout() -> u64 {
    60
}

// TCP keepalive tuning, applied to the router's listening socket and the
// client's outgoing connections to detect half-open peers

/// Unacknowledged keepalive probes before a connection is considered dead
pub fn keepalive_probe_count() -> u32 {
    3
}

/// Idle seconds after the last data packet before the first keepalive probe
pub fn keepalive_idle_seconds() -> u64 {
    60
}

/// Seconds between subsequent keepalive probes
pub fn keepalive_interval_seconds() -> u64 {
    60
}
