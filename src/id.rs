//! ID generation utilities for Drillr
//!
//! Provides functions for generating identifiers for generation runs and
//! scheduler instances.

use rand::Rng;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Generate a unique generation-run ID
///
/// Format: `run-{timestamp_ms}-{random_hex}`
/// Example: `run-1738300800123-a1b2`
pub fn generate_run_id() -> String {
    let timestamp = now_ms();
    let random: u16 = rand::rng().random();
    format!("run-{}-{:04x}", timestamp, random)
}

/// Generate a scheduler instance ID for hosts that don't configure one
///
/// Format: `{prefix}-{random_hex}`
pub fn generate_instance_id(prefix: &str) -> String {
    let random: u32 = rand::rng().random();
    format!("{}-{:08x}", prefix, random)
}

/// Generate the holder name a worker writes into its pass lease
///
/// Format: `{pid}-{random_hex}`, unique per worker within and across processes
pub fn generate_lease_holder() -> String {
    let random: u32 = rand::rng().random();
    format!("{}-{:08x}", std::process::id(), random)
}

/// Settings key holding the pause flag for one subject
pub fn subject_pause_key(subject_id: i64) -> String {
    format!("pause_{}", subject_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_returns_reasonable_timestamp() {
        let ts = now_ms();
        assert!(ts > 1577836800000); // 2020-01-01
        assert!(ts < 4102444800000); // 2100-01-01
    }

    #[test]
    fn test_generate_run_id_format() {
        let id = generate_run_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "run");
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[2].len(), 4);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_run_id_uniqueness() {
        let ids: std::collections::HashSet<String> = (0..16).map(|_| generate_run_id()).collect();
        assert!(ids.len() > 1);
    }

    #[test]
    fn test_generate_instance_id_prefix() {
        let id = generate_instance_id("worker");
        assert!(id.starts_with("worker-"));
        assert_eq!(id.len(), "worker-".len() + 8);
    }

    #[test]
    fn test_lease_holder_names_the_process() {
        let holder = generate_lease_holder();
        assert!(holder.starts_with(&format!("{}-", std::process::id())));
        assert_ne!(holder, generate_lease_holder());
    }

    #[test]
    fn test_subject_pause_key() {
        assert_eq!(subject_pause_key(7), "pause_7");
    }
}
