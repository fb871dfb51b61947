//! Configuration for one routing-table synchronization instance: which
//! kernel table and address family it owns, how it scans, and how it
//! tags and throttles its own traffic.

use crate::error::Error;
use derive_builder::Builder;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanMode {
    /// Periodic full dump, the portable default.
    Poll,
    /// Dump once at startup, then rely on the multicast async socket.
    /// Requires a kernel that reliably delivers notifications for the
    /// tables this instance owns.
    Inotify,
}

/// One instance's view of the kernel: which `(family, table)` pair it
/// owns, how often it scans, and what it stamps onto routes it
/// installs.
#[derive(Clone, Debug, Builder)]
#[builder(build_fn(error = "Error"))]
pub struct KrtConfig {
    pub family: u16,
    #[builder(default = "crate::route::RT_TABLE_MAIN")]
    pub table: u32,
    #[builder(default = "ScanMode::Poll")]
    pub scan_mode: ScanMode,
    #[builder(default = "60")]
    pub scan_period_secs: u32,
    /// Metric this instance's own routes are installed with, letting it
    /// tell them apart from ones an operator or another daemon added to
    /// the same table.
    #[builder(default = "0")]
    pub priority: u32,
    /// Whether to also learn routes this instance didn't install,
    /// reporting them to the owner as foreign routes rather than
    /// ignoring them outright.
    #[builder(default = "false")]
    pub learn: bool,
}

impl KrtConfig {
    #[must_use]
    pub fn builder() -> KrtConfigBuilder {
        KrtConfigBuilder::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_fills_in_defaults() {
        let cfg = KrtConfig::builder().family(2).build().unwrap();
        assert_eq!(cfg.table, crate::route::RT_TABLE_MAIN);
        assert_eq!(cfg.scan_mode, ScanMode::Poll);
        assert_eq!(cfg.scan_period_secs, 60);
    }

    #[test]
    fn builder_rejects_a_missing_required_field() {
        assert!(KrtConfigBuilder::default().build().is_err());
    }
}
