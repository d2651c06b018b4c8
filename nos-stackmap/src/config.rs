//! Stackmap configuration

use alloc::format;

use crate::error::{Error, Result};

/// Number of reserve buffers requested at registration
pub const DEFAULT_NUM_EXTRA_BUFS: usize = 4;

/// Default netmap buffer size in bytes
pub const DEFAULT_BUF_SIZE: u32 = 2048;

/// Smallest buffer that can still carry an Ethernet frame header
pub const MIN_BUF_SIZE: u32 = 64;

/// How hardware-side events reach the stack port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StackmapMode {
    /// The stack port consumer drives wakeups: NIC interrupts notify the
    /// stack port ring directly and rxsync polls the paired hardware rings.
    #[default]
    Pull,
    /// NIC interrupts take the default bridge-wrapper path and push packets
    /// into the bridge.
    Push,
}

/// Stackmap configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackmapConfig {
    /// Notification mode
    pub mode: StackmapMode,
    /// Number of reserve ("extra") buffers to allocate on registration
    pub num_extra_bufs: usize,
    /// Size of every buffer in the arena
    pub buf_size: u32,
}

impl Default for StackmapConfig {
    fn default() -> Self {
        Self {
            mode: StackmapMode::Pull,
            num_extra_bufs: DEFAULT_NUM_EXTRA_BUFS,
            buf_size: DEFAULT_BUF_SIZE,
        }
    }
}

impl StackmapConfig {
    pub fn with_mode(mut self, mode: StackmapMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_extra_bufs(mut self, num_extra_bufs: usize) -> Self {
        self.num_extra_bufs = num_extra_bufs;
        self
    }

    pub fn with_buf_size(mut self, buf_size: u32) -> Self {
        self.buf_size = buf_size;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.buf_size < MIN_BUF_SIZE {
            return Err(Error::ConfigError(format!(
                "buffer size {} below minimum {}",
                self.buf_size, MIN_BUF_SIZE
            )));
        }
        if self.buf_size > u16::MAX as u32 + 1 {
            return Err(Error::ConfigError(format!(
                "buffer size {} does not fit a slot length",
                self.buf_size
            )));
        }
        Ok(())
    }

    pub fn is_pull(&self) -> bool {
        self.mode == StackmapMode::Pull
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StackmapConfig::default();
        assert_eq!(config.mode, StackmapMode::Pull);
        assert_eq!(config.num_extra_bufs, 4);
        assert!(config.is_pull());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = StackmapConfig::default()
            .with_mode(StackmapMode::Push)
            .with_extra_bufs(0);
        assert!(!config.is_pull());
        assert_eq!(config.num_extra_bufs, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_buf_size() {
        let config = StackmapConfig::default().with_buf_size(16);
        assert!(matches!(config.validate(), Err(Error::ConfigError(_))));
        let config = StackmapConfig::default().with_buf_size(1 << 20);
        assert!(matches!(config.validate(), Err(Error::ConfigError(_))));
    }
}
