//! Logging initialisation for the library
//!
//! The engines log through `tracing`; this module wires a subscriber for
//! binaries that do not bring their own. `RUST_LOG` overrides the level
//! passed in.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{ModbusError, ModbusResult};

/// Initialise the logging system
///
/// An empty filter string is rejected rather than silently accepted.
pub fn init(level: &str) -> ModbusResult<()> {
    if level.trim().is_empty() {
        return Err(ModbusError::configuration("log filter must not be empty"));
    }

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| ModbusError::configuration(format!("logging init failed: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_rejected() {
        assert!(matches!(init(""), Err(ModbusError::Configuration { .. })));
        assert!(matches!(init("   "), Err(ModbusError::Configuration { .. })));
    }
}
