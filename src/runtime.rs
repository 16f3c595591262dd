//! Environment-based runtime tuning.
//!
//! Two knobs control the coroutine layer:
//!
//! - `PORTICO_STACK_SIZE`: stack size in bytes for connection and dispatch
//!   coroutines. Accepts decimal (`65536`) or hex (`0x10000`). Default 64 KB.
//! - `PORTICO_DISPATCH_WORKERS`: number of dispatch coroutines sharing the
//!   engine hand-off queue. Default 4.

use std::env;

const DEFAULT_STACK_SIZE: usize = 0x10000;
const DEFAULT_DISPATCH_WORKERS: usize = 4;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// Stack size for coroutines in bytes.
    pub stack_size: usize,
    /// Number of dispatch-pool worker coroutines.
    pub dispatch_workers: usize,
}

impl RuntimeOptions {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let stack_size = env::var("PORTICO_STACK_SIZE")
            .ok()
            .and_then(|s| parse_size(&s))
            .unwrap_or(DEFAULT_STACK_SIZE);
        let dispatch_workers = env::var("PORTICO_DISPATCH_WORKERS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_DISPATCH_WORKERS);
        RuntimeOptions {
            stack_size,
            dispatch_workers,
        }
    }
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        RuntimeOptions {
            stack_size: DEFAULT_STACK_SIZE,
            dispatch_workers: DEFAULT_DISPATCH_WORKERS,
        }
    }
}

fn parse_size(value: &str) -> Option<usize> {
    if let Some(hex) = value.strip_prefix("0x") {
        usize::from_str_radix(hex, 16).ok()
    } else {
        value.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size_decimal_and_hex() {
        assert_eq!(parse_size("65536"), Some(65536));
        assert_eq!(parse_size("0x4000"), Some(0x4000));
        assert_eq!(parse_size("bogus"), None);
    }
}
