//! Environment variable utilities
//!
//! ```ignore
//! use ringchan::env::env_get;
//!
//! let entries: u32 = env_get("RINGCHAN_SQ_ENTRIES", 256);
//! ```

use std::str::FromStr;

/// Get environment variable parsed as type T, or return default.
///
/// Unset and unparsable values both fall back to `default`.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_returns_default() {
        let val: usize = env_get("__RINGCHAN_TEST_UNSET__", 42);
        assert_eq!(val, 42);
    }

    #[test]
    fn parses_and_falls_back() {
        std::env::set_var("__RINGCHAN_TEST_NUM__", "123");
        assert_eq!(env_get::<u32>("__RINGCHAN_TEST_NUM__", 0), 123);
        std::env::set_var("__RINGCHAN_TEST_NUM__", "lots");
        assert_eq!(env_get::<u32>("__RINGCHAN_TEST_NUM__", 7), 7);
        std::env::remove_var("__RINGCHAN_TEST_NUM__");
    }
}
