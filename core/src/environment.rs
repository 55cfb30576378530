//! Dependency injection helpers.
//!
//! The environment is whatever bundle of clients and services a store is
//! constructed with. The core never looks inside it except through a
//! [`Dependency`] key naming one of its fields.

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability
///
/// # Examples
///
/// ```ignore
/// // Production - uses system clock
/// let clock = SystemClock;
///
/// // Test - fixed time for deterministic tests
/// struct FixedClock { time: DateTime<Utc> }
/// impl Clock for FixedClock {
///     fn now(&self) -> DateTime<Utc> {
///         self.time
///     }
/// }
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Names one dependency inside an environment `E`.
///
/// # Example
///
/// ```
/// use composable_store_core::environment::{Dependency, with_dependency};
///
/// struct AppEnvironment {
///     base_url: String,
///     retries: u32,
/// }
///
/// struct BaseUrl;
///
/// impl Dependency<AppEnvironment> for BaseUrl {
///     type Value = String;
///
///     fn resolve(env: &AppEnvironment) -> &String {
///         &env.base_url
///     }
/// }
///
/// let env = AppEnvironment { base_url: "https://api.test".into(), retries: 3 };
/// let host = with_dependency::<BaseUrl, _, _>(&env, |url| url.trim_start_matches("https://").to_string());
/// assert_eq!(host, "api.test");
/// ```
pub trait Dependency<E> {
    /// Type of the dependency
    type Value;

    /// Borrow the dependency out of the environment
    fn resolve(env: &E) -> &Self::Value;
}

/// Apply `body` to one dependency of `env`.
pub fn with_dependency<K, E, T>(env: &E, body: impl FnOnce(&K::Value) -> T) -> T
where
    K: Dependency<E>,
{
    body(K::resolve(env))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
