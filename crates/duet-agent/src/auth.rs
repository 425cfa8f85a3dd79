//! Bearer credential lookup for the chat-completion backend
//!
//! The credential is supplied out of band through the environment:
//! 1. The variable named in `[models] api_key_env` (default `DUET_API_KEY`)
//! 2. `OPENROUTER_API_KEY`
//! 3. `OPENAI_API_KEY`

use std::env;

const FALLBACK_KEY_VARS: [&str; 2] = ["OPENROUTER_API_KEY", "OPENAI_API_KEY"];

/// Get the bearer token for the backend, if one is configured
///
/// Local backends often need no credential, so a missing token is not an error.
pub fn get_auth_token(api_key_env: &str) -> Option<String> {
    std::iter::once(api_key_env)
        .chain(FALLBACK_KEY_VARS)
        .find_map(|name| {
            env::var(name)
                .ok()
                .filter(|value| !value.trim().is_empty())
                .inspect(|_| tracing::debug!("Using credential from {}", name))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard};

    static ENV: Mutex<()> = Mutex::new(());

    /// Overrides credential variables for one test and restores them on drop,
    /// including when the test panics
    struct EnvGuard {
        saved: Vec<(String, Option<String>)>,
        _lock: MutexGuard<'static, ()>,
    }

    impl EnvGuard {
        fn set(vars: &[(&str, Option<&str>)]) -> Self {
            // A failed test poisons the lock but has already restored its vars
            let lock = ENV.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let saved = vars
                .iter()
                .map(|(name, value)| {
                    let previous = env::var(name).ok();
                    apply(name, *value);
                    (name.to_string(), previous)
                })
                .collect();
            Self { saved, _lock: lock }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, previous) in self.saved.drain(..).rev() {
                apply(&name, previous.as_deref());
            }
        }
    }

    fn apply(name: &str, value: Option<&str>) {
        match value {
            Some(v) => env::set_var(name, v),
            None => env::remove_var(name),
        }
    }

    #[test]
    fn test_configured_var_wins() {
        let _env = EnvGuard::set(&[
            ("DUET_TEST_KEY", Some("configured")),
            ("OPENROUTER_API_KEY", Some("router")),
        ]);
        assert_eq!(get_auth_token("DUET_TEST_KEY").as_deref(), Some("configured"));
    }

    #[test]
    fn test_fallback_order() {
        let _env = EnvGuard::set(&[
            ("DUET_TEST_KEY", None),
            ("OPENROUTER_API_KEY", None),
            ("OPENAI_API_KEY", Some("openai")),
        ]);
        assert_eq!(get_auth_token("DUET_TEST_KEY").as_deref(), Some("openai"));
    }

    #[test]
    fn test_blank_values_are_ignored() {
        let _env = EnvGuard::set(&[
            ("DUET_TEST_KEY", Some("  ")),
            ("OPENROUTER_API_KEY", None),
            ("OPENAI_API_KEY", None),
        ]);
        assert!(get_auth_token("DUET_TEST_KEY").is_none());
    }

    #[test]
    fn test_overrides_are_restored_after_panic() {
        let outcome = std::panic::catch_unwind(|| {
            let _env = EnvGuard::set(&[("DUET_RESTORE_KEY", Some("inside"))]);
            assert_eq!(get_auth_token("DUET_RESTORE_KEY").as_deref(), Some("inside"));
            panic!("test body failed");
        });
        assert!(outcome.is_err());

        let _env = EnvGuard::set(&[]);
        assert!(env::var("DUET_RESTORE_KEY").is_err());
    }
}
