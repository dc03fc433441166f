// crates/ledger-core/src/secrets.rs
// ============================================================================
// Module: Secrets
// Description: Resolves secret references without the core ever handling
//              or storing raw values.
// Purpose: Let a handler ask for `env:NEO4J_PASSWORD` at execute time
//          without the ledger, bundle, or any event ever seeing the value.
// Dependencies: none beyond std
// ============================================================================

//! ## Overview
//! A [`SecretsProvider`] resolves a reference string to a value, or declines
//! to handle it. The harness never stores a resolved value; it is handed to
//! the executing handler and discarded. [`CompositeSecretsProvider`] tries a
//! list of providers in order and returns the first resolved value.

// ============================================================================
// SECTION: SecretsProvider
// ============================================================================

/// Resolves secret references to values.
pub trait SecretsProvider {
    /// Returns true if this provider recognizes the shape of `reference`
    /// (e.g. an `env:` prefix), independent of whether the value is
    /// actually set.
    fn supports(&self, reference: &str) -> bool;

    /// Resolves `reference` to a value, or `None` if unset.
    fn get(&self, reference: &str) -> Option<String>;
}

// ============================================================================
// SECTION: EnvSecretsProvider
// ============================================================================

const ENV_PREFIX: &str = "env:";

/// Resolves `env:VAR_NAME` references from the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSecretsProvider;

impl SecretsProvider for EnvSecretsProvider {
    fn supports(&self, reference: &str) -> bool {
        reference.starts_with(ENV_PREFIX)
    }

    fn get(&self, reference: &str) -> Option<String> {
        let var_name = reference.strip_prefix(ENV_PREFIX)?;
        std::env::var(var_name).ok()
    }
}

// ============================================================================
// SECTION: CompositeSecretsProvider
// ============================================================================

/// Tries a list of providers in order, returning the first resolved value.
///
/// The default composition is a single [`EnvSecretsProvider`].
pub struct CompositeSecretsProvider {
    providers: Vec<Box<dyn SecretsProvider + Send + Sync>>,
}

impl Default for CompositeSecretsProvider {
    fn default() -> Self {
        Self { providers: vec![Box::new(EnvSecretsProvider)] }
    }
}

impl CompositeSecretsProvider {
    /// Creates a composite provider wrapping `providers` in priority order.
    #[must_use]
    pub fn new(providers: Vec<Box<dyn SecretsProvider + Send + Sync>>) -> Self {
        Self { providers }
    }

    /// Appends another provider, tried after every existing one.
    pub fn push(&mut self, provider: Box<dyn SecretsProvider + Send + Sync>) {
        self.providers.push(provider);
    }
}

impl SecretsProvider for CompositeSecretsProvider {
    fn supports(&self, reference: &str) -> bool {
        self.providers.iter().any(|provider| provider.supports(reference))
    }

    fn get(&self, reference: &str) -> Option<String> {
        self.providers.iter().find_map(|provider| provider.get(reference))
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "tests assert against deterministic fixtures")]
    #![allow(unsafe_code, reason = "std::env::set_var/remove_var are unsafe; tests run single-threaded per-process env mutation")]

    use super::*;

    struct StaticProvider {
        prefix: &'static str,
        value: &'static str,
    }

    impl SecretsProvider for StaticProvider {
        fn supports(&self, reference: &str) -> bool {
            reference.starts_with(self.prefix)
        }

        fn get(&self, reference: &str) -> Option<String> {
            if self.supports(reference) { Some(self.value.to_owned()) } else { None }
        }
    }

    #[test]
    fn env_provider_resolves_set_variable() {
        // SAFETY: test runs single-threaded; no concurrent env readers.
        unsafe {
            std::env::set_var("LEDGER_CORE_TEST_SECRET", "hunter2");
        }
        let provider = EnvSecretsProvider;
        assert_eq!(provider.get("env:LEDGER_CORE_TEST_SECRET").as_deref(), Some("hunter2"));
        // SAFETY: test runs single-threaded; no concurrent env readers.
        unsafe {
            std::env::remove_var("LEDGER_CORE_TEST_SECRET");
        }
    }

    #[test]
    fn env_provider_declines_unset_variable() {
        // SAFETY: test runs single-threaded; no concurrent env readers.
        unsafe {
            std::env::remove_var("LEDGER_CORE_TEST_SECRET_UNSET");
        }
        let provider = EnvSecretsProvider;
        assert_eq!(provider.get("env:LEDGER_CORE_TEST_SECRET_UNSET"), None);
    }

    #[test]
    fn env_provider_does_not_support_non_env_references() {
        let provider = EnvSecretsProvider;
        assert!(!provider.supports("vault:some-secret"));
    }

    #[test]
    fn composite_provider_returns_first_resolved_value() {
        let composite = CompositeSecretsProvider::new(vec![
            Box::new(StaticProvider { prefix: "vault:", value: "first" }),
            Box::new(StaticProvider { prefix: "vault:", value: "second" }),
        ]);
        assert_eq!(composite.get("vault:x").as_deref(), Some("first"));
    }

    #[test]
    fn default_composite_provider_wraps_env_provider() {
        // SAFETY: test runs single-threaded; no concurrent env readers.
        unsafe {
            std::env::set_var("LEDGER_CORE_TEST_SECRET_DEFAULT", "value");
        }
        let composite = CompositeSecretsProvider::default();
        assert_eq!(composite.get("env:LEDGER_CORE_TEST_SECRET_DEFAULT").as_deref(), Some("value"));
        // SAFETY: test runs single-threaded; no concurrent env readers.
        unsafe {
            std::env::remove_var("LEDGER_CORE_TEST_SECRET_DEFAULT");
        }
    }
}
