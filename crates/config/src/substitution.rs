use anyhow::{Context, Result};
use regex::{Captures, Regex};
use std::env;
use tracing::{debug, warn};

const ENV_VAR_PATTERN: &str = r"\$\{(\w+)\}|\$(\w+)";

/// Substitute environment variables in the format ${VAR_NAME} or $VAR_NAME.
///
/// Unset variables keep their placeholder so the validator can report them.
pub fn substitute_env_vars(content: &str) -> Result<String> {
    let re = Regex::new(ENV_VAR_PATTERN).context("Invalid environment variable pattern")?;
    let mut missing_vars = Vec::new();

    let result = re.replace_all(content, |caps: &Captures| {
        let placeholder = &caps[0];
        let var_name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();

        match env::var(var_name) {
            Ok(value) => {
                debug!("Substituting environment variable: {}", var_name);
                value
            }
            Err(_) => {
                warn!("Environment variable '{}' not set", var_name);
                missing_vars.push(var_name.to_string());
                placeholder.to_string()
            }
        }
    });

    if !missing_vars.is_empty() {
        debug!(
            "Environment variables not set (may use defaults or fail validation): {:?}",
            missing_vars
        );
    }

    Ok(result.into_owned())
}

/// Get environment variable with a default value
pub fn get_env_or_default(var_name: &str, default: &str) -> String {
    match env::var(var_name) {
        Ok(value) => value,
        Err(_) => {
            debug!(
                "Environment variable '{}' not set, using default: \"{}\"",
                var_name, default
            );
            default.to_string()
        }
    }
}

/// Check if a string contains unresolved environment variable placeholders
pub fn has_unresolved_env_vars(content: &str) -> bool {
    Regex::new(ENV_VAR_PATTERN)
        .map(|re| re.is_match(content))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitutes_braced_and_bare_vars() {
        env::set_var("G6_TEST_SUB_KEY", "abc123");
        let out = substitute_env_vars("key: ${G6_TEST_SUB_KEY}\nother: $G6_TEST_SUB_KEY").unwrap();
        assert_eq!(out, "key: abc123\nother: abc123");
    }

    #[test]
    fn test_missing_var_keeps_placeholder() {
        env::remove_var("G6_TEST_SUB_MISSING");
        let out = substitute_env_vars("token: ${G6_TEST_SUB_MISSING}").unwrap();
        assert_eq!(out, "token: ${G6_TEST_SUB_MISSING}");
        assert!(has_unresolved_env_vars(&out));
    }

    #[test]
    fn test_get_env_or_default() {
        env::remove_var("G6_TEST_SUB_DEFAULT");
        assert_eq!(get_env_or_default("G6_TEST_SUB_DEFAULT", "fallback"), "fallback");
    }
}
