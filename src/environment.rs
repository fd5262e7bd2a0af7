use anyhow::{anyhow, Context, Result};
use std::env;
use std::fmt::Display;
use std::str::FromStr;

/// Reads from the process environment, treating empty values as unset.
pub fn process_env(var: &str) -> Option<String> {
    env::var(var).ok().filter(|value| !value.trim().is_empty())
}

/// Retrieves a variable that must be set.
pub fn required_var(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Result<String> {
    lookup(var)
        .map(|value| value.trim().to_string())
        .ok_or_else(|| anyhow!("{} environment variable required", var))
}

/// Retrieves a variable, or `default` when unset.
pub fn var_or(lookup: &impl Fn(&str) -> Option<String>, var: &str, default: &str) -> String {
    lookup(var)
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| default.to_string())
}

/// Retrieves and parses a variable, or returns `default` when unset.
///
/// A value that is set but does not parse is an error rather than silently
/// falling back to the default.
pub fn parsed_var<T>(lookup: &impl Fn(&str) -> Option<String>, var: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("{}", e))
            .with_context(|| format!("Invalid value for {}: {:?}", var, raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn test_required_var() {
        let lookup = lookup_from(&[("KEY", " secret ")]);
        assert_eq!(required_var(&lookup, "KEY").unwrap(), "secret");
        let err = required_var(&lookup, "MISSING").unwrap_err();
        assert_eq!(err.to_string(), "MISSING environment variable required");
    }

    #[test]
    fn test_parsed_var() {
        let lookup = lookup_from(&[("PORT", "9000"), ("BAD", "nine")]);
        assert_eq!(parsed_var(&lookup, "PORT", 8080u16).unwrap(), 9000);
        assert_eq!(parsed_var(&lookup, "UNSET", 8080u16).unwrap(), 8080);
        let err = parsed_var(&lookup, "BAD", 8080u16).unwrap_err();
        assert!(err.to_string().contains("Invalid value for BAD"));
    }

    #[test]
    fn test_var_or() {
        let lookup = lookup_from(&[("MODEL", "custom/model")]);
        assert_eq!(var_or(&lookup, "MODEL", "x"), "custom/model");
        assert_eq!(var_or(&lookup, "UNSET", "x"), "x");
    }
}
