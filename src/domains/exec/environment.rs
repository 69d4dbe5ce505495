use crate::errors::WerkbankError;
use std::collections::HashMap;

/// Environment variables always present in spawned processes, captured from
/// the parent. Everything else the parent inherited is dropped.
const SAFE_BASELINE: &[&str] = &["PATH", "HOME", "USER", "LANG", "TMPDIR"];

pub fn is_valid_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Build the environment for a spawned command: safe baseline overlaid with
/// validated caller-supplied pairs. Rejects malformed keys and NUL bytes in
/// values before anything is spawned.
pub fn build_environment(
    caller_env: &HashMap<String, String>,
) -> Result<HashMap<String, String>, WerkbankError> {
    let mut env = HashMap::new();
    for key in SAFE_BASELINE {
        if let Ok(value) = std::env::var(key) {
            env.insert((*key).to_string(), value);
        }
    }

    for (key, value) in caller_env {
        if !is_valid_env_key(key) {
            return Err(WerkbankError::EnvironmentRejected {
                key: key.clone(),
                message: "key must match [A-Za-z_][A-Za-z0-9_]*".to_string(),
            });
        }
        if value.contains('\0') {
            return Err(WerkbankError::EnvironmentRejected {
                key: key.clone(),
                message: "value contains a NUL byte".to_string(),
            });
        }
        env.insert(key.clone(), value.clone());
    }

    Ok(env)
}
