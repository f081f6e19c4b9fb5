pub mod generate;
pub mod parse;
pub mod types;

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub use parse::{load_config, parse_config, ConfigError};
pub use types::Config;

/// Matches `$env{VAR_NAME}` references
pub(crate) fn env_var_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env var regex is valid"))
}

/// Expands environment variables in a string.
/// Supports $env{VAR_NAME} syntax.
/// If an environment variable is not set, it's left unchanged.
pub fn expand_env_vars(text: &str) -> String {
    env_var_regex()
        .replace_all(text, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
        })
        .to_string()
}

/// Expands tilde (~) in paths to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if let Some(rest) = path_str.strip_prefix("~/") {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(rest);
        }
    } else if path_str == "~" {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir;
        }
    }

    path.to_path_buf()
}

/// Resolves the config file path based on explicit argument or default locations.
/// Returns the first existing path from:
/// 1. Explicit path (if provided, with tilde expansion)
/// 2. ~/.config/logsift/config.yml
/// 3. /etc/logsift/config.yml
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(expand_tilde(path));
    }

    if let Some(home_dir) = dirs::home_dir() {
        let user_config = home_dir.join(".config/logsift/config.yml");
        if user_config.exists() {
            return Some(user_config);
        }
    }

    let system_config = PathBuf::from("/etc/logsift/config.yml");
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_expand_env_vars_single() {
        std::env::set_var("LOGSIFT_TEST_VAR", "test_value");
        let result = expand_env_vars("token: $env{LOGSIFT_TEST_VAR}");
        assert_eq!(result, "token: test_value");
        std::env::remove_var("LOGSIFT_TEST_VAR");
    }

    #[test]
    fn test_expand_env_vars_unset_left_alone() {
        let result = expand_env_vars("path/$env{LOGSIFT_NONEXISTENT_VAR}/file");
        assert_eq!(result, "path/$env{LOGSIFT_NONEXISTENT_VAR}/file");
    }

    #[test]
    fn test_expand_env_vars_ignores_plain_braces() {
        let result = expand_env_vars("${not_an_env_var}");
        assert_eq!(result, "${not_an_env_var}");
    }

    #[test]
    fn test_expand_tilde_with_path() {
        let expanded = expand_tilde(Path::new("~/logs/app.log"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expanded, home.join("logs/app.log"));
        }
    }

    #[test]
    fn test_expand_tilde_no_expansion() {
        assert_eq!(
            expand_tilde(Path::new("/var/log/app.log")),
            Path::new("/var/log/app.log")
        );
    }

    #[test]
    fn test_explicit_config_path_wins() {
        let resolved = resolve_config_path(Some(Path::new("/tmp/custom.yml")));
        assert_eq!(resolved, Some(PathBuf::from("/tmp/custom.yml")));
    }
}
