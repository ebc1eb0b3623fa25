//! Install layout and behaviour switches.
//!
//! Everything is read from `HOMEBREW_*` environment variables so an existing Homebrew
//! prefix can be targeted directly:
//!
//! | Variable                     | Default                                   |
//! |------------------------------|-------------------------------------------|
//! | `HOMEBREW_PREFIX`            | `/opt/homebrew` (arm64), `/usr/local`     |
//! | `HOMEBREW_CELLAR`            | `$HOMEBREW_PREFIX/Cellar`                 |
//! | `HOMEBREW_LOCKS`             | `$HOMEBREW_PREFIX/var/homebrew/locks`     |
//! | `HOMEBREW_CACHE`             | `$XDG_CACHE_HOME/pourover` or `~/.cache/pourover` |
//! | `HOMEBREW_BOTTLE_DOMAIN`     | bintray bottle root                       |
//! | `HOMEBREW_BUILD_FROM_SOURCE` | off                                       |
//! | `HOMEBREW_FORCE_BOTTLE`      | off                                       |
//! | `HOMEBREW_SANDBOX`           | off                                       |
//! | `HOMEBREW_SANDBOX_WRAPPER`   | none; sandboxed builds fail without one   |

use crate::bottle::DEFAULT_ROOT_URL;
use crate::exec::SANDBOX_WRAPPER_ENV;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub prefix: PathBuf,
    pub cellar: PathBuf,
    pub locks: PathBuf,
    pub cache: PathBuf,
    pub bottle_domain: String,
    pub build_from_source: bool,
    pub force_bottle: bool,
    pub sandbox: bool,
    /// Argv prefixed to sandboxed commands, e.g. `sandbox-exec -f build.sb`
    pub sandbox_wrapper: Option<Vec<String>>,
}

impl Config {
    pub fn from_env() -> Self {
        let prefix = detect_prefix();
        let mut config = Self::with_prefix(&prefix);

        if let Some(cellar) = env_path("HOMEBREW_CELLAR") {
            config.cellar = cellar;
        }
        if let Some(locks) = env_path("HOMEBREW_LOCKS") {
            config.locks = locks;
        }
        config.cache = env_path("HOMEBREW_CACHE").unwrap_or_else(default_cache_dir);
        if let Some(domain) = std::env::var("HOMEBREW_BOTTLE_DOMAIN")
            .ok()
            .filter(|d| !d.is_empty())
        {
            config.bottle_domain = domain;
        }
        config.build_from_source = env_flag("HOMEBREW_BUILD_FROM_SOURCE");
        config.force_bottle = env_flag("HOMEBREW_FORCE_BOTTLE");
        config.sandbox = env_flag("HOMEBREW_SANDBOX");
        config.sandbox_wrapper = std::env::var(SANDBOX_WRAPPER_ENV)
            .ok()
            .and_then(|v| parse_wrapper(&v));

        config
    }

    /// Self-contained layout rooted at `prefix`, cache included
    pub fn with_prefix(prefix: &Path) -> Self {
        Self {
            prefix: prefix.to_path_buf(),
            cellar: prefix.join("Cellar"),
            locks: prefix.join("var").join("homebrew").join("locks"),
            cache: prefix.join("cache"),
            bottle_domain: DEFAULT_ROOT_URL.to_string(),
            build_from_source: false,
            force_bottle: false,
            sandbox: false,
            sandbox_wrapper: None,
        }
    }

    pub fn opt_dir(&self) -> PathBuf {
        self.prefix.join("opt")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Detect the Homebrew prefix on this system
pub fn detect_prefix() -> PathBuf {
    if let Some(prefix) = env_path("HOMEBREW_PREFIX") {
        return prefix;
    }

    #[cfg(target_arch = "aarch64")]
    {
        PathBuf::from("/opt/homebrew")
    }
    #[cfg(not(target_arch = "aarch64"))]
    {
        PathBuf::from("/usr/local")
    }
}

/// Get the cache directory (~/.cache/pourover/ or equivalent)
pub fn default_cache_dir() -> PathBuf {
    if let Some(cache_home) = std::env::var_os("XDG_CACHE_HOME") {
        PathBuf::from(cache_home).join("pourover")
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".cache/pourover")
    } else {
        PathBuf::from(".cache/pourover")
    }
}

/// Split a wrapper command line on whitespace; blank means no wrapper
pub fn parse_wrapper(value: &str) -> Option<Vec<String>> {
    let argv: Vec<String> = value.split_whitespace().map(String::from).collect();
    (!argv.is_empty()).then_some(argv)
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var_os(name)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_prefix_layout() {
        let config = Config::with_prefix(Path::new("/tmp/brew"));
        assert_eq!(config.cellar, PathBuf::from("/tmp/brew/Cellar"));
        assert_eq!(config.locks, PathBuf::from("/tmp/brew/var/homebrew/locks"));
        assert_eq!(config.opt_dir(), PathBuf::from("/tmp/brew/opt"));
        assert!(!config.build_from_source);
        assert!(!config.sandbox);
        assert!(config.sandbox_wrapper.is_none());
    }

    #[test]
    fn test_parse_wrapper() {
        assert_eq!(
            parse_wrapper("sandbox-exec  -f /etc/build.sb"),
            Some(vec![
                "sandbox-exec".to_string(),
                "-f".to_string(),
                "/etc/build.sb".to_string()
            ])
        );
        assert_eq!(parse_wrapper("   "), None);
    }

    #[test]
    fn test_detect_prefix() {
        let prefix = detect_prefix();
        assert!(!prefix.as_os_str().is_empty());
    }

    #[test]
    fn test_cache_dir_is_namespaced() {
        assert!(default_cache_dir().ends_with("pourover"));
    }
}
