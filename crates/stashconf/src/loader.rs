//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, StashConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided, it replaces the local override. It is returned
/// even if missing so the caller gets a read error instead of silent defaults.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/stash/config.toml");
    if system.exists() {
        files.push(system);
    }

    // User config (XDG_CONFIG_HOME or ~/.config)
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("stash/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        files.push(path.to_path_buf());
        return files;
    }

    let local = PathBuf::from("stash.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load `files` in order over the defaults, then apply env overrides read
/// through `lookup`.
pub fn load_layers(
    files: &[PathBuf],
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(StashConfig, ConfigSources), ConfigError> {
    let mut sources = ConfigSources::default();
    let mut merged = toml::Table::new();

    for path in files {
        let table = load_table(path)?;
        merge_tables(&mut merged, table);
        sources.files.push(path.clone());
    }

    let mut config: StashConfig =
        toml::Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: files.last().cloned().unwrap_or_default(),
                message: e.to_string(),
            })?;

    config.paths.storage_dir = expand_path(&config.paths.storage_dir.to_string_lossy());

    apply_env_overrides(&mut config, &mut sources, lookup)?;
    config.validate()?;

    Ok((config, sources))
}

/// Read and parse one TOML file, checking it against the config schema.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_table(&contents, path)
}

fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    let parse_error = |e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    let table: toml::Table = contents.parse().map_err(parse_error)?;

    // Type errors surface against the file that caused them, not the merge.
    let _: StashConfig = toml::Value::Table(table.clone())
        .try_into()
        .map_err(parse_error)?;

    Ok(table)
}

/// Deep-merge `overlay` into `base`. Nested tables merge key by key; any
/// other value in `overlay` replaces the one in `base`.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key: key.to_string(),
        message: format!("{value:?}: {e}"),
    })
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(
    config: &mut StashConfig,
    sources: &mut ConfigSources,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    let mut take = |key: &str| {
        let value = lookup(key)?;
        sources.env_overrides.push(key.to_string());
        Some(value)
    };

    if let Some(v) = take("STASH_STORAGE_DIR") {
        config.paths.storage_dir = expand_path(&v);
    }
    if let Some(v) = take("STASH_STORE_METADATA") {
        config.storage.store_metadata = parse_env("STASH_STORE_METADATA", &v)?;
    }

    if let Some(v) = take("STASH_HOST") {
        config.bind.host = v;
    }
    if let Some(v) = take("STASH_PORT") {
        config.bind.port = parse_env("STASH_PORT", &v)?;
    }

    if let Some(v) = take("STASH_OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = Some(v).filter(|v| !v.is_empty());
    }
    if let Some(v) = take("STASH_LOG_LEVEL") {
        config.telemetry.log_level = v;
    }
    // Also support RUST_LOG
    if let Some(v) = take("RUST_LOG") {
        config.telemetry.log_level = v;
    }

    if let Some(v) = take("STASH_TRANSFER_LIMIT") {
        config.admission.transfer_limit = parse_env("STASH_TRANSFER_LIMIT", &v)?;
    }
    if let Some(v) = take("STASH_LISTING_LIMIT") {
        config.admission.listing_limit = parse_env("STASH_LISTING_LIMIT", &v)?;
    }
    if let Some(v) = take("STASH_STATS_INTERVAL_SECS") {
        config.admission.stats_interval_secs = parse_env("STASH_STATS_INTERVAL_SECS", &v)?;
    }

    Ok(())
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            home.join(stripped)
        } else {
            PathBuf::from(path)
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // Handle $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                PathBuf::from(var_value).join(&stripped[slash_pos + 1..])
            } else {
                PathBuf::from(path)
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write(dir: &TempDir, name: &str, contents: &str) -> Result<PathBuf> {
        let path = dir.path().join(name);
        fs::write(&path, contents)?;
        Ok(path)
    }

    #[test]
    fn test_expand_path_tilde() {
        let expanded = expand_path("~/test/path");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().contains("test/path"));
    }

    #[test]
    fn test_expand_path_absolute() {
        let expanded = expand_path("/absolute/path");
        assert_eq!(expanded, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_discover_config_files() {
        // Just verify it doesn't panic
        let _files = discover_config_files();
    }

    #[test]
    fn test_cli_path_is_always_last() {
        let files = discover_config_files_with_override(Some(Path::new("/nonexistent/stash.toml")));
        assert_eq!(files.last(), Some(&PathBuf::from("/nonexistent/stash.toml")));
    }

    #[test]
    fn test_no_files_gives_defaults() -> Result<()> {
        let (config, sources) = load_layers(&[], no_env)?;
        assert_eq!(config, StashConfig::default());
        assert!(sources.files.is_empty());
        assert!(sources.env_overrides.is_empty());
        Ok(())
    }

    #[test]
    fn test_parse_full_toml() -> Result<()> {
        let dir = TempDir::new()?;
        let path = write(
            &dir,
            "full.toml",
            r#"
[paths]
storage_dir = "/data/stash"

[storage]
store_metadata = false

[bind]
host = "127.0.0.1"
port = 9000

[telemetry]
otlp_endpoint = "collector:4317"
log_level = "debug"

[admission]
transfer_limit = 4
listing_limit = 40
report_stats = true
stats_interval_secs = 30
"#,
        )?;

        let (config, sources) = load_layers(&[path.clone()], no_env)?;

        assert_eq!(config.paths.storage_dir, PathBuf::from("/data/stash"));
        assert!(!config.storage.store_metadata);
        assert_eq!(config.bind.addr(), "127.0.0.1:9000");
        assert_eq!(config.telemetry.otlp_endpoint.as_deref(), Some("collector:4317"));
        assert_eq!(config.telemetry.log_level, "debug");
        assert_eq!(config.admission.transfer_limit, 4);
        assert_eq!(config.admission.listing_limit, 40);
        assert!(config.admission.report_stats);
        assert_eq!(config.admission.stats_interval_secs, 30);
        assert_eq!(sources.files, vec![path]);

        Ok(())
    }

    #[test]
    fn test_later_files_override_only_their_keys() -> Result<()> {
        let dir = TempDir::new()?;
        let system = write(
            &dir,
            "system.toml",
            "[bind]\nport = 9000\nhost = \"10.0.0.1\"\n[admission]\ntransfer_limit = 2\n",
        )?;
        let local = write(&dir, "local.toml", "[bind]\nport = 9100\n")?;

        let (config, _) = load_layers(&[system, local], no_env)?;

        assert_eq!(config.bind.port, 9100);
        assert_eq!(config.bind.host, "10.0.0.1");
        assert_eq!(config.admission.transfer_limit, 2);
        assert_eq!(config.admission.listing_limit, 100);

        Ok(())
    }

    #[test]
    fn test_env_overrides_win() -> Result<()> {
        let dir = TempDir::new()?;
        let path = write(&dir, "stash.toml", "[bind]\nport = 9000\n")?;
        let env: HashMap<&str, &str> = [
            ("STASH_PORT", "7070"),
            ("STASH_STORAGE_DIR", "/env/files"),
            ("STASH_STORE_METADATA", "false"),
            ("STASH_LISTING_LIMIT", "7"),
            ("RUST_LOG", "stashd=trace"),
        ]
        .into_iter()
        .collect();

        let (config, sources) =
            load_layers(&[path], |key| env.get(key).map(|v| v.to_string()))?;

        assert_eq!(config.bind.port, 7070);
        assert_eq!(config.paths.storage_dir, PathBuf::from("/env/files"));
        assert!(!config.storage.store_metadata);
        assert_eq!(config.admission.listing_limit, 7);
        assert_eq!(config.telemetry.log_level, "stashd=trace");
        assert_eq!(sources.env_overrides.len(), 5);
        assert!(sources.env_overrides.contains(&"STASH_PORT".to_string()));

        Ok(())
    }

    #[test]
    fn test_bad_env_value_is_an_error() {
        let result = load_layers(&[], |key| (key == "STASH_PORT").then(|| "eighty".to_string()));
        assert!(matches!(result, Err(ConfigError::Invalid { key, .. }) if key == "STASH_PORT"));
    }

    #[test]
    fn test_parse_error_names_the_file() -> Result<()> {
        let dir = TempDir::new()?;
        let good = write(&dir, "good.toml", "[bind]\nport = 9000\n")?;
        let bad = write(&dir, "bad.toml", "[bind]\nport = \"not a number\"\n")?;

        match load_layers(&[good, bad.clone()], no_env) {
            Err(ConfigError::Parse { path, .. }) => assert_eq!(path, bad),
            other => panic!("expected parse error, got {other:?}"),
        }

        Ok(())
    }

    #[test]
    fn test_missing_explicit_file_is_read_error() {
        let result = load_layers(&[PathBuf::from("/nonexistent/stash.toml")], no_env);
        assert!(matches!(result, Err(ConfigError::FileRead { .. })));
    }

    #[test]
    fn test_zero_limit_rejected() -> Result<()> {
        let dir = TempDir::new()?;
        let path = write(&dir, "zero.toml", "[admission]\nlisting_limit = 0\n")?;
        assert!(matches!(
            load_layers(&[path], no_env),
            Err(ConfigError::Invalid { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_merge_tables_replaces_scalars_and_merges_tables() {
        let mut base: toml::Table = "a = 1\n[t]\nx = 1\ny = 2\n".parse().unwrap();
        let overlay: toml::Table = "a = 2\n[t]\ny = 3\n".parse().unwrap();

        merge_tables(&mut base, overlay);

        assert_eq!(base["a"].as_integer(), Some(2));
        assert_eq!(base["t"]["x"].as_integer(), Some(1));
        assert_eq!(base["t"]["y"].as_integer(), Some(3));
    }
}
