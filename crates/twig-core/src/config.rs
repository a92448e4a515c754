use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone)]
pub struct Config {
    map: HashMap<String, String>,
    pub loaded_files: Vec<PathBuf>,
}

impl Config {
    #[tracing::instrument(skip(twigrc_override))]
    pub fn load(twigrc_override: Option<&Path>) -> anyhow::Result<Self> {
        let mut cfg = Config {
            map: HashMap::new(),
            loaded_files: vec![],
        };

        cfg.map
            .insert("data.location".to_string(), "~/.twig".to_string());
        cfg.map
            .insert("default.list".to_string(), "inbox".to_string());
        cfg.map.insert("color".to_string(), "on".to_string());
        cfg.map
            .insert("poll.interval".to_string(), "30".to_string());

        let twigrc = resolve_twigrc_path(twigrc_override)?;
        if let Some(path) = twigrc {
            info!(twigrc = %path.display(), "loading twigrc");
            cfg.load_file(&path)?;
        } else {
            warn!("no twigrc found; using defaults");
        }

        Ok(cfg)
    }

    #[tracing::instrument(skip(self, overrides))]
    pub fn apply_overrides<I>(&mut self, overrides: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (k, v) in overrides {
            let key = k.strip_prefix("rc.").unwrap_or(&k).to_string();
            debug!(key = %key, value = %v, "applying override");
            self.map.insert(key, v);
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.map.get(key).map(|v| parse_bool(v))
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.map.get(key).and_then(|v| v.trim().parse().ok())
    }

    #[tracing::instrument(skip(self))]
    fn load_file(&mut self, path: &Path) -> anyhow::Result<()> {
        let path = expand_tilde(path);
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        self.loaded_files.push(path.clone());

        let base_dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        for (line_num, raw_line) in text.lines().enumerate() {
            let mut line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((before, _)) = line.split_once('#') {
                line = before.trim();
            }

            if line.is_empty() {
                continue;
            }

            if let Some(include_rest) = line.strip_prefix("include ") {
                let include_path = resolve_include_path(&base_dir, include_rest.trim())?;
                debug!(
                    file = %path.display(),
                    include = %include_path.display(),
                    line = line_num + 1,
                    "processing include"
                );

                if include_path.exists() {
                    self.load_file(&include_path)?;
                } else {
                    warn!(include = %include_path.display(), "include file does not exist; skipping");
                }
                continue;
            }

            let (k, v) = line.split_once('=').ok_or_else(|| {
                anyhow!(
                    "invalid config line {}:{}: {}",
                    path.display(),
                    line_num + 1,
                    raw_line
                )
            })?;

            let key = k.trim().to_string();
            let value = v.trim().to_string();
            trace!(key = %key, value = %value, "loaded config key");
            self.map.insert(key, value);
        }

        Ok(())
    }
}

#[tracing::instrument(skip(cfg, override_dir))]
pub fn resolve_data_dir(cfg: &Config, override_dir: Option<&Path>) -> anyhow::Result<PathBuf> {
    let dir = if let Some(path) = override_dir {
        path.to_path_buf()
    } else if let Some(cfg_value) = cfg.get("data.location") {
        expand_tilde(Path::new(&cfg_value))
    } else {
        default_data_dir()?
    };

    if !dir.exists() {
        info!(dir = %dir.display(), "creating data directory");
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    Ok(dir)
}

#[tracing::instrument(skip(override_path))]
fn resolve_twigrc_path(override_path: Option<&Path>) -> anyhow::Result<Option<PathBuf>> {
    if let Some(path) = override_path {
        return Ok(Some(path.to_path_buf()));
    }

    if let Ok(twigrc_env) = std::env::var("TWIGRC") {
        if twigrc_env == "/dev/null" {
            return Ok(None);
        }
        return Ok(Some(PathBuf::from(twigrc_env)));
    }

    let home = dirs::home_dir().ok_or_else(|| anyhow!("cannot determine home directory"))?;
    let candidate = home.join(".twigrc");
    if candidate.exists() {
        return Ok(Some(candidate));
    }

    Ok(None)
}

fn default_data_dir() -> anyhow::Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow!("cannot determine home directory"))?;
    Ok(home.join(".twig"))
}

fn resolve_include_path(base_dir: &Path, include: &str) -> anyhow::Result<PathBuf> {
    if include.trim().is_empty() {
        return Err(anyhow!("include path cannot be empty"));
    }

    let raw = PathBuf::from(include);
    let expanded = expand_tilde(&raw);
    if expanded.is_absolute() {
        Ok(expanded)
    } else {
        Ok(base_dir.join(expanded))
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if let Some(rest) = text.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "1" | "y" | "yes" | "on" | "true"
    )
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn loads_keys_and_applies_overrides() {
        let dir = tempfile::tempdir().expect("tempdir");
        let rc_path = dir.path().join("twigrc");
        let mut file = fs::File::create(&rc_path).expect("create rc");
        writeln!(file, "# comment").expect("write");
        writeln!(file, "poll.interval = 45").expect("write");
        writeln!(file, "timezone = America/New_York  # trailing comment").expect("write");
        drop(file);

        let mut cfg = Config::load(Some(&rc_path)).expect("load config");
        assert_eq!(cfg.get_u64("poll.interval"), Some(45));
        assert_eq!(cfg.get("timezone").as_deref(), Some("America/New_York"));

        cfg.apply_overrides([("rc.color".to_string(), "off".to_string())]);
        assert_eq!(cfg.get_bool("color"), Some(false));
    }

    #[test]
    fn includes_pull_in_sibling_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let extra = dir.path().join("extra.rc");
        fs::write(&extra, "default.list = work\n").expect("write extra");
        let rc_path = dir.path().join("twigrc");
        fs::write(&rc_path, "include extra.rc\n").expect("write rc");

        let cfg = Config::load(Some(&rc_path)).expect("load config");
        assert_eq!(cfg.get("default.list").as_deref(), Some("work"));
        assert_eq!(cfg.loaded_files.len(), 2);
    }
}
