use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use tracing::{debug, warn};

use crate::schema::Config;

/// Default config document location when none is given explicitly.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("relaycore/config.yaml")
}

/// Lower-priority layers searched before the explicit/default path, lowest to
/// highest priority: system-wide, XDG/home, workspace-local (spec.md §2:
/// "a layered loader (/etc, XDG, workspace-local, explicit --config),
/// deep-merged the way `sven-config::loader` does it").
fn layered_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from("/etc/relaycore/config.yaml"));
    paths.push(PathBuf::from("/etc/relaycore/config.yml"));

    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/relaycore/config.yaml"));
        paths.push(home.join(".config/relaycore/config.yml"));
    }
    if let Some(cfg) = dirs::config_dir() {
        paths.push(cfg.join("relaycore/config.yaml"));
        paths.push(cfg.join("relaycore/config.yml"));
    }

    paths.push(PathBuf::from(".relaycore/config.yaml"));
    paths.push(PathBuf::from(".relaycore/config.yml"));
    paths.push(PathBuf::from("relaycore.yaml"));
    paths.push(PathBuf::from("relaycore.yml"));

    paths
}

/// Load the configuration document at `path` (the explicit `--config` path,
/// or the default location), deep-merged on top of any system/XDG/
/// workspace-local layers found on disk, `path` winning on conflicts.
///
/// A missing `path` is not an error — the merged lower layers (or
/// `Config::default()` if none exist) are returned (spec.md §4.2 describes
/// only the parse-failure recovery path; an absent document is the ordinary
/// "nothing configured yet" case).
///
/// On parse failure of `path`, attempts one best-effort repair (YAML does not
/// allow literal tabs for indentation, the single most common hand-edit
/// mistake); if that also fails, the bad file is snapshotted as `<path>.bak`
/// and the lower layers alone are returned so the caller never crashes on a
/// corrupt config.
pub fn load(path: &Path) -> Config {
    let mut merged = Value::Mapping(Mapping::new());
    for layer_path in layered_search_paths() {
        if layer_path == path || !layer_path.is_file() {
            continue;
        }
        match read_layer(&layer_path) {
            Some(layer) => {
                debug!(path = %layer_path.display(), "loaded config layer");
                merge_yaml(&mut merged, layer);
            }
            None => continue,
        }
    }

    let raw = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(_) => return finish(merged),
    };
    match serde_yaml::from_str::<Value>(&raw) {
        Ok(layer) => {
            merge_yaml(&mut merged, layer);
            finish(merged)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "config parse failed, attempting repair");
            match repair_and_parse(&raw) {
                Some(layer) => {
                    merge_yaml(&mut merged, layer);
                    finish(merged)
                }
                None => {
                    snapshot_bad_file(path, &raw);
                    warn!(path = %path.display(), "config repair failed, falling back to lower layers only");
                    finish(merged)
                }
            }
        }
    }
}

fn read_layer(path: &Path) -> Option<Value> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| warn!(path = %path.display(), error = %e, "skipping unreadable config layer"))
        .ok()?;
    serde_yaml::from_str::<Value>(&raw)
        .map_err(|e| warn!(path = %path.display(), error = %e, "skipping unparseable config layer"))
        .ok()
}

fn finish(merged: Value) -> Config {
    if matches!(&merged, Value::Mapping(m) if m.is_empty()) {
        Config::default()
    } else {
        serde_yaml::from_value(merged).unwrap_or_default()
    }
}

/// Best-effort repair of the most common hand-edit mistakes.
fn repair_and_parse(raw: &str) -> Option<Value> {
    let repaired = raw.replace('\t', "  ");
    serde_yaml::from_str::<Value>(&repaired).ok()
}

fn snapshot_bad_file(path: &Path, raw: &str) {
    let bak = path.with_extension("bak");
    if let Err(e) = std::fs::write(&bak, raw) {
        warn!(path = %bak.display(), error = %e, "failed to snapshot corrupt config");
    }
}

/// Deep-merge `src` into `dst`; `src` wins on scalar conflicts.
fn merge_yaml(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Mapping(d), Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d.entry(k).or_insert(Value::Mapping(Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}
