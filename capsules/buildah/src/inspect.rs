//! Extraction of a working container's configuration from `buildah inspect` JSON.

use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};

use crate::container::ContainerConfig;

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(rename = "Env", default)]
    env: Option<Vec<String>>,
    #[serde(rename = "Cmd", default)]
    cmd: Option<Vec<String>>,
    #[serde(rename = "Entrypoint", default)]
    entrypoint: Option<Vec<String>>,
    #[serde(rename = "Labels", default)]
    labels: Option<BTreeMap<String, String>>,
    #[serde(rename = "Volumes", default)]
    volumes: Option<BTreeMap<String, JsonValue>>,
    #[serde(rename = "WorkingDir", default)]
    working_dir: Option<String>,
}

/// Parse the container configuration out of an inspect document.
///
/// buildah nests the image config in several places depending on format and
/// version (`OCIv1.config`, `Docker.config`, a top-level `Config` that may itself be
/// a JSON string, or `config`). The first one found wins.
pub fn parse_container_config(doc: &JsonValue) -> Result<ContainerConfig, String> {
    let config = locate_config(doc).ok_or_else(|| "no config object found".to_string())?;
    let raw: RawConfig =
        serde_json::from_value(config).map_err(|err| format!("malformed config: {}", err))?;

    let environ = raw
        .env
        .unwrap_or_default()
        .into_iter()
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (entry, String::new()),
        })
        .collect();

    Ok(ContainerConfig {
        environ,
        command: raw.cmd.unwrap_or_default(),
        entrypoint: raw.entrypoint.unwrap_or_default(),
        labels: raw.labels.unwrap_or_default(),
        volumes: raw
            .volumes
            .unwrap_or_default()
            .into_keys()
            .collect::<BTreeSet<_>>(),
        workdir: raw.working_dir.unwrap_or_default(),
    })
}

fn locate_config(doc: &JsonValue) -> Option<JsonValue> {
    for outer in ["OCIv1", "Docker"] {
        if let Some(cfg) = doc.get(outer).and_then(|v| v.get("config")) {
            if cfg.is_object() {
                return Some(cfg.clone());
            }
        }
    }

    if let Some(cfg) = doc.get("Config") {
        let cfg = match cfg {
            JsonValue::String(text) => serde_json::from_str::<JsonValue>(text).ok()?,
            other => other.clone(),
        };
        if let Some(inner) = cfg.get("config").filter(|v| v.is_object()) {
            return Some(inner.clone());
        }
        return cfg.is_object().then_some(cfg);
    }

    doc.get("config").filter(|v| v.is_object()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_ociv1_config() {
        let doc = json!({
            "Type": "buildah 0.0.1",
            "OCIv1": {"config": {
                "Env": ["PATH=/usr/bin:/bin", "EMPTY="],
                "Cmd": ["/bin/sh"],
                "Entrypoint": null,
                "Labels": {"maintainer": "ops"},
                "Volumes": {"/data": {}},
                "WorkingDir": "/srv"
            }}
        });
        let cfg = parse_container_config(&doc).unwrap();
        assert_eq!(cfg.environ["PATH"], "/usr/bin:/bin");
        assert_eq!(cfg.environ["EMPTY"], "");
        assert_eq!(cfg.command, vec!["/bin/sh"]);
        assert!(cfg.entrypoint.is_empty());
        assert_eq!(cfg.labels["maintainer"], "ops");
        assert!(cfg.volumes.contains("/data"));
        assert_eq!(cfg.workdir, "/srv");
    }

    #[test]
    fn reads_config_encoded_as_string() {
        let inner = json!({"config": {"WorkingDir": "/app", "Cmd": ["run"]}}).to_string();
        let doc = json!({ "Config": inner });
        let cfg = parse_container_config(&doc).unwrap();
        assert_eq!(cfg.workdir, "/app");
        assert_eq!(cfg.command, vec!["run"]);
    }

    #[test]
    fn reads_plain_config_object() {
        let doc = json!({ "config": {"Env": ["A=1"]} });
        let cfg = parse_container_config(&doc).unwrap();
        assert_eq!(cfg.environ["A"], "1");
        assert!(cfg.workdir.is_empty());
    }

    #[test]
    fn missing_config_is_an_error() {
        let err = parse_container_config(&json!({"Type": "x"})).unwrap_err();
        assert!(err.contains("no config"));
    }
}
