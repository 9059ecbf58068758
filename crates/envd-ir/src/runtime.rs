//! Runtime metadata persisted in image labels.
//!
//! Everything here is read back from the built image by the tooling that
//! starts and attaches to environments, so the serialized form is stable.

use std::collections::BTreeMap;
use std::net::IpAddr;

use envd_common::constants::DEFAULT_SYSTEM_PATH;
use envd_common::error::{EnvdError, Result};
use serde::{Deserialize, Serialize};

/// A port published by the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposeItem {
    /// Port inside the container.
    pub envd_port: u16,
    /// Port on the host, `0` to auto-assign.
    pub host_port: u16,
    /// Name of the service behind the port.
    pub service_name: String,
    /// Host address the port binds to.
    pub listen_addr: String,
}

impl ExposeItem {
    /// Validates and creates an expose item.
    ///
    /// # Errors
    ///
    /// Returns [`EnvdError::InvalidPort`] if `envd_port` is outside `[1, 65535]`
    /// or `host_port` outside `[0, 65535]`, and [`EnvdError::InvalidListenAddress`]
    /// if `listen_addr` is not an IP address.
    pub fn new(
        envd_port: i64,
        host_port: i64,
        service_name: impl Into<String>,
        listen_addr: impl Into<String>,
    ) -> Result<Self> {
        let envd_port = checked_port("envd_port", envd_port, 1)?;
        let host_port = checked_port("host_port", host_port, 0)?;
        let listen_addr = listen_addr.into();
        if listen_addr.parse::<IpAddr>().is_err() {
            return Err(EnvdError::InvalidListenAddress { addr: listen_addr });
        }
        Ok(Self {
            envd_port,
            host_port,
            service_name: service_name.into(),
            listen_addr,
        })
    }
}

fn checked_port(field: &'static str, port: i64, min: i64) -> Result<u16> {
    if port < min {
        return Err(EnvdError::InvalidPort { field, port, min });
    }
    u16::try_from(port).map_err(|_| EnvdError::InvalidPort { field, port, min })
}

/// Commands, services, environment and ports the running container needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeGraph {
    /// Named commands runnable with `envd run`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub commands: BTreeMap<String, String>,
    /// Long-running daemons, one argv each.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub daemon: Vec<Vec<String>>,
    /// Scripts run once at container start, before the daemons.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub init_script: Vec<Vec<String>>,
    /// Extra environment variables.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub environ: BTreeMap<String, String>,
    /// PATH segments in precedence order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env_paths: Vec<String>,
    /// Published ports.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub expose: Vec<ExposeItem>,
}

impl Default for RuntimeGraph {
    fn default() -> Self {
        Self {
            commands: BTreeMap::new(),
            daemon: Vec::new(),
            init_script: Vec::new(),
            environ: BTreeMap::new(),
            env_paths: DEFAULT_SYSTEM_PATH.iter().map(ToString::to_string).collect(),
            expose: Vec::new(),
        }
    }
}

impl RuntimeGraph {
    /// Appends PATH segments, skipping any already present.
    pub fn append_env_paths<I, S>(&mut self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for path in paths {
            let path = path.as_ref();
            if !path.is_empty() && !self.env_paths.iter().any(|p| p == path) {
                self.env_paths.push(path.to_string());
            }
        }
    }

    /// Appends the segments of a colon-separated PATH value, skipping known ones.
    pub fn merge_path_value(&mut self, value: &str) {
        self.append_env_paths(value.split(':'));
    }

    /// Returns the joined PATH value.
    #[must_use]
    pub fn path(&self) -> String {
        self.env_paths.join(":")
    }

    /// Serializes to the label payload.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn dump(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a label payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a valid runtime graph.
    pub fn load(code: &str) -> Result<Self> {
        Ok(serde_json::from_str(code)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RuntimeGraph {
        let mut graph = RuntimeGraph::default();
        let _ = graph.commands.insert("train".into(), "python train.py".into());
        graph.daemon.push(vec!["redis-server".into(), "--port".into(), "6379".into()]);
        graph.init_script.push(vec!["mkdir -p /data".into()]);
        let _ = graph.environ.insert("HF_HOME".into(), "/data/hf".into());
        graph.append_env_paths(["/opt/tools/bin"]);
        graph
            .expose
            .push(ExposeItem::new(6379, 0, "redis", "127.0.0.1").expect("expose"));
        graph
    }

    #[test]
    fn dump_and_load_reproduce_the_graph() {
        let graph = sample();
        let code = graph.dump().expect("dump");
        assert_eq!(RuntimeGraph::load(&code).expect("load"), graph);
    }

    #[test]
    fn empty_fields_are_omitted() {
        let graph = RuntimeGraph {
            env_paths: Vec::new(),
            ..RuntimeGraph::default()
        };
        assert_eq!(graph.dump().expect("dump"), "{}");
    }

    #[test]
    fn path_composition_is_ordered_and_idempotent() {
        let mut graph = RuntimeGraph::default();
        graph.append_env_paths(["/opt/a/bin", "/opt/b/bin"]);
        let image_path = "/usr/local/nvidia/bin:/usr/local/bin:/usr/local/nvidia/bin:/opt/a/bin:/cuda/bin";
        graph.merge_path_value(image_path);
        let once = graph.env_paths.clone();
        graph.merge_path_value(image_path);
        graph.merge_path_value(image_path);
        assert_eq!(graph.env_paths, once);

        let mut expected: Vec<String> = DEFAULT_SYSTEM_PATH.iter().map(ToString::to_string).collect();
        expected.extend(["/opt/a/bin", "/opt/b/bin", "/usr/local/nvidia/bin", "/cuda/bin"].map(String::from));
        assert_eq!(graph.env_paths, expected);
    }

    #[test]
    fn expose_validates_ports() {
        assert!(ExposeItem::new(0, 0, "svc", "127.0.0.1").is_err());
        assert!(ExposeItem::new(65536, 0, "svc", "127.0.0.1").is_err());
        assert!(ExposeItem::new(8080, -1, "svc", "127.0.0.1").is_err());
        assert!(ExposeItem::new(8080, 70000, "svc", "127.0.0.1").is_err());
        let item = ExposeItem::new(8080, 0, "svc", "0.0.0.0").expect("auto host port");
        assert_eq!(item.host_port, 0);
    }

    #[test]
    fn expose_validates_listen_address() {
        let err = ExposeItem::new(8080, 8080, "svc", "localhost").unwrap_err();
        assert!(matches!(err, EnvdError::InvalidListenAddress { .. }));
        assert!(ExposeItem::new(8080, 8080, "svc", "::1").is_ok());
    }
}
