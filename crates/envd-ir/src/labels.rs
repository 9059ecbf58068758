//! Outputs of a compiled graph besides the build definition.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use envd_common::constants::{
    ENVD_WORKDIR_ENV, JUPYTER_PORT_IN_CONTAINER, RSTUDIO_SERVER_PORT_IN_CONTAINER,
    SSH_PORT_IN_CONTAINER, envd_home_dir, labels,
};
use envd_common::error::Result;
use serde::Serialize;

use crate::graph::Graph;

/// One entry of the ports label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct PortBinding<'a> {
    name: &'a str,
    protocol: &'static str,
    port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    host_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    listen_addr: Option<&'a str>,
}

impl<'a> PortBinding<'a> {
    const fn tcp(name: &'a str, port: u16) -> Self {
        Self {
            name,
            protocol: "tcp",
            port,
            host_port: None,
            listen_addr: None,
        }
    }
}

impl Graph {
    fn port_bindings(&self) -> Vec<PortBinding<'_>> {
        let mut ports = vec![PortBinding::tcp("ssh", SSH_PORT_IN_CONTAINER)];
        if self.jupyter.is_some() {
            ports.push(PortBinding::tcp("jupyter", JUPYTER_PORT_IN_CONTAINER));
        }
        if self.rstudio_server.is_some() {
            ports.push(PortBinding::tcp("rstudio-server", RSTUDIO_SERVER_PORT_IN_CONTAINER));
        }
        for item in &self.runtime.expose {
            ports.push(PortBinding {
                host_port: Some(item.host_port),
                listen_addr: Some(&item.listen_addr),
                ..PortBinding::tcp(&item.service_name, item.envd_port)
            });
        }
        ports
    }

    /// Image labels recording what the environment asked for.
    ///
    /// # Errors
    ///
    /// Returns [`envd_common::error::EnvdError::Serialization`] if a payload
    /// cannot be encoded.
    pub fn labels(&self) -> Result<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        let mut put = |key: &str, value: String| {
            let _ = out.insert(key.to_string(), value);
        };
        put(labels::SYNTAX_VERSION, self.syntax_version.clone());
        put(labels::APT, serde_json::to_string(&self.system_packages)?);
        let pypi: Vec<&String> = self.pypi_packages.iter().flatten().collect();
        put(labels::PYPI, serde_json::to_string(&pypi)?);
        put(labels::R, serde_json::to_string(&self.r_packages)?);
        if let Some(cuda) = &self.cuda {
            put(labels::GPU, "true".into());
            put(labels::CUDA, cuda.clone());
            put(labels::CUDNN, self.cudnn.clone());
        }
        put(labels::VENDOR, labels::VENDOR_ENVD.into());
        put(labels::RUNTIME_GRAPH, self.runtime.dump()?);
        put(labels::GENERAL_GRAPH, self.dump()?);
        put(labels::PORTS, serde_json::to_string(&self.port_bindings())?);
        put(labels::REPO, serde_json::to_string(&self.repo)?);
        put(labels::CONTAINER_NAME, self.environment_name.clone());
        tracing::debug!(count = out.len(), "generated image labels");
        Ok(out)
    }

    /// Ports the image declares, as `port/tcp`.
    #[must_use]
    pub fn exposed_ports(&self) -> BTreeSet<String> {
        if !self.dev {
            return BTreeSet::new();
        }
        self.port_bindings()
            .into_iter()
            .map(|p| format!("{}/{}", p.port, p.protocol))
            .collect()
    }

    /// Entrypoint argv of the image.
    ///
    /// Dev images start the supervisor in the environment's working dir,
    /// which is recorded as `ENVD_WORKDIR`.
    pub fn entrypoint(&mut self, build_context_dir: &Path) -> Vec<String> {
        if !self.dev {
            return self.entrypoint.clone();
        }
        let name = build_context_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let _ = self
            .runtime
            .environ
            .insert(ENVD_WORKDIR_ENV.into(), envd_home_dir(&[&name]));
        vec!["horust".into()]
    }

    /// Environment of the image as `KEY=VALUE` pairs.
    #[must_use]
    pub fn environ(&self) -> Vec<String> {
        let mut env: Vec<String> = self
            .runtime
            .environ
            .iter()
            .filter(|(key, _)| key.as_str() != "PATH")
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        env.push(format!("PATH={}", self.runtime.path()));
        env.push("LC_ALL=en_US.UTF-8".into());
        env.push("LANG=C.UTF-8".into());
        env
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn dev_graph() -> Graph {
        let mut graph = Graph::new();
        graph.add_language("python3.11").expect("python");
        graph.add_system_packages(["htop", "tmux"]);
        graph.add_pypi_packages(["numpy", "pandas"]);
        graph.add_pypi_packages(["torch"]);
        graph.set_jupyter("", 8888);
        graph
            .add_runtime_expose(6006, 0, "tensorboard", "127.0.0.1")
            .expect("expose");
        graph.environment_name = "mnist".into();
        graph
    }

    #[test]
    fn labels_flatten_pypi_groups() {
        let labels = dev_graph().labels().expect("labels");
        assert_eq!(labels[labels::PYPI], r#"["numpy","pandas","torch"]"#);
        assert_eq!(labels[labels::APT], r#"["htop","tmux"]"#);
        assert_eq!(labels[labels::CONTAINER_NAME], "mnist");
        assert_eq!(labels[labels::VENDOR], "envd");
        assert!(!labels.contains_key(labels::GPU));
    }

    #[test]
    fn gpu_labels_are_set_with_cuda() {
        let mut graph = dev_graph();
        graph.set_cuda("11.8.0", "8");
        let labels = graph.labels().expect("labels");
        assert_eq!(labels[labels::GPU], "true");
        assert_eq!(labels[labels::CUDA], "11.8.0");
        assert_eq!(labels[labels::CUDNN], "8");
    }

    #[test]
    fn ports_label_lists_services() {
        let labels = dev_graph().labels().expect("labels");
        let ports: serde_json::Value = serde_json::from_str(&labels[labels::PORTS]).expect("json");
        let names: Vec<&str> = ports
            .as_array()
            .expect("array")
            .iter()
            .filter_map(|p| p["name"].as_str())
            .collect();
        assert_eq!(names, ["ssh", "jupyter", "tensorboard"]);
        assert_eq!(ports[2]["port"], 6006);
    }

    #[test]
    fn runtime_label_round_trips() {
        let graph = dev_graph();
        let labels = graph.labels().expect("labels");
        let runtime = crate::runtime::RuntimeGraph::load(&labels[labels::RUNTIME_GRAPH]).expect("load");
        assert_eq!(runtime, graph.runtime);
        let general = Graph::load(&labels[labels::GENERAL_GRAPH]).expect("load");
        assert_eq!(general, graph);
    }

    #[test]
    fn exposed_ports_of_dev_and_custom_images() {
        let graph = dev_graph();
        let ports: Vec<String> = graph.exposed_ports().into_iter().collect();
        assert_eq!(ports, ["2222/tcp", "6006/tcp", "8888/tcp"]);

        let mut custom = Graph::new();
        custom.set_base("python:3.11", false);
        assert!(custom.exposed_ports().is_empty());
    }

    #[test]
    fn dev_entrypoint_records_the_workdir() {
        let mut graph = dev_graph();
        let argv = graph.entrypoint(&PathBuf::from("/home/user/projects/mnist"));
        assert_eq!(argv, ["horust"]);
        assert_eq!(graph.runtime.environ[ENVD_WORKDIR_ENV], "/home/envd/mnist");
    }

    #[test]
    fn custom_entrypoint_is_kept() {
        let mut graph = Graph::new();
        graph.set_base("python:3.11", false);
        graph.set_entrypoint(["python", "app.py"]);
        assert_eq!(graph.entrypoint(Path::new("/tmp/app")), ["python", "app.py"]);
    }

    #[test]
    fn environ_ends_with_path_and_locale() {
        let mut graph = Graph::new();
        graph.add_runtime_environ("HF_HOME", "/data/hf");
        let env = graph.environ();
        assert_eq!(env[0], "HF_HOME=/data/hf");
        assert!(env[1].starts_with("PATH=/usr/local/sbin:"));
        assert_eq!(&env[2..], ["LC_ALL=en_US.UTF-8", "LANG=C.UTF-8"]);
    }
}
