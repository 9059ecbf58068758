//! Full compile runs against a stub host.
//!
//! The stub answers image metadata from a fixed table and never touches the
//! network, so these tests cover the pipeline order, composition strategy,
//! ownership handling and the error wrapping of failing stages.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::{Path, PathBuf};

use envd_common::error::{EnvdError, Result};
use envd_common::types::{Identity, Platform, StageCompositionStrategy};
use envd_ir::types::ImageMetadata;
use envd_ir::{CompileHost, CompileOptions, Graph, Plugin, ServiceDescriptor};
use envd_llb::Definition;
use envd_llb::op::{FileAction, Op};
use tempfile::TempDir;

struct StubHost {
    dir: TempDir,
    metadata: ImageMetadata,
    latest_release: Option<String>,
    requested_images: Vec<String>,
}

impl StubHost {
    fn new() -> Self {
        Self {
            dir: TempDir::new().expect("tempdir"),
            metadata: ImageMetadata {
                env: vec!["PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".into()],
                ..ImageMetadata::default()
            },
            latest_release: None,
            requested_images: Vec::new(),
        }
    }

    fn public_key(&self) -> PathBuf {
        let path = self.dir.path().join("id_rsa.pub");
        std::fs::write(&path, "ssh-rsa AAAAB3NzaC1yc2E test@host\n").expect("write key");
        path
    }
}

impl CompileHost for StubHost {
    fn image_metadata(&mut self, image: &str, _platform: &Platform) -> Result<ImageMetadata> {
        self.requested_images.push(image.to_string());
        Ok(self.metadata.clone())
    }

    fn vscode_plugin(&mut self, _plugin: &Plugin) -> Result<bool> {
        Ok(true)
    }

    fn oh_my_zsh(&mut self) -> Result<bool> {
        Ok(true)
    }

    fn latest_release(&mut self, owner: &str, repo: &str) -> Result<String> {
        self.latest_release
            .clone()
            .ok_or_else(|| EnvdError::ToolDownloadFailed {
                tool: format!("{owner}/{repo}"),
                reason: "offline".into(),
            })
    }

    fn cache_dir(&self) -> &Path {
        self.dir.path()
    }
}

fn options(host: &StubHost, strategy: StageCompositionStrategy) -> CompileOptions {
    CompileOptions {
        environment_name: "mnist".into(),
        public_key_path: host.public_key(),
        strategy,
    }
}

fn compile(graph: &mut Graph, host: &mut StubHost, identity: Identity) -> Result<Definition> {
    let options = options(host, StageCompositionStrategy::Merge);
    graph.compile(identity, &options, host)
}

fn python_graph() -> Graph {
    let mut graph = Graph::new();
    graph.add_language("python3.11").expect("python");
    graph.add_system_packages(["htop"]);
    graph.add_pypi_packages(["numpy", "pandas"]);
    graph
}

fn exec_scripts(definition: &Definition) -> Vec<String> {
    definition.execs().map(|e| e.meta.args.join(" ")).collect()
}

fn mkfiles(definition: &Definition) -> Vec<(String, String)> {
    definition
        .ops
        .iter()
        .filter_map(|op| match &op.op {
            Op::File(file) => Some(file.actions.iter()),
            _ => None,
        })
        .flatten()
        .filter_map(|action| match action {
            FileAction::Mkfile { path, data, .. } => Some((path.clone(), data.clone())),
            _ => None,
        })
        .collect()
}

fn count_ops(definition: &Definition, pred: fn(&Op) -> bool) -> usize {
    definition.ops.iter().filter(|op| pred(&op.op)).count()
}

#[test]
fn dev_environment_compiles() {
    let mut host = StubHost::new();
    let mut graph = python_graph();
    let definition = compile(&mut graph, &mut host, Identity::new(1000, 1000)).expect("compile");

    assert!(definition.head().is_some());
    let scripts = exec_scripts(&definition);
    assert!(scripts.iter().any(|s| s.contains("pip install numpy pandas")));
    assert!(scripts.iter().any(|s| s.contains("apt-get install -y --no-install-recommends htop")));
    assert!(scripts.iter().any(|s| s.contains("useradd -p \"\" -u 1000 -g envd")));
    assert_eq!(graph.user(), "envd");
    assert_eq!(host.requested_images, ["ubuntu:22.04"]);
}

#[test]
fn merge_strategy_diffs_independent_branches() {
    let mut host = StubHost::new();
    let mut graph = python_graph();
    let definition = compile(&mut graph, &mut host, Identity::new(1000, 1000)).expect("compile");
    assert!(count_ops(&definition, |op| matches!(op, Op::Diff)) >= 2);
    assert!(count_ops(&definition, |op| matches!(op, Op::Merge)) >= 1);
}

#[test]
fn sequential_strategy_never_merges() {
    let mut host = StubHost::new();
    let mut graph = python_graph();
    let options = options(&host, StageCompositionStrategy::Sequential);
    let definition = graph
        .compile(Identity::new(1000, 1000), &options, &mut host)
        .expect("compile");
    assert_eq!(count_ops(&definition, |op| matches!(op, Op::Diff)), 0);
    assert_eq!(count_ops(&definition, |op| matches!(op, Op::Merge)), 0);
    assert!(exec_scripts(&definition).iter().any(|s| s.contains("pip install numpy pandas")));
}

#[test]
fn identical_graphs_produce_identical_definitions() {
    let mut first_host = StubHost::new();
    let mut second_host = StubHost::new();
    let a = compile(&mut python_graph(), &mut first_host, Identity::new(1000, 1000)).expect("compile");
    let b = compile(&mut python_graph(), &mut second_host, Identity::new(1000, 1000)).expect("compile");
    assert_eq!(a.to_bytes().expect("bytes"), b.to_bytes().expect("bytes"));
}

#[test]
fn missing_public_key_fails_the_ssh_stage() {
    let mut host = StubHost::new();
    let mut graph = python_graph();
    let options = CompileOptions {
        environment_name: "mnist".into(),
        public_key_path: host.dir.path().join("missing.pub"),
        strategy: StageCompositionStrategy::Merge,
    };
    let err = graph
        .compile(Identity::new(1000, 1000), &options, &mut host)
        .unwrap_err();
    assert_eq!(err.stages(), ["copy ssh key"]);
    assert!(matches!(err.root_cause(), EnvdError::MissingPublicKey { .. }));
}

#[test]
fn entrypoint_and_init_are_mutually_exclusive() {
    let mut host = StubHost::new();
    let mut graph = python_graph();
    graph.set_entrypoint(["python", "serve.py"]);
    graph.add_runtime_init(["echo init"]);
    let err = compile(&mut graph, &mut host, Identity::new(1000, 1000)).unwrap_err();
    assert!(matches!(err.root_cause(), EnvdError::MutuallyExclusiveConfig { .. }));
    assert!(host.requested_images.is_empty());
}

#[test]
fn daemon_services_wait_for_every_init_script() {
    let mut host = StubHost::new();
    let mut graph = python_graph();
    graph.add_runtime_init(["mkdir -p /data"]);
    graph.add_runtime_init(["echo ready"]);
    graph.add_runtime_daemon(["redis-server"]);
    graph.set_jupyter("", 8888);
    let definition = compile(&mut graph, &mut host, Identity::new(1000, 1000)).expect("compile");

    let files = mkfiles(&definition);
    for name in ["daemon_0", "jupyter"] {
        let path = format!("/etc/horust/services/{name}.toml");
        let (_, data) = files.iter().find(|(p, _)| *p == path).expect("service file");
        let service: ServiceDescriptor = toml::from_str(data).expect("descriptor");
        assert_eq!(service.start_after, ["init_0", "init_1"], "{name}");
    }
    assert!(files.iter().any(|(p, _)| p == "/etc/horust/services/sshd.toml"));
}

#[test]
fn cuda_rewrites_the_base_image_first() {
    let mut host = StubHost::new();
    let mut graph = python_graph();
    graph.set_cuda("11.8.0", "8");
    let _ = compile(&mut graph, &mut host, Identity::new(1000, 1000)).expect("compile");
    assert_eq!(
        host.requested_images,
        ["docker.io/nvidia/cuda:11.8.0-cudnn8-devel-ubuntu22.04"]
    );
}

#[test]
fn image_path_is_appended_after_configured_paths() {
    let mut host = StubHost::new();
    host.metadata.env = vec![
        "PATH=/usr/local/nvidia/bin:/usr/local/bin:/usr/local/nvidia/bin:/usr/bin".into(),
        "HF_HOME=/image/hf".into(),
    ];
    let mut graph = Graph::new();
    graph.add_runtime_env_paths(["/opt/tools/bin"]);
    graph.add_runtime_environ("HF_HOME", "/data/hf");
    let _ = compile(&mut graph, &mut host, Identity::new(1000, 1000)).expect("compile");

    let environ = graph.environ();
    let path = environ
        .iter()
        .find_map(|e| e.strip_prefix("PATH="))
        .expect("PATH");
    assert_eq!(
        path,
        "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin:/opt/tools/bin:/usr/local/nvidia/bin"
    );
    assert!(environ.contains(&"HF_HOME=/data/hf".to_string()));
}

#[test]
fn jupyter_requires_python() {
    let mut host = StubHost::new();
    let mut graph = Graph::new();
    graph.set_jupyter("", 8888);
    let err = compile(&mut graph, &mut host, Identity::new(1000, 1000)).unwrap_err();
    assert_eq!(err.stages(), ["prepare jupyter"]);
}

#[test]
fn root_identity_aliases_the_envd_account() {
    let mut host = StubHost::new();
    let mut graph = python_graph();
    let definition = compile(&mut graph, &mut host, Identity::new(0, 0)).expect("compile");
    let scripts = exec_scripts(&definition);
    assert!(scripts.iter().any(|s| s.contains("s/envd:x:1001:1001/envd:x:0:0/g")));
    assert!(!scripts.iter().any(|s| s.contains("usermod -a -G sudo envd")));
    assert!(!scripts.iter().any(|s| s.starts_with("chown -R envd:envd")));
}

#[test]
fn recorded_directories_are_handed_to_envd() {
    let mut host = StubHost::new();
    let mut graph = Graph::new();
    graph.add_language("julia").expect("julia");
    graph.add_julia_packages(["Flux"]);
    let definition = compile(&mut graph, &mut host, Identity::new(1000, 1000)).expect("compile");
    assert!(
        exec_scripts(&definition)
            .iter()
            .any(|s| s == "chown -R envd:envd /home/envd/.julia")
    );
}

#[test]
fn codex_falls_back_to_the_default_version() {
    let mut host = StubHost::new();
    let mut graph = python_graph();
    graph.add_code_agent("codex", None).expect("agent");
    let definition = compile(&mut graph, &mut host, Identity::new(1000, 1000)).expect("compile");
    assert!(exec_scripts(&definition).iter().any(|s| s.contains("rust-v0.98.0")));
}

#[test]
fn codex_uses_the_latest_release() {
    let mut host = StubHost::new();
    host.latest_release = Some("rust-v1.2.0".into());
    let mut graph = python_graph();
    graph.add_code_agent("codex", None).expect("agent");
    let definition = compile(&mut graph, &mut host, Identity::new(1000, 1000)).expect("compile");
    assert!(exec_scripts(&definition).iter().any(|s| s.contains("rust-v1.2.0")));
}

#[test]
fn custom_image_inherits_its_configuration() {
    let mut host = StubHost::new();
    host.metadata = ImageMetadata {
        env: vec!["PATH=/usr/local/bin:/usr/bin".into()],
        entrypoint: vec!["python".into(), "app.py".into()],
        user: Some("app".into()),
        working_dir: Some("/srv".into()),
    };
    let mut graph = Graph::new();
    graph.set_base("python:3.11", false);
    graph.add_system_packages(["curl"]);
    let definition = compile(&mut graph, &mut host, Identity::new(1000, 1000)).expect("compile");

    assert_eq!(graph.user(), "app");
    assert_eq!(graph.entrypoint(Path::new("/tmp/app")), ["python", "app.py"]);
    assert!(graph.exposed_ports().is_empty());
    let scripts = exec_scripts(&definition);
    assert!(!scripts.iter().any(|s| s.contains("useradd")));
    assert!(definition.execs().all(|e| e.meta.cwd == "/srv"));
    assert!(definition.execs().all(|e| e.meta.user == "root"));
}

#[test]
fn definition_round_trips_through_bytes() {
    let mut host = StubHost::new();
    let definition = compile(&mut python_graph(), &mut host, Identity::new(1000, 1000)).expect("compile");
    let bytes = definition.to_bytes().expect("bytes");
    assert_eq!(Definition::from_bytes(&bytes).expect("parse"), definition);
}

fn exec_containing<'a>(definition: &'a Definition, needle: &str) -> &'a envd_llb::op::ExecMeta {
    definition
        .execs()
        .map(|e| &e.meta)
        .find(|meta| meta.args.join(" ").contains(needle))
        .unwrap_or_else(|| unreachable!("no exec runs {needle}"))
}

fn sorted_env(meta: &envd_llb::op::ExecMeta) -> Vec<String> {
    let mut env = meta.env.clone();
    env.sort();
    env
}

fn micromamba_graph() -> Graph {
    let mut graph = Graph::new();
    graph.add_language("python3.11").expect("python");
    graph.set_conda(true);
    graph.add_conda_packages(["numpy"], &[]);
    graph
}

#[test]
fn both_strategies_give_package_steps_the_same_env() {
    let mut by_strategy = Vec::new();
    for strategy in [StageCompositionStrategy::Merge, StageCompositionStrategy::Sequential] {
        let mut host = StubHost::new();
        let options = options(&host, strategy);
        let definition = micromamba_graph()
            .compile(Identity::new(1000, 1000), &options, &mut host)
            .expect("compile");
        let meta = exec_containing(&definition, "install -n envd numpy").clone();
        assert!(meta.env.contains(&"MAMBA_ROOT_PREFIX=/opt/conda".to_string()), "{strategy:?}");
        assert!(meta.env.contains(&"MAMBA_EXE=/usr/bin/micromamba".to_string()), "{strategy:?}");
        by_strategy.push((sorted_env(&meta), meta.user));
    }
    assert_eq!(by_strategy[0], by_strategy[1]);
}

#[test]
fn micromamba_replaces_the_conda_binary() {
    let mut host = StubHost::new();
    let definition = compile(&mut micromamba_graph(), &mut host, Identity::new(1000, 1000)).expect("compile");
    let scripts = exec_scripts(&definition);
    assert!(scripts.iter().any(|s| s.contains("/usr/bin/micromamba install -n envd numpy -y")));
    assert!(scripts.iter().any(|s| s.contains("update-alternatives --install /usr/bin/conda conda /usr/bin/micromamba 1")));
    assert!(!scripts.iter().any(|s| s.contains("get_conda.sh")));
}

#[test]
fn r_installs_from_the_cran_repository() {
    let mut host = StubHost::new();
    let mut graph = Graph::new();
    graph.add_language("r").expect("r");
    let definition = compile(&mut graph, &mut host, Identity::new(1000, 1000)).expect("compile");

    let scripts = exec_scripts(&definition);
    assert!(scripts.iter().any(|s| s.contains("apt-get install -y --no-install-recommends r-base")));
    let sources = mkfiles(&definition)
        .into_iter()
        .find(|(path, _)| path == "/etc/apt/sources.list.d/cran.sources")
        .map(|(_, data)| data)
        .expect("cran source");
    assert!(sources.contains("Suites: jammy-cran40/\n"));
    assert!(sources.contains("Signed-By: /etc/apt/keyrings/cran.asc\n"));
}

#[test]
fn rust_toolchain_env_reaches_later_steps() {
    let mut host = StubHost::new();
    let mut graph = python_graph();
    graph.add_language("rust").expect("rust");
    let definition = compile(&mut graph, &mut host, Identity::new(1000, 1000)).expect("compile");

    let install = exec_containing(&definition, "sh /tmp/rustup-init.sh -y");
    assert!(install.env.contains(&"RUSTUP_HOME=/opt/rust".to_string()));
    let pip = exec_containing(&definition, "pip install numpy pandas");
    assert!(pip.env.contains(&"CARGO_HOME=/opt/rust".to_string()));
    let path = pip.env.iter().find(|e| e.starts_with("PATH=")).expect("path");
    assert!(path.contains("/opt/rust/bin"));
}

#[test]
fn nodejs_and_go_are_on_the_path() {
    let mut host = StubHost::new();
    let mut graph = python_graph();
    graph.add_language("nodejs").expect("nodejs");
    graph.add_language("go").expect("go");
    let definition = compile(&mut graph, &mut host, Identity::new(1000, 1000)).expect("compile");

    let scripts = exec_scripts(&definition);
    assert!(scripts.iter().any(|s| s.contains("https://nodejs.org/dist/v20.12.2/node-v20.12.2-linux-")));
    assert!(scripts.iter().any(|s| s.contains("https://go.dev/dl/go1.22.2.linux-")));
    let pip = exec_containing(&definition, "pip install numpy pandas");
    let path = pip.env.iter().find(|e| e.starts_with("PATH=")).expect("path");
    assert!(path.contains("/opt/nodejs/bin"));
    assert!(path.contains("/usr/local/go/bin"));
}

#[test]
fn downloads_fail_on_any_pipe_stage() {
    let mut host = StubHost::new();
    let mut graph = python_graph();
    graph.add_language("nodejs").expect("nodejs");
    graph.add_language("rust").expect("rust");
    graph.set_shell("fish").expect("fish");
    let definition = compile(&mut graph, &mut host, Identity::new(1000, 1000)).expect("compile");

    let downloads: Vec<&[String]> = definition
        .execs()
        .map(|e| e.meta.args.as_slice())
        .filter(|args| args.iter().any(|a| a.contains("wget -") || a.contains("curl -")))
        .collect();
    assert!(downloads.len() >= 4);
    for args in downloads {
        assert_eq!(args[..2], ["sh", "-c"]);
        assert!(args[2].starts_with("set -euo pipefail\n"), "{}", args[2]);
    }
}

#[test]
fn zsh_installs_oh_my_zsh() {
    let mut host = StubHost::new();
    let mut graph = python_graph();
    graph.set_shell("zsh").expect("zsh");
    let definition = compile(&mut graph, &mut host, Identity::new(1000, 1000)).expect("compile");

    let install = exec_containing(&definition, "install.sh");
    assert_eq!(install.args[0], "bash");
    assert!(
        exec_scripts(&definition)
            .iter()
            .any(|s| s.contains(r#"eval "$(starship init zsh)""#))
    );
    assert!(mkfiles(&definition).iter().any(|(path, _)| path.ends_with("/.zshrc")));
}

#[test]
fn fish_installs_itself() {
    let mut host = StubHost::new();
    let mut graph = python_graph();
    graph.set_shell("fish").expect("fish");
    let definition = compile(&mut graph, &mut host, Identity::new(1000, 1000)).expect("compile");

    let scripts = exec_scripts(&definition);
    assert!(scripts.iter().any(|s| s == "/usr/bin/fish --install=noconfirm"));
    assert!(scripts.iter().any(|s| s.contains("starship init fish | source")));
    assert_eq!(graph.runtime().environ.get("SHELL").map(String::as_str), Some("/usr/bin/fish"));
}

#[test]
fn conda_environment_is_activated_in_the_shell() {
    let mut host = StubHost::new();
    let mut graph = python_graph();
    graph.set_conda(false);
    let definition = compile(&mut graph, &mut host, Identity::new(1000, 1000)).expect("compile");

    let scripts = exec_scripts(&definition);
    assert!(scripts.iter().any(|s| s.contains("/opt/conda/bin/conda init bash")));
    assert!(
        scripts
            .iter()
            .any(|s| s.contains("echo 'source /opt/conda/bin/activate envd' >> ") && s.ends_with("/.bashrc"))
    );
}
