//! `envd build`: compile a manifest and write the build outputs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use envd_common::config::EnvdConfig;
use envd_common::types::StageCompositionStrategy;
use envd_fetch::NetworkHost;
use envd_ir::{BUILD_CONTEXT_SOURCE, CACHE_DIR_SOURCE, CompileHost, CompileOptions, resolve_identity};

use crate::manifest::Manifest;
use crate::output::{self, DEFINITION_FILE, IMAGE_CONFIG_FILE, ImageConfig};

/// Public key looked up in the config dir when `--public-key` is not given.
pub const DEFAULT_PUBLIC_KEY_FILE: &str = "id_rsa_envd.pub";

/// Arguments for the `build` command.
#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Environment manifest, relative to the build context.
    #[arg(short, long, default_value = "envd.yaml")]
    pub file: PathBuf,

    /// Build context directory.
    #[arg(short, long, default_value = ".")]
    pub path: PathBuf,

    /// Owner of generated files as `uid` or `uid:gid`.
    #[arg(long, env = "ENVD_BUILD_OWNER")]
    pub owner: Option<String>,

    /// Chain stages one after another instead of merging their diffs.
    #[arg(long)]
    pub disable_merge_op: bool,

    /// Public key authorized for SSH into the environment.
    #[arg(long, env = "ENVD_PUBLIC_KEY")]
    pub public_key: Option<PathBuf>,

    /// Directory the build outputs are written to.
    #[arg(short, long, default_value = "build")]
    pub output: PathBuf,
}

impl BuildArgs {
    fn strategy(&self, config: &EnvdConfig) -> StageCompositionStrategy {
        if self.disable_merge_op {
            StageCompositionStrategy::Sequential
        } else {
            config.composition
        }
    }

    fn public_key_path(&self, config: &EnvdConfig) -> PathBuf {
        self.public_key
            .clone()
            .unwrap_or_else(|| config.config_dir.join(DEFAULT_PUBLIC_KEY_FILE))
    }
}

/// Name of the environment built from `context_dir`.
fn environment_name(context_dir: &Path) -> String {
    context_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Executes the `build` command.
///
/// # Errors
///
/// Returns an error if the manifest is invalid, compilation fails, or the
/// outputs cannot be written.
pub fn execute(args: BuildArgs) -> anyhow::Result<()> {
    let context_dir = std::fs::canonicalize(&args.path)
        .with_context(|| format!("build context {} not found", args.path.display()))?;
    let manifest_path = context_dir.join(&args.file);
    tracing::info!(manifest = %manifest_path.display(), "building environment");

    let mut graph = Manifest::load(&manifest_path)?.into_graph()?;
    let identity = resolve_identity(args.owner.as_deref(), graph.owner())?;
    let config = EnvdConfig::discover()?;
    let mut host = NetworkHost::new(&config)?;
    let options = CompileOptions {
        environment_name: environment_name(&context_dir),
        public_key_path: args.public_key_path(&config),
        strategy: args.strategy(&config),
    };

    let definition = graph
        .compile(identity, &options, &mut host)
        .context("failed to compile the environment")?;

    // the entrypoint records ENVD_WORKDIR, so it precedes the environ and labels
    let entrypoint = graph.entrypoint(&context_dir);
    let image = ImageConfig {
        entrypoint,
        env: graph.environ(),
        exposed_ports: graph.exposed_ports(),
        labels: graph.labels()?,
        local_sources: BTreeMap::from([
            (BUILD_CONTEXT_SOURCE.to_string(), context_dir.clone()),
            (CACHE_DIR_SOURCE.to_string(), host.cache_dir().to_path_buf()),
        ]),
        gpus: graph.num_gpus(),
        shm_size: graph.shm_size(),
    };

    output::write_bytes(&args.output.join(DEFINITION_FILE), &definition.to_bytes()?)?;
    output::write_json(&args.output.join(IMAGE_CONFIG_FILE), &image)?;

    println!(
        "Compiled {} ({} ops, image {}) into {}",
        options.environment_name,
        definition.len(),
        graph.image(),
        args.output.display()
    );
    Ok(())
}
