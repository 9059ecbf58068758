//! Persistent cache mounts shared between builds of one environment.

use envd_llb::file::{FileActions, MkdirOptions};
use envd_llb::{CacheSharing, RunMount, State};

use crate::graph::Graph;

impl Graph {
    /// Returns the cache identity for `filename`.
    ///
    /// The identity depends only on the environment name and whether a GPU
    /// base image is used, so CPU and GPU builds never share a cache.
    #[must_use]
    pub fn cache_id(&self, filename: &str) -> String {
        let mode = if self.gpu_enabled() { "gpu" } else { "cpu" };
        let id = format!("{filename}/{}-{mode}", self.environment_name);
        tracing::debug!(cache_id = %id, "calculated cache id");
        id
    }

    /// Builds a shared cache mount at `dest`.
    ///
    /// The cache is seeded from a scratch directory at `seed` so its root is
    /// created with sane permissions.
    pub(crate) fn cache_mount(&self, dest: &str, seed: &str) -> RunMount {
        let source = State::scratch().file(
            FileActions::new()
                .custom_name(format!("[internal] setting {dest} cache mount permissions"))
                .mkdir(seed, 0o755, MkdirOptions::parents()),
        );
        RunMount::cache(dest, self.cache_id(dest), CacheSharing::Shared)
            .with_source(&source)
            .selector(seed)
    }
}

#[cfg(test)]
mod tests {
    use envd_llb::op::{MountKind, Op};
    use envd_llb::Run;

    use super::*;

    fn named(name: &str) -> Graph {
        let mut graph = Graph::new();
        graph.environment_name = name.into();
        graph
    }

    #[test]
    fn cache_id_is_stable() {
        let graph = named("mnist");
        assert_eq!(graph.cache_id("/root/.cache/pip"), graph.cache_id("/root/.cache/pip"));
        assert_eq!(graph.cache_id("/var/cache/apt"), "/var/cache/apt/mnist-cpu");
    }

    #[test]
    fn gpu_and_cpu_caches_differ() {
        let cpu = named("mnist");
        let mut gpu = named("mnist");
        gpu.set_cuda("11.8.0", "8");
        assert_ne!(cpu.cache_id("/opt/conda/pkgs"), gpu.cache_id("/opt/conda/pkgs"));
        assert!(gpu.cache_id("/opt/conda/pkgs").ends_with("-gpu"));
    }

    #[test]
    fn environments_do_not_share_caches() {
        assert_ne!(named("a").cache_id("/var/lib/apt"), named("b").cache_id("/var/lib/apt"));
    }

    #[test]
    fn cache_mount_uses_seed_selector() {
        let graph = named("mnist");
        let state = State::image("ubuntu:22.04")
            .run(Run::shell("true").mount(graph.cache_mount("/root/.cache/pip", "/cache/pip")));
        let def = state.marshal(&graph.platform).expect("marshal");
        let exec = def.execs().next().expect("exec");
        let mount = &exec.mounts[1];
        assert_eq!(mount.selector.as_deref(), Some("/cache/pip"));
        assert!(matches!(
            &mount.kind,
            MountKind::Cache { id, .. } if id == "/root/.cache/pip/mnist-cpu"
        ));
        assert!(def.ops.iter().any(|op| matches!(op.op, Op::File(_))));
    }
}
