//! Base image resolution and inherited image configuration.

use envd_common::error::Result;
use envd_llb::{FileActions, MkdirOptions, State};

use crate::compile::Compiler;

const APT_SOURCE_FILE_PATH: &str = "/etc/apt/sources.list";

/// Rewrites `image` to the matching `nvidia/cuda` image.
///
/// `ubuntu:22.04` with CUDA `11.8.0` becomes
/// `docker.io/nvidia/cuda:11.8.0-cudnn8-devel-ubuntu22.04` for dev images and
/// the `runtime` flavour otherwise.
#[must_use]
pub fn cuda_image(image: &str, cuda: &str, cudnn: &str, dev: bool) -> String {
    let target = if dev { "devel" } else { "runtime" };
    let tag = image.replacen(':', "", 1);
    format!("docker.io/nvidia/cuda:{cuda}-cudnn{cudnn}-{target}-{tag}")
}

impl Compiler<'_> {
    pub(crate) fn compile_base_image(&mut self) -> Result<State> {
        let graph = &mut *self.graph;
        if let Some(cuda) = &graph.cuda {
            graph.image = cuda_image(&graph.image, cuda, &graph.cudnn, graph.dev);
        }
        tracing::debug!(
            image = %graph.image,
            languages = ?graph.languages.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "compile base image"
        );

        let metadata = self.host.image_metadata(&graph.image, &graph.platform)?;
        let mut base = State::image(&graph.image);
        for (key, value) in metadata.env_pairs() {
            if key == "PATH" {
                graph.runtime.merge_path_value(value);
                continue;
            }
            // values set with runtime.environ win over the image
            let _ = graph
                .runtime
                .environ
                .entry(key.to_string())
                .or_insert_with(|| value.to_string());
            base = base.with_env(key, value);
        }
        base = base.with_env("PATH", graph.runtime.path());

        if graph.dev {
            graph.user = String::new();
        } else {
            if graph.entrypoint.is_empty() {
                graph.entrypoint.clone_from(&metadata.entrypoint);
            }
            // recorded for the image config only, build steps run as root
            graph.user = metadata.user.clone().unwrap_or_default();
            if graph.working_dir.is_none() {
                graph.working_dir.clone_from(&metadata.working_dir);
            }
            if let Some(dir) = &graph.working_dir {
                base = base.with_dir(dir);
            }
        }
        Ok(base)
    }

    pub(crate) fn compile_ubuntu_apt(&self, root: State) -> State {
        let Some(source) = &self.graph.ubuntu_apt_source else {
            return root;
        };
        tracing::debug!(source = %source, "using custom APT source");
        root.file(
            FileActions::new()
                .custom_name("[internal] setting apt source")
                .mkdir("/etc/apt", 0o755, MkdirOptions::parents())
                .mkfile(APT_SOURCE_FILE_PATH, 0o644, source.as_str(), None),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cuda_image_for_dev_uses_devel() {
        assert_eq!(
            cuda_image("ubuntu:22.04", "11.8.0", "8", true),
            "docker.io/nvidia/cuda:11.8.0-cudnn8-devel-ubuntu22.04"
        );
    }

    #[test]
    fn cuda_image_for_custom_uses_runtime() {
        assert_eq!(
            cuda_image("ubuntu:20.04", "11.6.2", "8", false),
            "docker.io/nvidia/cuda:11.6.2-cudnn8-runtime-ubuntu20.04"
        );
    }
}
