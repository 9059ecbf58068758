//! Language installers.
//!
//! Toolchains are installed first, each as an independent branch on the
//! same parent state next to the system packages. Package installation runs
//! in a second pass on the combined result so that package manager calls are
//! cached separately from the toolchains.

pub(crate) mod conda;
mod golang;
mod julia;
mod nodejs;
mod pixi;
mod python;
mod r;
mod rust;
mod uv;

use envd_common::constants::CURL_IMAGE;
use envd_common::error::Result;
use envd_llb::{CopyOptions, FileActions, Run, State};

use crate::compile::Compiler;
use crate::compose::Composer;
use crate::language::{Language, LanguageKind};

/// A toolchain shipped as a release tarball.
pub(crate) struct Release<'a> {
    /// Toolchain name, also the staging dir under `/tmp`.
    pub(crate) name: &'a str,
    pub(crate) version: &'a str,
    /// Shell pipeline unpacking the tarball into `/tmp/<name>`.
    pub(crate) download: String,
    pub(crate) install_root: &'a str,
}

impl Compiler<'_> {
    /// Installs the system packages, every toolchain, uv and pixi.
    pub(crate) fn compile_language(&mut self, root: State) -> Result<State> {
        let mut composer = Composer::new(
            self.strategy,
            root,
            "[internal] language environment and system packages",
        );
        if let Some(packages) = self.compile_system_packages(composer.input()) {
            composer.push(packages);
        }

        let languages = self.graph.languages.clone();
        for Language { kind, version } in &languages {
            let input = composer.input().clone();
            let version = version.as_deref();
            let branch = match kind {
                LanguageKind::Python => self.install_python(input, version)?,
                LanguageKind::R => self.install_r(input),
                LanguageKind::Julia => self.install_julia(input, version),
                LanguageKind::Rust => self.install_rust(input, version),
                LanguageKind::NodeJs => self.install_nodejs(input, version),
                LanguageKind::Go => self.install_golang(input, version),
            };
            tracing::debug!(language = kind.name(), version = ?version, "language installed");
            composer.push(branch);
        }

        if self.graph.uv.is_some() {
            let branch = self.compile_uv(composer.input().clone());
            composer.push(branch);
        }
        if self.graph.pixi.is_some() {
            let branch = self.compile_pixi(composer.input().clone());
            composer.push(branch);
        }
        Ok(self.apply_env_path(composer.finish()))
    }

    /// Installs the packages of every declared language, in declaration order.
    pub(crate) fn compile_language_packages(&mut self, root: State) -> State {
        let languages: Vec<LanguageKind> = self.graph.languages.iter().map(|l| l.kind).collect();
        languages.into_iter().fold(root, |state, kind| match kind {
            LanguageKind::Python => self.compile_python_packages(state),
            LanguageKind::R => self.install_r_packages(state),
            LanguageKind::Julia => self.install_julia_packages(state),
            LanguageKind::Rust | LanguageKind::NodeJs | LanguageKind::Go => state,
        })
    }

    /// Downloads and unpacks a release in a builder stage, then copies it to
    /// its install root and puts its `bin` dir on PATH.
    pub(crate) fn install_release(&mut self, root: State, release: &Release<'_>) -> State {
        let Release { name, version, .. } = release;
        let builder = State::image(CURL_IMAGE).run(
            Run::strict_sh(format!(
                "mkdir -p /tmp/{name} && {} || exit 1",
                release.download
            ))
            .custom_name(format!("[internal] download {name} {version}")),
        );
        let installed = root.file(
            FileActions::new()
                .custom_name(format!("[internal] install {name} {version}"))
                .copy(
                    &builder,
                    format!("/tmp/{name}"),
                    release.install_root,
                    CopyOptions::default().create_dest_path().contents_only(),
                ),
        );
        self.update_env_path(installed, &format!("{}/bin", release.install_root))
    }

    /// User that language package managers run as.
    pub(crate) fn package_user(&self) -> &'static str {
        if self.graph.dev { envd_common::constants::ENVD_USER } else { "root" }
    }
}
