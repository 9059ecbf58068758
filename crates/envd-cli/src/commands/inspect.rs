//! `envd inspect`: show what a build recorded for the running environment.

use std::path::PathBuf;

use clap::Args;

use crate::output::{IMAGE_CONFIG_FILE, ImageConfig, format_runtime};

/// Arguments for the `inspect` command.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Build output directory.
    #[arg(short, long, default_value = "build")]
    pub output: PathBuf,

    /// Print every image label instead of the runtime summary.
    #[arg(long)]
    pub labels: bool,
}

/// Executes the `inspect` command.
///
/// # Errors
///
/// Returns an error if the image config is missing or malformed.
pub fn execute(args: &InspectArgs) -> anyhow::Result<()> {
    let config = ImageConfig::load(&args.output.join(IMAGE_CONFIG_FILE))?;
    if args.labels {
        for (key, value) in &config.labels {
            println!("{key}={value}");
        }
        return Ok(());
    }
    println!("entrypoint: {}", config.entrypoint.join(" "));
    if !config.exposed_ports.is_empty() {
        let ports: Vec<&str> = config.exposed_ports.iter().map(String::as_str).collect();
        println!("exposed: {}", ports.join(", "));
    }
    print!("{}", format_runtime(&config.runtime_graph()?));
    Ok(())
}
