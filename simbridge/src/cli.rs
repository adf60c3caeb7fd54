//! Command-line entry point (spec §6: `--config`/`--profile`).

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "simbridge", about = "Routes simulation requests between clients and simulator agents")]
pub struct Cli {
    /// Base name of the YAML config file to load (`<name>.yaml`, `<name>-{profile}.yaml`).
    #[arg(long, default_value = "bridge")]
    pub config: String,

    /// Config profile; overridden by `SIMBRIDGE_PROFILE` if set.
    #[arg(long, default_value = "dev")]
    pub profile: String,
}
