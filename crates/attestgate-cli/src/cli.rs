use clap::{Parser, Subcommand};

use crate::commands::verify::VerifyArgs;

#[derive(Parser)]
#[command(
    name = "attestgate",
    version,
    about = "Policy-driven verifier for in-toto/DSSE software supply-chain attestations"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Verify a directory of attestations against a layout.
    Verify(VerifyArgs),
}
