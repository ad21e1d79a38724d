//! Batch background removal CLI
//!
//! Thin wrapper around [`rmbg::cli::main`].

#[cfg(feature = "cli")]
use rmbg::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Rebuild with --features cli");
    std::process::exit(1);
}
