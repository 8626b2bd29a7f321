//! tallyd entry point.

use tallyd_lib::cli::{self, Cli};
use tallyd_lib::core::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli::execute(cli).await
}
