use anyhow::Result;

use uid2clip::cli::commands::run_cli;

fn main() -> Result<()> {
    run_cli()
}
