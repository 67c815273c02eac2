use std::path::PathBuf;

use anyhow::{bail, Result};
use env_logger::Env;
use sqlite_scrub_defrag::scrub_and_defrag;

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = std::env::args().collect::<Vec<_>>();
    match args.len() {
        0 | 1 => bail!("Missing <source> and <destination>"),
        2 => bail!("Missing <destination>"),
        3 => {}
        _ => bail!("Usage: defrag SOURCE DEST"),
    }

    let source = PathBuf::from(&args[1]);
    let dest = PathBuf::from(&args[2]);

    scrub_and_defrag(&source, &dest)?;
    Ok(())
}
