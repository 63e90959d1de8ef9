use clap::Parser;

use ci_compliance::cli::{dispatch, Cli};

fn main() -> anyhow::Result<()> {
    dispatch(Cli::parse())
}
