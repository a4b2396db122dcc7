use std::process::ExitCode;

use blkunblk::cli::{self, BlkCli};
use clap::Parser as _;
use color_eyre::eyre::Result;

fn main() -> Result<ExitCode> {
	color_eyre::install()?;
	blkunblk::logging::init()?;
	cli::blk(BlkCli::parse())
}
