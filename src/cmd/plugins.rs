use std::path::Path;

use anyhow::Result;

use reelscan::plugin::config::config_path;

use super::load_config;
use super::output::print_chain;
use crate::OutputFormat;

pub fn cmd_plugins(config: Option<&Path>, format: OutputFormat) -> Result<()> {
    let source = config.map_or_else(config_path, Path::to_path_buf);
    let chain = load_config(config)?;
    print_chain(&chain, &source, format)
}
