use anyhow::{bail, Result};
use esseries::ParserConfig;
use std::path::Path;

/// Write `config` as TOML, refusing to overwrite an existing file
pub fn run_init_config(config: &ParserConfig, output: &Path) -> Result<()> {
    if output.exists() {
        bail!("{:?} already exists", output);
    }
    config.save(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_writes_loadable_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("esseries.toml");
        run_init_config(&ParserConfig::default(), &path).unwrap();
        assert_eq!(ParserConfig::load(&path).unwrap(), ParserConfig::default());
        assert!(run_init_config(&ParserConfig::default(), &path).is_err());
    }
}
