use std::path::Path;

use tidepool_core::TidepoolConfig;

pub fn init(path: &str, url: &str, username: &str) -> anyhow::Result<()> {
    let output = Path::new(path).join("tidepool.toml");
    if output.exists() {
        anyhow::bail!("{} already exists", output.display());
    }

    let config = TidepoolConfig::scaffold(url, username);
    std::fs::write(&output, config.to_toml_string()?)?;
    println!("✓ Generated {}", output.display());
    Ok(())
}
