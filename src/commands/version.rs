use anyhow::Result;
use serde_json::json;

use a11yprobe::types::OutputFormat;

use super::utils;

pub async fn handle_version(format: OutputFormat) -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    const NAME: &str = env!("CARGO_PKG_NAME");

    match format {
        OutputFormat::Json => utils::print_json(&json!({ "name": NAME, "version": VERSION })),
        OutputFormat::Simple => {
            println!("{} v{}", NAME, VERSION);
            Ok(())
        }
    }
}
