use tw_domain::config::Config;

use crate::bootstrap;

/// Print the builtin tool catalogue with each tool's parameter schema.
pub fn list(config: &Config) -> anyhow::Result<()> {
    let (_collaborators, tools) = bootstrap::build_tools(config)?;
    for def in tools.definitions() {
        println!("{}", def.name);
        println!("  {}", def.description);
        let schema = serde_json::to_string(&def.parameters)
            .map_err(|e| anyhow::anyhow!("serializing schema for {}: {e}", def.name))?;
        println!("  parameters: {schema}");
    }
    Ok(())
}
