use crate::config::{Config, Settings};
use crate::style;

pub fn switch(settings: &Settings, organization: Option<&str>) -> anyhow::Result<()> {
    let config = Config::load(&settings.config_path)?;
    if config.organizations.is_empty() {
        println!("Please run `dispatch login` to login to Dispatch.");
        return Ok(());
    }

    let Some(name) = organization else {
        print_organizations(&config);
        return Ok(());
    };

    if !config.organizations.contains_key(name) {
        style::failure(&format!("Organization '{name}' not found"));
        print_organizations(&config);
        return Ok(());
    }

    let mut config = config;
    config.active = name.to_string();
    config.save(&settings.config_path)?;
    println!("Switched to organization: {name}");
    Ok(())
}

fn print_organizations(config: &Config) {
    println!("Available organizations:");
    for organization in config.organizations.keys() {
        println!("- {organization}");
    }
}
