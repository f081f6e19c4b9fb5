use crate::config::generate::generate_starter_config;
use crate::config::parse::load_config;
use std::fs;
use std::path::PathBuf;

pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_content = generate_starter_config();
    if stdout {
        print!("{}", config_content);
        return Ok(());
    }

    // Try ~/.config/logsift/config.yml first
    let config_path = dirs::home_dir()
        .map(|home| home.join(".config/logsift/config.yml"))
        .filter(|path| match path.parent() {
            Some(parent) => match fs::create_dir_all(parent) {
                Ok(()) => true,
                Err(_) => {
                    eprintln!("Warning: Could not create directory {}", parent.display());
                    eprintln!("Falling back to /etc/logsift/config.yml");
                    false
                }
            },
            None => false,
        })
        .unwrap_or_else(|| PathBuf::from("/etc/logsift/config.yml"));

    if config_path.exists() {
        return Err(format!(
            "Config file already exists at {}. Remove it first or use --stdout to print the config",
            config_path.display()
        )
        .into());
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&config_path, config_content)?;

    println!("Config file written to {}", config_path.display());
    Ok(())
}

pub fn validate(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path.ok_or("No config file found. Use --config to specify a path.")?;

    println!("Validating config file: {}", path.display());

    match load_config(&path) {
        Ok(config) => {
            println!(
                "Config is valid: {} source(s), {} AI endpoint(s), {} rule(s)",
                config.sources.len(),
                config.ai.endpoints.len(),
                config.rules.rules.len()
            );
            Ok(())
        }
        Err(e) => Err(format!("Config validation failed:\n{}", e).into()),
    }
}
