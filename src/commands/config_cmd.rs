use clap::{Args, Subcommand};

use super::OutputFormat;
use crate::config::Config;

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

fn or_unset(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("(not set)")
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        let credentials = &config.credentials.value;
                        println!("project_id: {}", credentials.project_id);
                        println!(
                            "api_key: {}",
                            if credentials.api_key.is_some() { "(set)" } else { "(not set)" }
                        );
                        println!("auth_domain: {}", or_unset(&credentials.auth_domain));
                        println!("app_id: {}", or_unset(&credentials.app_id));
                        println!("  source: {}", config.credentials.source);
                        println!();

                        match &config.emulator.value {
                            Some(emulator) => {
                                println!("emulator: {}:{}", emulator.host, emulator.port)
                            }
                            None => println!("emulator: (not set)"),
                        }
                        println!("  source: {}", config.emulator.source);
                        println!();

                        println!("offline_persistence: {}", config.offline_persistence.value);
                        println!("  source: {}", config.offline_persistence.source);
                        println!();

                        println!("data_dir: {}", config.data_dir.value.display());
                        println!("  source: {}", config.data_dir.source);
                    }
                }
                Ok(())
            }
        }
    }
}
