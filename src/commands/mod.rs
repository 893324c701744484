mod config_cmd;
mod profile;
mod todo;

use clap::ValueEnum;

pub use config_cmd::ConfigCommand;
pub use profile::ProfileCommand;
pub use todo::TodoCommand;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
