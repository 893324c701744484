use clap::{Args, Subcommand};
use serde_json::{Map, Value};

use docbind::{Database, MemoryStore, ProfileService, SetOptions};

use super::OutputFormat;

#[derive(Args)]
pub struct ProfileCommand {
    #[command(subcommand)]
    pub command: ProfileSubcommand,
}

#[derive(Subcommand)]
pub enum ProfileSubcommand {
    /// Show a user's profile
    Show {
        /// User ID
        uid: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Save profile fields, merging into the stored profile
    Save {
        /// User ID
        uid: String,

        /// Fields as KEY=VALUE (values are parsed as JSON when possible)
        #[arg(required = true, value_name = "KEY=VALUE")]
        fields: Vec<String>,

        /// Replace the whole profile instead of merging
        #[arg(long)]
        replace: bool,
    },

    /// Update fields of an existing profile (dotted keys address nested fields)
    Update {
        /// User ID
        uid: String,

        /// Fields as KEY=VALUE
        #[arg(required = true, value_name = "KEY=VALUE")]
        fields: Vec<String>,
    },
}

/// Parses `KEY=VALUE` pairs. A value that is valid JSON keeps its type;
/// anything else is taken as a string.
fn parse_fields(pairs: &[String]) -> Result<Map<String, Value>, String> {
    let mut fields = Map::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| format!("Expected KEY=VALUE, got '{}'", pair))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("Missing key in '{}'", pair));
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        fields.insert(key.to_string(), value);
    }
    Ok(fields)
}

impl ProfileCommand {
    pub async fn run(&self, db: &Database<MemoryStore>) -> Result<(), Box<dyn std::error::Error>> {
        let profiles = ProfileService::new(db);

        match &self.command {
            ProfileSubcommand::Show { uid, format } => {
                let doc = profiles
                    .get(uid)
                    .await?
                    .ok_or_else(|| format!("Profile not found: {}", uid))?;
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(doc.fields())?);
                    }
                    OutputFormat::Text => {
                        println!("Profile: {}", uid);
                        println!("{}", "=".repeat(9 + uid.len()));
                        for (key, value) in doc.fields() {
                            match value {
                                Value::String(s) => println!("{}: {}", key, s),
                                other => println!("{}: {}", key, other),
                            }
                        }
                    }
                }
                Ok(())
            }

            ProfileSubcommand::Save {
                uid,
                fields,
                replace,
            } => {
                let data = parse_fields(fields)?;
                let options = if *replace {
                    SetOptions::default()
                } else {
                    SetOptions::merge()
                };
                profiles.save_with(uid, data, options).await?;
                println!("Saved profile: {}", uid);
                Ok(())
            }

            ProfileSubcommand::Update { uid, fields } => {
                let data = parse_fields(fields)?;
                profiles.update(uid, data).await?;
                println!("Updated profile: {}", uid);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fields_keeps_json_types() {
        let fields = parse_fields(&[
            "name=Ada".to_string(),
            "age=36".to_string(),
            "admin=true".to_string(),
            "prefs.theme=\"dark\"".to_string(),
        ])
        .unwrap();
        assert_eq!(fields["name"], Value::from("Ada"));
        assert_eq!(fields["age"], Value::from(36));
        assert_eq!(fields["admin"], Value::from(true));
        assert_eq!(fields["prefs.theme"], Value::from("dark"));
    }

    #[test]
    fn test_parse_fields_rejects_bad_pairs() {
        assert!(parse_fields(&["novalue".to_string()]).is_err());
        assert!(parse_fields(&["=x".to_string()]).is_err());
    }
}
