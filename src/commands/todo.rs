use clap::{Args, Subcommand};
use std::io::{self, Write};

use docbind::{Database, MemoryStore, Todo, TodoService};

use super::OutputFormat;

#[derive(Args)]
pub struct TodoCommand {
    #[command(subcommand)]
    pub command: TodoSubcommand,
}

#[derive(Subcommand)]
pub enum TodoSubcommand {
    /// Add a new todo
    Add {
        /// What needs doing
        title: String,
    },

    /// List todos, newest first
    List {
        /// Include archived todos
        #[arg(long)]
        all: bool,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show one todo
    Show {
        /// Todo ID
        id: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Archive an open todo, or reopen an archived one
    Toggle {
        /// Todo ID
        id: String,
    },

    /// Delete a todo
    Remove {
        /// Todo ID
        id: String,

        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },
}

async fn find(todos: &TodoService<'_, MemoryStore>, id: &str) -> Result<Todo, Box<dyn std::error::Error>> {
    match todos.get(id).await? {
        Some(todo) => Ok(todo),
        None => Err(format!("Todo not found: {}", id).into()),
    }
}

impl TodoCommand {
    pub async fn run(&self, db: &Database<MemoryStore>) -> Result<(), Box<dyn std::error::Error>> {
        let todos = TodoService::new(db);

        match &self.command {
            TodoSubcommand::Add { title } => {
                if title.trim().is_empty() {
                    return Err("Todo title cannot be empty".into());
                }
                let id = todos.create(title.trim()).await?;
                println!("Created todo: {}", id);
                Ok(())
            }

            TodoSubcommand::List { all, format } => {
                let list = todos.list(*all).await?;

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&list)?);
                    }
                    OutputFormat::Text => {
                        if list.is_empty() {
                            println!("No todos found");
                            return Ok(());
                        }
                        println!("    {:<20}  TITLE", "ID");
                        println!("{}", "-".repeat(60));
                        for todo in &list {
                            println!("{}", todo);
                        }
                        println!("\nTotal: {} todo(s)", list.len());
                    }
                }
                Ok(())
            }

            TodoSubcommand::Show { id, format } => {
                let todo = find(&todos, id).await?;
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&todo)?);
                    }
                    OutputFormat::Text => {
                        println!("{}", todo.title);
                        println!("{}", "=".repeat(todo.title.len()));
                        println!("ID: {}", todo.id);
                        println!("Archived: {}", if todo.archived { "yes" } else { "no" });
                        if let Some(created_at) = &todo.created_at {
                            println!("Created: {}", created_at);
                        }
                    }
                }
                Ok(())
            }

            TodoSubcommand::Toggle { id } => {
                let todo = find(&todos, id).await?;
                todos.toggle_archived(&todo).await?;
                let state = if todo.archived { "Reopened" } else { "Archived" };
                println!("{} todo: {}", state, todo.title);
                Ok(())
            }

            TodoSubcommand::Remove { id, force } => {
                let todo = find(&todos, id).await?;

                if !force {
                    print!("Delete todo '{}'? [y/N] ", todo.title);
                    io::stdout().flush()?;

                    let mut input = String::new();
                    io::stdin().read_line(&mut input)?;

                    if !input.trim().eq_ignore_ascii_case("y") {
                        println!("Deletion cancelled.");
                        return Ok(());
                    }
                }

                todos.remove(&todo).await?;
                println!("Deleted todo: {}", todo.title);
                Ok(())
            }
        }
    }
}
