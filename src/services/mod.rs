//! Application services built on [`crate::Database`].

pub mod profile;
pub mod todos;

pub use profile::{profile_path, ProfileService};
pub use todos::{todos_from, Todo, TodoService, ACTIVE_LIMIT, TODOS};
