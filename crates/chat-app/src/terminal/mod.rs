pub mod command;
pub mod helper;
pub mod render;

pub use command::{COMMANDS, Command, CommandError, CommandSpec, parse};
pub use helper::CliHelper;
pub use render::Renderer;
