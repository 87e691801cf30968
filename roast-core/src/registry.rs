//! Command registry: name to "run to completion, return status".

use crate::error::{Result, RoastError};
use std::collections::HashMap;
use tracing::{debug, error, info};

/// Name of the built-in listing command.
pub const ACTIONS: &str = "actions";

/// A registered command. Returns the process exit status.
pub type Command<'a> = Box<dyn Fn() -> i32 + 'a>;

/// Command table owned by the entry point.
///
/// `actions` is always present: it lists every command, and it is what an
/// unknown name resolves to.
#[derive(Default)]
pub struct CommandRegistry<'a> {
    commands: HashMap<String, Command<'a>>,
}

impl<'a> CommandRegistry<'a> {
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
        }
    }

    /// Register a command. Returns error if the name is taken.
    pub fn register(&mut self, name: &str, command: impl Fn() -> i32 + 'a) -> Result<()> {
        if name == ACTIONS || self.commands.contains_key(name) {
            return Err(RoastError::usage(format!(
                "command \"{name}\" is already registered"
            )));
        }
        debug!(command = %name, "Registering command");
        self.commands.insert(name.to_string(), Box::new(command));
        Ok(())
    }

    /// Sorted command names, `actions` included.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        names.push(ACTIONS);
        names.sort_unstable();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        name == ACTIONS || self.commands.contains_key(name)
    }

    /// Resolve `name`, falling back to the listing command when unknown.
    pub fn lookup(&self, name: &str) -> Command<'_> {
        if let Some(command) = self.commands.get(name) {
            return Box::new(move || command());
        }
        if name != ACTIONS {
            error!(
                "Unknown action: {name}. Available actions: {}",
                self.names().join(", ")
            );
        }
        Box::new(move || self.actions())
    }

    /// Log every available command. Always succeeds.
    pub fn actions(&self) -> i32 {
        info!("Available actions:");
        for name in self.names() {
            info!("  {name}");
        }
        0
    }

    /// Run `name`. An unknown name runs the listing and still fails.
    pub fn dispatch(&self, name: &str) -> i32 {
        let status = self.lookup(name)();
        if self.contains(name) { status } else { 1 }
    }
}
