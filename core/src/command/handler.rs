//! Prioritized command handler chain
//!
//! Commands flowing through a frame are offered to every registered handler in
//! priority order. A handler may consume a command, which removes it from the
//! list before lower-priority handlers or the simulation see it.

use super::{Command, CommandList};

/// What a handler did with a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Pass the command on to the next handler
    Continue,
    /// Remove the command from the list
    Consume,
}

/// A single stage of the chain.
///
/// `C` is the context object the chain is dispatched with; handlers reach
/// shared session state through it rather than through globals.
pub trait CommandHandler<C: ?Sized> {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Inspect (and optionally consume) one command.
    fn handle(&mut self, ctx: &mut C, command: &Command) -> Disposition;
}

/// Opaque registration handle returned by [`HandlerChain::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct Entry<C: ?Sized> {
    id: HandlerId,
    priority: i32,
    handler: Box<dyn CommandHandler<C>>,
}

/// Ordered list of command handlers.
///
/// Higher priorities run first; handlers with equal priority run in
/// registration order.
pub struct HandlerChain<C: ?Sized> {
    entries: Vec<Entry<C>>,
    next_id: u64,
}

impl<C: ?Sized> Default for HandlerChain<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ?Sized> HandlerChain<C> {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }

    /// Register a handler at the given priority.
    pub fn register(&mut self, priority: i32, handler: Box<dyn CommandHandler<C>>) -> HandlerId {
        let id = HandlerId(self.next_id);
        self.next_id += 1;

        // Insert after every entry with priority >= ours to keep ties stable
        let index = self
            .entries
            .iter()
            .position(|e| e.priority < priority)
            .unwrap_or(self.entries.len());
        tracing::debug!(handler = handler.name(), priority, "registered command handler");
        self.entries.insert(
            index,
            Entry {
                id,
                priority,
                handler,
            },
        );
        id
    }

    /// Remove a handler. Returns false if the id was not registered.
    pub fn unregister(&mut self, id: HandlerId) -> bool {
        match self.entries.iter().position(|e| e.id == id) {
            Some(index) => {
                let entry = self.entries.remove(index);
                tracing::debug!(handler = entry.handler.name(), "unregistered command handler");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Handler names in dispatch order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.handler.name()).collect()
    }

    /// Offer one command to the chain.
    pub fn dispatch_one(&mut self, ctx: &mut C, command: &Command) -> Disposition {
        for entry in &mut self.entries {
            if entry.handler.handle(ctx, command) == Disposition::Consume {
                return Disposition::Consume;
            }
        }
        Disposition::Continue
    }

    /// Run every command in `list` through the chain, removing consumed ones.
    ///
    /// Returns the number of consumed commands.
    pub fn dispatch(&mut self, ctx: &mut C, list: &mut CommandList) -> usize {
        let before = list.len();
        list.retain(|command| self.dispatch_one(ctx, command) == Disposition::Continue);
        before - list.len()
    }
}
