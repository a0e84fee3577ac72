use std::fmt;
use std::sync::Arc;

use spatia_core::anchor::Architype;
use spatia_core::error::Result;

use super::engine::Step;

/// Node type an ability is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeTag {
    /// Every node, roots included.
    Any,
    Root,
    /// Non-root nodes whose payload type is the given name.
    Node(String),
}

impl TypeTag {
    pub fn node(name: impl Into<String>) -> Self {
        Self::Node(name.into())
    }

    pub fn matches(&self, architype: &Architype) -> bool {
        match self {
            Self::Any => architype.is_node(),
            Self::Root => architype.is_root(),
            Self::Node(name) => {
                architype.is_node() && !architype.is_root() && architype.type_name() == name
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Entry,
    Exit,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entry => write!(f, "entry"),
            Self::Exit => write!(f, "exit"),
        }
    }
}

pub type Ability = Arc<dyn Fn(&mut Step<'_>) -> Result<()> + Send + Sync>;

/// Explicit (type tag, event) → callbacks table.
///
/// Callbacks keep their global declaration order: when several tags match
/// the same node, they fire in the order they were added.
#[derive(Clone, Default)]
pub struct AbilityTable {
    entries: Vec<(TypeTag, Event, Ability)>,
}

impl AbilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&mut self, tag: TypeTag, event: Event, ability: F) -> &mut Self
    where
        F: Fn(&mut Step<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.entries.push((tag, event, Arc::new(ability)));
        self
    }

    pub fn on_entry<F>(&mut self, tag: TypeTag, ability: F) -> &mut Self
    where
        F: Fn(&mut Step<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.on(tag, Event::Entry, ability)
    }

    pub fn on_exit<F>(&mut self, tag: TypeTag, ability: F) -> &mut Self
    where
        F: Fn(&mut Step<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.on(tag, Event::Exit, ability)
    }

    /// Callbacks for `event` on a node with this architype, in order.
    pub fn matching(&self, event: Event, architype: &Architype) -> Vec<Ability> {
        self.entries
            .iter()
            .filter(|(tag, ev, _)| *ev == event && tag.matches(architype))
            .map(|(_, _, ability)| ability.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for AbilityTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(tag, ev, _)| (tag, ev)))
            .finish()
    }
}
