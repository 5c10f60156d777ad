//! Layout notifications.

use core::fmt;
use std::collections::HashMap;

use crate::DeclId;

/// Something that changed in a declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Resized {
        decl: DeclId,
        old: u64,
        new: u64,
    },
    Rebased {
        decl: DeclId,
        address: u64,
        bit_shift: u8,
    },
    ValueSet {
        decl: DeclId,
        value: u64,
    },
    SubregionAdded {
        parent: DeclId,
        child: DeclId,
        offset: u64,
    },
    SubregionMoved {
        parent: DeclId,
        child: DeclId,
        from: u64,
        to: u64,
    },
    SubregionRemoved {
        parent: DeclId,
        child: DeclId,
        offset: u64,
    },
}

impl Event {
    /// The declaration the event is about (the parent for subregion events).
    pub fn subject(&self) -> DeclId {
        match self {
            Event::Resized { decl, .. }
            | Event::Rebased { decl, .. }
            | Event::ValueSet { decl, .. } => *decl,
            Event::SubregionAdded { parent, .. }
            | Event::SubregionMoved { parent, .. }
            | Event::SubregionRemoved { parent, .. } => *parent,
        }
    }
}

pub type Listener = Box<dyn FnMut(&Event)>;

#[derive(Default)]
pub(crate) struct Listeners {
    by_decl: HashMap<DeclId, Vec<Listener>>,
    global: Vec<Listener>,
}

impl Listeners {
    pub(crate) fn add(&mut self, decl: DeclId, listener: Listener) {
        self.by_decl.entry(decl).or_default().push(listener);
    }

    pub(crate) fn add_global(&mut self, listener: Listener) {
        self.global.push(listener);
    }

    pub(crate) fn dispatch(&mut self, event: &Event) {
        if let Some(listeners) = self.by_decl.get_mut(&event.subject()) {
            for listener in listeners.iter_mut() {
                listener(event);
            }
        }
        for listener in self.global.iter_mut() {
            listener(event);
        }
    }

    pub(crate) fn forget(&mut self, decl: DeclId) {
        self.by_decl.remove(&decl);
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("by_decl", &self.by_decl.len())
            .field("global", &self.global.len())
            .finish()
    }
}
