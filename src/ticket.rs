//! Monotonic load tickets.
//!
//! Every load attempt gets a ticket; only the most recently minted one is
//! current. Async steps hold a [`TicketGuard`] and check it after each
//! suspension point, discarding their work once superseded.

use std::{cell::Cell, rc::Rc};

pub type LoadTicket = u64;

#[derive(Debug, Default, Clone)]
pub struct TicketCounter {
    current: Rc<Cell<LoadTicket>>,
}

impl TicketCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint the next ticket, superseding every earlier one.
    pub fn mint(&self) -> TicketGuard {
        let next = self.current.get() + 1;
        self.current.set(next);
        TicketGuard {
            ticket: next,
            current: self.current.clone(),
        }
    }

    pub fn current(&self) -> LoadTicket {
        self.current.get()
    }
}

#[derive(Debug, Clone)]
pub struct TicketGuard {
    ticket: LoadTicket,
    current: Rc<Cell<LoadTicket>>,
}

impl TicketGuard {
    pub fn ticket(&self) -> LoadTicket {
        self.ticket
    }

    pub fn is_current(&self) -> bool {
        self.current.get() == self.ticket
    }

    pub fn is_stale(&self) -> bool {
        !self.is_current()
    }
}
