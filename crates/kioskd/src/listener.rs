//! Completion Listener - Routes inbox tickets to registered handlers
//!
//! Handlers are registered per callback identity. A ticket is removed only
//! after its handler succeeded; tickets addressed to identities nobody
//! registered are left alone for whoever registers later. A ticket whose
//! handler keeps failing is set aside after `MAX_HANDLER_ATTEMPTS` tries.

use anyhow::Result;
use async_trait::async_trait;
use kiosk_common::completion::Inbox;
use kiosk_common::{CallbackId, CompletionTicket};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Failed handler runs after which a ticket is set aside
pub const MAX_HANDLER_ATTEMPTS: u32 = 3;

#[async_trait]
pub trait CompletionHandler: Send + Sync {
    async fn handle(&self, ticket: &CompletionTicket) -> Result<()>;
}

/// Counts from one pass over the inbox
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub handled: usize,
    pub failed: usize,
    pub quarantined: usize,
    /// Set aside after too many failed handler runs
    pub abandoned: usize,
}

pub struct CompletionListener {
    inbox: Inbox,
    handlers: BTreeMap<CallbackId, Arc<dyn CompletionHandler>>,
}

impl CompletionListener {
    pub fn new(inbox: Inbox) -> Self {
        Self {
            inbox,
            handlers: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, callback: CallbackId, handler: Arc<dyn CompletionHandler>) {
        debug!("Registered completion handler for {}", callback);
        self.handlers.insert(callback, handler);
    }

    pub fn is_registered(&self, callback: &CallbackId) -> bool {
        self.handlers.contains_key(callback)
    }

    /// Hand every pending ticket of every registered identity to its handler
    pub async fn drain(&self) -> DrainReport {
        let mut report = DrainReport::default();

        for (callback, handler) in &self.handlers {
            for entry in self.inbox.pending(callback) {
                let ticket = match entry.ticket {
                    Ok(t) => t,
                    Err(e) => {
                        warn!("Unreadable ticket {}: {}", entry.path.display(), e);
                        match self.inbox.quarantine(&entry.path) {
                            Ok(()) => report.quarantined += 1,
                            Err(e) => error!("Cannot quarantine {}: {}", entry.path.display(), e),
                        }
                        continue;
                    }
                };

                match handler.handle(&ticket).await {
                    Ok(()) => {
                        if let Err(e) = self.inbox.acknowledge(&entry.path) {
                            error!("Cannot remove handled ticket {}: {}", entry.path.display(), e);
                        }
                        report.handled += 1;
                    }
                    Err(e) => match self.inbox.record_failure(&entry.path) {
                        Ok(attempts) if attempts >= MAX_HANDLER_ATTEMPTS => {
                            error!(
                                "Giving up on ticket {} after {} attempts: {:#}",
                                ticket.ticket_id, attempts, e
                            );
                            match self.inbox.quarantine(&entry.path) {
                                Ok(()) => report.abandoned += 1,
                                Err(e) => error!("Cannot set aside {}: {}", entry.path.display(), e),
                            }
                        }
                        Ok(attempts) => {
                            warn!(
                                "Handler for {} failed on ticket {} (attempt {} of {}): {:#}",
                                callback, ticket.ticket_id, attempts, MAX_HANDLER_ATTEMPTS, e
                            );
                            report.failed += 1;
                        }
                        Err(io) => {
                            warn!(
                                "Handler for {} failed on ticket {}: {:#} (attempt not recorded: {})",
                                callback, ticket.ticket_id, e, io
                            );
                            report.failed += 1;
                        }
                    },
                }
            }
        }

        report
    }
}
