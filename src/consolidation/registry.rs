//! Per-address consolidation lock
//!
//! The registry is owned by whoever runs operations (usually the agent) and
//! handed to each operation through its context. `begin` hands out a guard;
//! while a ticket is active every further `begin` for that address fails
//! immediately instead of queueing.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{EngineError, EngineResult};
use crate::{log_info, log_warn};

/// How long a broadcast sweep stays pending before it is considered timed out
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationState {
    Idle,
    AwaitingConsolidation,
    ConsolidatingPending,
    Completed,
    Failed,
    Timeout,
}

impl ConsolidationState {
    /// A new consolidation may start from this state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConsolidationState::Idle
                | ConsolidationState::Completed
                | ConsolidationState::Failed
                | ConsolidationState::Timeout
        )
    }
}

impl fmt::Display for ConsolidationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConsolidationState::Idle => "idle",
            ConsolidationState::AwaitingConsolidation => "awaiting_consolidation",
            ConsolidationState::ConsolidatingPending => "consolidating_pending",
            ConsolidationState::Completed => "completed",
            ConsolidationState::Failed => "failed",
            ConsolidationState::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct ConsolidationTicket {
    pub address: String,
    pub main_address: String,
    pub state: ConsolidationState,
    pub txid: Option<String>,
    pub started_at: Instant,
    pub deadline: Option<Instant>,
}

pub struct ConsolidationRegistry {
    tickets: Mutex<HashMap<String, ConsolidationTicket>>,
    timeout: Duration,
}

impl Default for ConsolidationRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIRMATION_TIMEOUT)
    }
}

impl ConsolidationRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            tickets: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ConsolidationTicket>> {
        self.tickets.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn expire(ticket: &mut ConsolidationTicket, now: Instant) {
        if ticket.state == ConsolidationState::ConsolidatingPending && ticket.deadline.is_some_and(|d| now >= d) {
            log_warn!(
                "consolidation",
                "Pending sweep timed out",
                address = ticket.address,
                txid = ticket.txid.clone().unwrap_or_default()
            );
            ticket.state = ConsolidationState::Timeout;
        }
    }

    /// Claim `address`; fails while another consolidation is active
    pub fn begin(&self, address: &str, main_address: &str) -> EngineResult<ConsolidationGuard<'_>> {
        let now = Instant::now();
        let mut tickets = self.lock();
        if let Some(ticket) = tickets.get_mut(address) {
            Self::expire(ticket, now);
            if !ticket.state.is_terminal() {
                return Err(EngineError::consolidation_in_progress(format!(
                    "A consolidation for {} is already {}; retry after it finishes",
                    address, ticket.state
                )));
            }
        }
        tickets.insert(
            address.to_string(),
            ConsolidationTicket {
                address: address.to_string(),
                main_address: main_address.to_string(),
                state: ConsolidationState::AwaitingConsolidation,
                txid: None,
                started_at: now,
                deadline: None,
            },
        );
        Ok(ConsolidationGuard {
            registry: self,
            address: address.to_string(),
            settled: false,
        })
    }

    pub fn state(&self, address: &str) -> ConsolidationState {
        let mut tickets = self.lock();
        match tickets.get_mut(address) {
            Some(ticket) => {
                Self::expire(ticket, Instant::now());
                ticket.state
            }
            None => ConsolidationState::Idle,
        }
    }

    pub fn is_consolidating(&self, address: &str) -> bool {
        !self.state(address).is_terminal()
    }

    pub fn ticket(&self, address: &str) -> Option<ConsolidationTicket> {
        self.lock().get(address).cloned()
    }

    /// Record confirmation of the pending sweep `txid`
    pub fn mark_confirmed(&self, address: &str, txid: &str) -> EngineResult<()> {
        let mut tickets = self.lock();
        let ticket = tickets
            .get_mut(address)
            .ok_or_else(|| EngineError::invalid_input(format!("No consolidation recorded for {}", address)))?;
        if ticket.txid.as_deref() != Some(txid) {
            return Err(EngineError::invalid_input(format!(
                "{} is not the pending consolidation for {}",
                txid, address
            )));
        }
        if !matches!(
            ticket.state,
            ConsolidationState::ConsolidatingPending | ConsolidationState::Timeout
        ) {
            return Err(EngineError::invalid_input(format!(
                "Consolidation for {} is {}, not pending",
                address, ticket.state
            )));
        }
        ticket.state = ConsolidationState::Completed;
        log_info!("consolidation", "Sweep confirmed", address = address, txid = txid);
        Ok(())
    }

    fn update(&self, address: &str, f: impl FnOnce(&mut ConsolidationTicket)) {
        if let Some(ticket) = self.lock().get_mut(address) {
            f(ticket);
        }
    }

    fn remove(&self, address: &str) {
        self.lock().remove(address);
    }
}

/// Exclusive claim on one address for the life of a consolidation.
/// Dropped unsettled, it marks the attempt failed.
pub struct ConsolidationGuard<'r> {
    registry: &'r ConsolidationRegistry,
    address: String,
    settled: bool,
}

impl ConsolidationGuard<'_> {
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Sweep broadcast; start the confirmation clock
    pub fn pending(mut self, txid: &str) {
        let deadline = Instant::now() + self.registry.timeout;
        self.registry.update(&self.address, |t| {
            t.state = ConsolidationState::ConsolidatingPending;
            t.txid = Some(txid.to_string());
            t.deadline = Some(deadline);
        });
        self.settled = true;
    }

    /// Nothing happened on chain; forget the attempt
    pub fn abandon(mut self) {
        self.registry.remove(&self.address);
        self.settled = true;
    }

    pub fn fail(mut self) {
        self.registry
            .update(&self.address, |t| t.state = ConsolidationState::Failed);
        self.settled = true;
    }
}

impl Drop for ConsolidationGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.registry
                .update(&self.address, |t| t.state = ConsolidationState::Failed);
        }
    }
}
