//! A small ledger aggregate exercising the engine end to end.
#![allow(dead_code)]

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use strata_core::aggregate::{AggregateRoot, Changes};
use strata_core::error::DomainError;
use strata_core::event::{DomainEvent, EventMetadata, EventRegistry, StreamId};
use strata_core::repository::Repository;
use strata_test_support::InMemoryEventStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opened {
    pub owner: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Moved {
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LedgerEvent {
    Opened(Opened),
    Deposited(Moved),
    Withdrawn(Moved),
}

impl DomainEvent for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Opened(_) => "Opened",
            Self::Deposited(_) => "Deposited",
            Self::Withdrawn(_) => "Withdrawn",
        }
    }

    fn to_payload(&self) -> Result<serde_json::Value, DomainError> {
        Ok(match self {
            Self::Opened(e) => serde_json::to_value(e)?,
            Self::Deposited(e) | Self::Withdrawn(e) => serde_json::to_value(e)?,
        })
    }

    fn registry() -> EventRegistry<Self> {
        EventRegistry::new()
            .with("Opened", |v| serde_json::from_value(v).map(LedgerEvent::Opened))
            .with("Deposited", |v| serde_json::from_value(v).map(LedgerEvent::Deposited))
            .with("Withdrawn", |v| serde_json::from_value(v).map(LedgerEvent::Withdrawn))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LedgerState {
    owner: Option<String>,
    balance: i64,
}

#[derive(Debug)]
pub struct Ledger {
    id: StreamId,
    pub owner: Option<String>,
    pub balance: i64,
    changes: Changes<LedgerEvent>,
}

impl Ledger {
    pub fn open(&mut self, owner: &str) -> Result<(), DomainError> {
        if self.owner.is_some() {
            return Err(DomainError::Validation("ledger already open".into()));
        }
        self.record(LedgerEvent::Opened(Opened {
            owner: owner.to_owned(),
        }));
        Ok(())
    }

    pub fn deposit(&mut self, amount: i64) -> Result<(), DomainError> {
        if amount <= 0 {
            return Err(DomainError::Validation("amount must be positive".into()));
        }
        self.record(LedgerEvent::Deposited(Moved { amount }));
        Ok(())
    }

    pub fn withdraw(&mut self, amount: i64) -> Result<(), DomainError> {
        if amount > self.balance {
            return Err(DomainError::Validation("insufficient funds".into()));
        }
        self.record(LedgerEvent::Withdrawn(Moved { amount }));
        Ok(())
    }
}

impl AggregateRoot for Ledger {
    type Event = LedgerEvent;
    const KIND: &'static str = "Ledger";

    fn new(stream_id: StreamId) -> Self {
        Self {
            id: stream_id,
            owner: None,
            balance: 0,
            changes: Changes::default(),
        }
    }

    fn stream_id(&self) -> &StreamId {
        &self.id
    }

    fn apply(&mut self, event: &LedgerEvent) {
        match event {
            LedgerEvent::Opened(e) => self.owner = Some(e.owner.clone()),
            LedgerEvent::Deposited(e) => self.balance += e.amount,
            LedgerEvent::Withdrawn(e) => self.balance -= e.amount,
        }
    }

    fn changes(&self) -> &Changes<LedgerEvent> {
        &self.changes
    }

    fn changes_mut(&mut self) -> &mut Changes<LedgerEvent> {
        &mut self.changes
    }

    fn snapshot_state(&self) -> Result<Option<serde_json::Value>, DomainError> {
        Ok(Some(serde_json::to_value(LedgerState {
            owner: self.owner.clone(),
            balance: self.balance,
        })?))
    }

    fn restore_snapshot(&mut self, state: serde_json::Value) -> Result<(), DomainError> {
        let state: LedgerState = serde_json::from_value(state)?;
        self.owner = state.owner;
        self.balance = state.balance;
        Ok(())
    }
}

pub fn ledger_id(n: u32) -> StreamId {
    StreamId::for_aggregate(Ledger::KIND, n)
}

pub fn metadata() -> EventMetadata {
    EventMetadata::default().with_user("tester")
}

pub fn repository(store: &InMemoryEventStore) -> Repository<Ledger> {
    Repository::new(Arc::new(store.clone()))
}

pub fn payload(amount: i64) -> serde_json::Value {
    json!({ "amount": amount })
}
