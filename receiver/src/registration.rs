use arc_swap::ArcSwap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::handler::WebhookHandler;

pub const DEFAULT_PRIORITY: i32 = 50;

/// Receivers a registration applies to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReceiverFilter {
    /// Every receiver, written `*` in configuration.
    All,
    Named(String),
}

impl ReceiverFilter {
    pub fn parse(value: &str) -> Self {
        match value {
            "*" => ReceiverFilter::All,
            name => ReceiverFilter::Named(name.to_ascii_lowercase()),
        }
    }

    pub fn matches(&self, receiver: &str) -> bool {
        match self {
            ReceiverFilter::All => true,
            ReceiverFilter::Named(name) => name.eq_ignore_ascii_case(receiver),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionFilter {
    All,
    Only(HashSet<String>),
}

impl ActionFilter {
    /// An empty list matches every action.
    pub fn from_list(actions: &[String]) -> Self {
        if actions.is_empty() {
            ActionFilter::All
        } else {
            ActionFilter::Only(actions.iter().cloned().collect())
        }
    }

    pub fn matches(&self, action: &str) -> bool {
        match self {
            ActionFilter::All => true,
            ActionFilter::Only(actions) => actions.contains(action),
        }
    }
}

#[derive(Clone)]
pub struct Registration {
    pub receiver: ReceiverFilter,
    pub handler: Arc<dyn WebhookHandler>,
    pub priority: i32,
    pub actions: ActionFilter,
    seq: u64,
}

impl Registration {
    pub fn new(receiver: ReceiverFilter, handler: Arc<dyn WebhookHandler>) -> Self {
        Self {
            receiver,
            handler,
            priority: DEFAULT_PRIORITY,
            actions: ActionFilter::All,
            seq: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_actions(mut self, actions: ActionFilter) -> Self {
        self.actions = actions;
        self
    }

    pub fn applies_to(&self, receiver: &str, action: &str) -> bool {
        self.receiver.matches(receiver) && self.actions.matches(action)
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("receiver", &self.receiver)
            .field("handler", &self.handler.name())
            .field("priority", &self.priority)
            .field("actions", &self.actions)
            .finish()
    }
}

/// Ordered handler registrations.
///
/// Readers take a snapshot that stays consistent for the whole dispatch;
/// registering swaps in a new list without blocking them.
#[derive(Default)]
pub struct HandlerRegistry {
    registrations: ArcSwap<Vec<Registration>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, registration: Registration) {
        self.registrations.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            let seq = current.iter().map(|r| r.seq + 1).max().unwrap_or(0);
            next.push(Registration {
                seq,
                ..registration.clone()
            });
            next.sort_by_key(|r| (r.priority, r.seq));
            next
        });
    }

    /// Current registrations in dispatch order.
    pub fn snapshot(&self) -> Arc<Vec<Registration>> {
        self.registrations.load_full()
    }

    /// Replaces every registration at once.
    pub fn replace(&self, registrations: Vec<Registration>) {
        let mut next: Vec<Registration> = registrations
            .into_iter()
            .enumerate()
            .map(|(seq, registration)| Registration {
                seq: seq as u64,
                ..registration
            })
            .collect();
        next.sort_by_key(|r| (r.priority, r.seq));
        self.registrations.store(Arc::new(next));
    }

    pub fn len(&self) -> usize {
        self.registrations.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.load().is_empty()
    }
}
