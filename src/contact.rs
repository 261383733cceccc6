//! External contact identity
//!
//! A contact is never stored on its own. It is rebuilt from every inbound
//! message and only leaves a trace through blocklist entries or topic mappings.

use serde::{Deserialize, Serialize};

/// An external, anonymous person talking to the operator through the bot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Platform-assigned user id
    pub id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Public handle without the leading `@`
    pub username: Option<String>,
}

impl Contact {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            first_name: None,
            last_name: None,
            username: None,
        }
    }

    pub fn with_name(mut self, first: &str, last: Option<&str>) -> Self {
        self.first_name = Some(first.to_string());
        self.last_name = last.map(str::to_string);
        self
    }

    pub fn with_username(mut self, username: &str) -> Self {
        self.username = Some(username.trim_start_matches('@').to_string());
        self
    }

    /// First and last name joined, if either is set
    pub fn full_name(&self) -> Option<String> {
        let full = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        if full.is_empty() {
            None
        } else {
            Some(full)
        }
    }

    /// `@handle` form of the username
    pub fn handle(&self) -> Option<String> {
        self.username
            .as_deref()
            .filter(|u| !u.is_empty())
            .map(|u| format!("@{}", u))
    }

    /// Best-effort human readable name: full name, else handle, else "Contact {id}"
    pub fn display_name(&self) -> String {
        self.full_name()
            .or_else(|| self.handle())
            .unwrap_or_else(|| format!("Contact {}", self.id))
    }
}
