//! Per-context configuration
//!
//! The cipher registry is passed in as a value; this struct only narrows what
//! a context offers and how it frames the exchange.

use serde::{Deserialize, Serialize};

use crate::cipher::{CipherId, CipherRegistry};
use crate::error::{Result, SrdError};

/// Largest message a context accepts before attempting to decode it
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Ciphers this endpoint is willing to negotiate, most preferred first
    pub ciphers: Vec<CipherId>,
    /// Finish after key confirmation without delegating a credential blob.
    /// Both endpoints must agree.
    pub skip_delegation: bool,
    pub max_message_size: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            ciphers: CipherId::ALL.to_vec(),
            skip_delegation: false,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl ContextConfig {
    pub fn with_ciphers(mut self, ciphers: &[CipherId]) -> Self {
        self.ciphers = ciphers.to_vec();
        self
    }

    pub fn with_skip_delegation(mut self, skip: bool) -> Self {
        self.skip_delegation = skip;
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Ciphers that are both configured and registered
    pub fn effective_ciphers(&self, registry: &CipherRegistry) -> Result<Vec<CipherId>> {
        let ciphers: Vec<CipherId> = registry
            .ids()
            .into_iter()
            .filter(|id| self.ciphers.contains(id))
            .collect();

        if ciphers.is_empty() {
            return Err(SrdError::Config(
                "no configured cipher is available in the registry".to_string(),
            ));
        }
        Ok(ciphers)
    }
}
