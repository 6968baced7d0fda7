//! Built-in connector handlers

mod graphql;
mod mail;

pub use graphql::GraphQlConnector;
pub use mail::{compose_message, MailSendConnector};

use crate::dispatch::ConnectorRegistry;
use std::sync::Arc;

/// Registry preloaded with every built-in handler.
pub fn builtin_registry() -> ConnectorRegistry {
    ConnectorRegistry::new()
        .with(Arc::new(MailSendConnector))
        .with(Arc::new(GraphQlConnector))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names() {
        assert_eq!(builtin_registry().names(), vec!["graphql", "mail.send"]);
    }
}
