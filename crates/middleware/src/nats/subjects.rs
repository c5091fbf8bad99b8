//! Maps exchange/queue/routing-key vocabulary onto NATS subjects and
//! JetStream stream names.

use std::sync::Arc;

use dashmap::DashMap;

/// Placeholder for empty subject tokens (NATS forbids empty tokens)
pub const EMPTY_TOKEN: &str = "--";

/// Subject formatting under an optional namespace.
/// Caches publish subjects since the same few keys repeat per packet.
pub struct SubjectBuilder {
    /// "{ns}." or ""
    prefix: Arc<str>,
    publish_cache: DashMap<(Arc<str>, Arc<str>), Arc<str>>,
}

impl SubjectBuilder {
    pub fn new(namespace: Option<&str>) -> Self {
        let prefix: Arc<str> = match namespace {
            Some(ns) => format!("{}.", sanitize_subject(ns)).into(),
            None => "".into(),
        };
        Self {
            prefix,
            publish_cache: DashMap::new(),
        }
    }

    /// Subject a message published to `exchange` with `routing_key` lands on
    pub fn publish_subject(&self, exchange: &str, routing_key: &str) -> Arc<str> {
        let key: (Arc<str>, Arc<str>) = (exchange.into(), routing_key.into());
        if let Some(cached) = self.publish_cache.get(&key) {
            return Arc::clone(cached.value());
        }

        let subject: Arc<str> = if exchange.is_empty() {
            format!("{}{}", self.prefix, sanitize_subject(routing_key)).into()
        } else {
            format!(
                "{}{}.{}",
                self.prefix,
                sanitize_token(exchange),
                sanitize_subject(routing_key)
            )
            .into()
        };
        self.publish_cache.insert(key, Arc::clone(&subject));
        subject
    }

    /// Subjects captured by the stream backing `exchange`
    pub fn exchange_wildcard(&self, exchange: &str) -> String {
        format!("{}{}.>", self.prefix, sanitize_token(exchange))
    }

    /// Subject a queue bound to the default exchange receives
    pub fn queue_subject(&self, queue: &str) -> String {
        format!("{}{}", self.prefix, sanitize_subject(queue))
    }

    /// Consumer filter for a binding key; AMQP `#` becomes NATS `>`
    pub fn binding_filter(&self, exchange: &str, binding_key: &str) -> String {
        if exchange.is_empty() {
            return self.queue_subject(binding_key);
        }
        let pattern: Vec<&str> = binding_key
            .split('.')
            .map(|tok| match tok {
                "#" => ">",
                "*" => "*",
                "" => EMPTY_TOKEN,
                other => other,
            })
            .collect();
        format!("{}{}.{}", self.prefix, sanitize_token(exchange), pattern.join("."))
    }

    /// JetStream stream name for an exchange or queue
    pub fn stream_name(&self, name: &str) -> String {
        let raw = format!("{}{}", self.prefix, name);
        raw.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

/// Sanitize a single token: no separators, wildcards or whitespace
fn sanitize_token(token: &str) -> String {
    if token.is_empty() {
        return EMPTY_TOKEN.to_string();
    }
    token
        .chars()
        .map(|c| match c {
            '.' | '*' | '>' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

/// Sanitize a dotted key, keeping its token structure
fn sanitize_subject(key: &str) -> String {
    key.split('.').map(sanitize_token).collect::<Vec<_>>().join(".")
}
