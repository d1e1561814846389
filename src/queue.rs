/// Declarative description of a single broker queue.
///
/// An empty `name` asks the broker to generate one (`amq.gen-...`); the
/// resolved name is written back when the queue is declared, after which the
/// owning [`Channel`](crate::Channel) keeps it unchanged.
///
/// # Example
///
/// ```
/// use cloud_messenger::QueueSpec;
///
/// let replies = QueueSpec::server_named().exclusive(true);
/// assert!(replies.name.is_empty());
///
/// let requests = QueueSpec::new("requests").durable(true).prefetch(10);
/// assert_eq!(requests.prefetch_count, 10);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    /// Queue name; empty means broker-assigned.
    pub name: String,
    /// Survive broker restarts.
    pub durable: bool,
    /// Only the declaring connection may consume; removed when it closes.
    pub exclusive: bool,
    /// Removed once the last consumer is cancelled.
    pub auto_delete: bool,
    /// Drop any queued messages right after declaring.
    pub purge: bool,
    /// Maximum unacknowledged deliveries held by a consumer (at least 1).
    pub prefetch_count: u16,
}

impl QueueSpec {
    /// A queue with the given name and default flags.
    ///
    /// Surrounding whitespace is trimmed; a blank name means broker-assigned.
    pub fn new(name: impl Into<String>) -> Self {
        // ---
        Self {
            name: name.into().trim().to_string(),
            ..Self::default()
        }
    }

    /// A queue whose name the broker generates.
    pub fn server_named() -> Self {
        Self::default()
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    pub fn auto_delete(mut self, auto_delete: bool) -> Self {
        self.auto_delete = auto_delete;
        self
    }

    pub fn purge(mut self, purge: bool) -> Self {
        self.purge = purge;
        self
    }

    /// Set the prefetch count; 0 is clamped to 1.
    pub fn prefetch(mut self, count: u16) -> Self {
        self.prefetch_count = count.max(1);
        self
    }

    /// Whether the broker is expected to assign the name.
    pub fn is_server_named(&self) -> bool {
        self.name.is_empty()
    }
}

impl Default for QueueSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            durable: false,
            exclusive: false,
            auto_delete: false,
            purge: false,
            prefetch_count: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_name_is_trimmed() {
        // ---
        assert_eq!(QueueSpec::new("  replies ").name, "replies");
        assert!(QueueSpec::new("   ").is_server_named());
    }

    #[test]
    fn test_prefetch_floor() {
        // ---
        assert_eq!(QueueSpec::new("q").prefetch(0).prefetch_count, 1);
        assert_eq!(QueueSpec::default().prefetch_count, 1);
    }
}
