//! Build queue and its departure notifications.
//!
//! An item leaves the queue either by starting or by being cancelled. Both
//! paths publish a [`LeftItem`] to the [`QueueListeners`] the queue was built
//! with; the process-wide registry is what the CLI uses.

use chrono::{DateTime, Utc};
use filebind_ids::QueueItemId;
use filebind_protocol::{GoodName, QueueItemStatus};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Once, OnceLock, RwLock};
use tracing::{debug, info};

use crate::build::{Build, ParameterValue};
use crate::error::ParamError;
use crate::reaper::StashedFileReaper;

/// A scheduled, not yet started build.
#[derive(Debug)]
pub struct QueueItem {
    pub id: QueueItemId,
    pub job: String,
    pub parameters: Option<Vec<ParameterValue>>,
    pub status: QueueItemStatus,
    pub queued_at: DateTime<Utc>,
}

/// An item that just left the queue.
#[derive(Debug)]
pub struct LeftItem {
    pub item: QueueItem,
    cancelled: bool,
}

impl LeftItem {
    /// True when the item left without ever starting.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

pub trait QueueListener: Send + Sync {
    fn on_left(&self, item: &mut LeftItem);
}

/// Registry of queue listeners.
#[derive(Default)]
pub struct QueueListeners {
    listeners: RwLock<Vec<Arc<dyn QueueListener>>>,
}

impl QueueListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn QueueListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fire_left(&self, item: &mut LeftItem) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        for listener in listeners {
            listener.on_left(item);
        }
    }
}

static QUEUE_LISTENERS: OnceLock<Arc<QueueListeners>> = OnceLock::new();
static DEFAULT_LISTENERS: Once = Once::new();

/// Process-wide listener registry. Lives until the process exits.
pub fn queue_listeners() -> Arc<QueueListeners> {
    QUEUE_LISTENERS
        .get_or_init(|| Arc::new(QueueListeners::new()))
        .clone()
}

/// Register the built-in listeners on the process-wide registry. Safe to call
/// more than once.
pub fn install_default_listeners() {
    DEFAULT_LISTENERS.call_once(|| {
        queue_listeners().register(Arc::new(StashedFileReaper::new()));
    });
}

pub struct Queue {
    items: VecDeque<QueueItem>,
    last_numbers: HashMap<String, u64>,
    listeners: Arc<QueueListeners>,
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}

impl Queue {
    /// A queue publishing to the process-wide registry.
    pub fn new() -> Self {
        Self::with_listeners(queue_listeners())
    }

    pub fn with_listeners(listeners: Arc<QueueListeners>) -> Self {
        Self {
            items: VecDeque::new(),
            last_numbers: HashMap::new(),
            listeners,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &QueueItemId) -> Option<&QueueItem> {
        self.items.iter().find(|item| &item.id == id)
    }

    pub fn schedule(
        &mut self,
        job: &str,
        parameters: Option<Vec<ParameterValue>>,
    ) -> Result<QueueItemId, ParamError> {
        let job = GoodName::new(job)?;
        let item = QueueItem {
            id: QueueItemId::new(),
            job: job.to_string(),
            parameters,
            status: QueueItemStatus::Queued,
            queued_at: Utc::now(),
        };
        let id = item.id.clone();
        debug!(job = %job, item = %id, "scheduled");
        self.items.push_back(item);
        Ok(id)
    }

    /// Remove a queued item without starting it. False if it is not queued.
    pub fn cancel(&mut self, id: &QueueItemId) -> bool {
        let Some(index) = self.items.iter().position(|item| &item.id == id) else {
            return false;
        };
        let Some(mut item) = self.items.remove(index) else {
            return false;
        };
        item.status = QueueItemStatus::Cancelled;
        info!(job = %item.job, item = %item.id, "queue item cancelled");
        let mut left = LeftItem {
            item,
            cancelled: true,
        };
        self.listeners.fire_left(&mut left);
        true
    }

    /// Start the oldest item as the job's next numbered build.
    pub fn start_next(&mut self) -> Option<Build> {
        let mut item = self.items.pop_front()?;
        item.status = QueueItemStatus::Started;
        let number = self.last_numbers.entry(item.job.clone()).or_insert(0);
        *number += 1;
        let number = *number;

        let mut left = LeftItem {
            item,
            cancelled: false,
        };
        self.listeners.fire_left(&mut left);

        let build = Build::new(left.item.job.clone(), number, left.item.parameters.take());
        info!(build = %build.key(), number, "build started");
        Some(build)
    }
}
