// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Progress events for long running operations.
//!
//! Workers publish [Event]s to an [EventBus]. Any number of subscribers
//! (a progress UI, a log sink) receive them. Publishing never blocks; a
//! subscriber that falls behind misses the oldest events.

use {
    std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    tokio::sync::broadcast,
};

/// Default number of events buffered per subscriber.
pub const DEFAULT_CAPACITY: usize = 64;

/// Shared progress state for one task.
///
/// Cloning yields a handle to the same task.
#[derive(Clone, Debug)]
pub struct TaskProgress {
    title: Arc<Mutex<String>>,
    stage: Arc<AtomicUsize>,
    stages: usize,
    done: Arc<AtomicBool>,
}

impl TaskProgress {
    pub fn new(title: impl Into<String>, stages: usize) -> Self {
        Self {
            title: Arc::new(Mutex::new(title.into())),
            stage: Arc::new(AtomicUsize::new(0)),
            stages,
            done: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn title(&self) -> String {
        match self.title.lock() {
            Ok(title) => title.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set_title(&self, title: impl Into<String>) {
        match self.title.lock() {
            Ok(mut guard) => *guard = title.into(),
            Err(poisoned) => *poisoned.into_inner() = title.into(),
        }
    }

    /// Advance to the next stage, saturating at the final stage.
    pub fn advance(&self) {
        let stages = self.stages;
        let _ = self
            .stage
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |stage| {
                Some((stage + 1).min(stages))
            });
    }

    pub fn stage(&self) -> usize {
        self.stage.load(Ordering::SeqCst)
    }

    pub fn stages(&self) -> usize {
        self.stages
    }

    pub fn finish(&self) {
        self.stage.store(self.stages, Ordering::SeqCst);
        self.done.store(true, Ordering::SeqCst);
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
pub enum Event {
    /// A final result to show the user.
    Report { title: String, body: String },
    /// An informational message.
    Notification { title: String, body: String },
    /// Input is being requested.
    InputPrompt { message: String, sensitive: bool },
    /// A long running task started.
    Task(TaskProgress),
    /// The application is exiting.
    Exit,
}

/// A broadcast channel of [Event]s.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));

        Self { sender }
    }

    /// Publish an event. Returns the number of subscribers it reached.
    pub fn publish(&self, event: Event) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Publish a new task and return its progress handle.
    pub fn task(&self, title: impl Into<String>, stages: usize) -> TaskProgress {
        let progress = TaskProgress::new(title, stages);
        self.publish(Event::Task(progress.clone()));

        progress
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn progress_saturates() {
        let progress = TaskProgress::new("upload", 2);
        progress.advance();
        progress.advance();
        progress.advance();

        assert_eq!(progress.stage(), 2);
        assert!(!progress.is_done());

        progress.finish();
        assert!(progress.is_done());
    }

    #[tokio::test]
    async fn subscribers_share_task() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        assert_eq!(bus.publish(Event::Exit), 1);

        let task = bus.task("polling", 3);
        task.advance();

        assert!(matches!(rx.recv().await.unwrap(), Event::Exit));

        match rx.recv().await.unwrap() {
            Event::Task(progress) => {
                assert_eq!(progress.title(), "polling");
                assert_eq!(progress.stage(), 1);
            }
            _ => panic!("expected task event"),
        }
    }

    #[test]
    fn publish_without_subscribers() {
        let bus = EventBus::new(1);
        assert_eq!(bus.publish(Event::Exit), 0);
    }
}
