use std::sync::{Arc, Mutex};

/// Fire-and-forget user notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str);
}

pub type NotifierHandle = Arc<dyn Notifier>;

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, message: &str) {
        log::info!("[{title}] {message}");
    }
}

/// Keeps every notification so a host can render them later.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, title: &str, message: &str) {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((title.to_string(), message.to_string()));
    }
}
