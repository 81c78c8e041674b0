use parking_lot::Mutex;

/// The page a participant is viewing.
///
/// `navigate` and `reload` hand control to the host environment; a real
/// page load tears the current coordinator down and starts a fresh one.
pub trait Document: Send + Sync {
    fn location(&self) -> String;

    fn navigate(&self, url: &str);

    fn reload(&self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentEvent {
    Navigated(String),
    Reloaded,
}

/// Document that only records what it was asked to do.
///
/// Navigations update [`location`](Document::location) so follow-up checks
/// observe the new address, as a browser would after the load completes.
#[derive(Debug)]
pub struct RecordingDocument {
    location: Mutex<String>,
    events: Mutex<Vec<DocumentEvent>>,
}

impl RecordingDocument {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: Mutex::new(location.into()),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<DocumentEvent> {
        self.events.lock().clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                DocumentEvent::Navigated(url) => Some(url.clone()),
                DocumentEvent::Reloaded => None,
            })
            .collect()
    }

    pub fn reloads(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| matches!(event, DocumentEvent::Reloaded))
            .count()
    }

    /// Moves the document without recording an event, like a user typing an address.
    pub fn set_location(&self, url: impl Into<String>) {
        *self.location.lock() = url.into();
    }
}

impl Document for RecordingDocument {
    fn location(&self) -> String {
        self.location.lock().clone()
    }

    fn navigate(&self, url: &str) {
        *self.location.lock() = url.to_string();
        self.events.lock().push(DocumentEvent::Navigated(url.to_string()));
    }

    fn reload(&self) {
        self.events.lock().push(DocumentEvent::Reloaded);
    }
}
