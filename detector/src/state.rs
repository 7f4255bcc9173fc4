//! Observable application state.
//!
use tokio::sync::watch;

use crate::engine::InputShape;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Image,
    Video,
    Camera,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelStatus {
    pub loaded: bool,
    pub loading: bool,
    /// Load progress in `[0, 1]`.
    pub progress: f32,
    pub input_shape: Option<InputShape>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamState {
    pub kind: Option<StreamKind>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppState {
    pub model: ModelStatus,
    pub stream: StreamState,
    pub error: Option<String>,
}

/// Holds the `AppState` and notifies subscribers of every change.
#[derive(Debug)]
pub struct StateStore {
    tx: watch::Sender<AppState>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(AppState::default());
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<AppState> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> AppState {
        self.tx.borrow().clone()
    }

    pub fn set_model_loading(&self, progress: f32) {
        self.tx.send_modify(|state| {
            state.model.loading = true;
            state.model.progress = progress.clamp(0.0, 1.0);
        });
    }

    pub fn set_model(&self, input_shape: InputShape) {
        self.tx.send_modify(|state| {
            state.model = ModelStatus {
                loaded: true,
                loading: false,
                progress: 1.0,
                input_shape: Some(input_shape),
            };
        });
    }

    pub fn set_model_failed(&self) {
        self.tx.send_modify(|state| {
            state.model.loading = false;
            state.model.progress = 0.0;
        });
    }

    pub fn set_stream(&self, kind: StreamKind) {
        self.tx.send_modify(|state| {
            state.stream = StreamState { kind: Some(kind) };
        });
    }

    pub fn reset_stream(&self) {
        self.tx.send_modify(|state| state.stream = StreamState::default());
    }

    pub fn set_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.tx.send_modify(|state| state.error = Some(message));
    }

    pub fn clear_error(&self) {
        self.tx.send_modify(|state| state.error = None);
    }

    pub fn is_model_ready(&self) -> bool {
        let state = self.tx.borrow();
        state.model.loaded && !state.model.loading
    }

    pub fn is_model_loading(&self) -> bool {
        self.tx.borrow().model.loading
    }

    /// Load progress in whole percent.
    pub fn loading_progress(&self) -> u32 {
        (self.tx.borrow().model.progress * 100.0).round() as u32
    }

    pub fn stream_kind(&self) -> Option<StreamKind> {
        self.tx.borrow().stream.kind
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn shape() -> InputShape {
        InputShape {
            batch: 1,
            width: 640,
            height: 640,
            channels: 3,
        }
    }

    #[test]
    fn model_lifecycle() {
        let store = StateStore::new();
        assert!(!store.is_model_ready());

        store.set_model_loading(0.456);
        assert!(store.is_model_loading());
        assert_eq!(store.loading_progress(), 46);

        store.set_model(shape());
        assert!(store.is_model_ready());
        assert_eq!(store.loading_progress(), 100);
        assert_eq!(store.snapshot().model.input_shape, Some(shape()));
    }

    #[test]
    fn failed_load_is_not_ready() {
        let store = StateStore::new();
        store.set_model_loading(0.5);
        store.set_model_failed();
        assert!(!store.is_model_ready());
        assert!(!store.is_model_loading());
    }

    #[tokio::test]
    async fn subscribers_see_stream_changes() {
        let store = StateStore::new();
        let mut rx = store.subscribe();

        store.set_stream(StreamKind::Camera);
        rx.changed().await.unwrap();
        assert_eq!(
            rx.borrow().stream,
            StreamState {
                kind: Some(StreamKind::Camera)
            }
        );

        store.reset_stream();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().stream, StreamState::default());
    }

    #[test]
    fn errors_are_set_and_cleared() {
        let store = StateStore::new();
        store.set_error("Unable to load image: broken");
        assert_eq!(store.snapshot().error.as_deref(), Some("Unable to load image: broken"));
        store.clear_error();
        assert_eq!(store.snapshot().error, None);
    }
}
