use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

/// A consumer of adapter or runner output.
///
/// Every method defaults to a no-op: a raw-stream consumer implements only
/// `deliver_samples`, the analysis runner implements only
/// `deliver_channel`, a control connection implements the text/byte pair.
pub trait Sink {
    /// Interleaved i16 samples (Int and Fm adapter output).
    fn deliver_samples(&mut self, _samples: &[i16], _timestamp: f64) {}

    /// One channel's planar float block. An empty `block` means the data
    /// was already written into buffers this sink shares with the adapter
    /// (the zero-copy handoff used by the analysis runner).
    fn deliver_channel(&mut self, _channel: usize, _block: &[f32], _timestamp: f64) {}

    /// A formatted text record (analysis feature output).
    fn deliver_text(&mut self, _record: &str) {}

    /// Raw bytes (binary-mode analysis feature output).
    fn deliver_bytes(&mut self, _bytes: &[u8]) {}
}

pub type SharedSink = Rc<RefCell<dyn Sink>>;
pub type WeakSink = Weak<RefCell<dyn Sink>>;

/// Label-to-sink name registry.
///
/// Producers hold a label plus this lookup capability, never ownership:
/// sink lifetime is controlled entirely by whoever created the sink, and a
/// failed resolution is the normal "consumer went away" signal, not an
/// error. Clones share the underlying map.
#[derive(Clone, Default)]
pub struct SinkRegistry {
    inner: Rc<RefCell<HashMap<String, WeakSink>>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<S: Sink + 'static>(&self, label: &str, sink: &Rc<RefCell<S>>) {
        let shared: SharedSink = sink.clone();
        self.inner
            .borrow_mut()
            .insert(label.to_string(), Rc::downgrade(&shared));
        tracing::debug!(label, "sink registered");
    }

    pub fn remove(&self, label: &str) {
        self.inner.borrow_mut().remove(label);
    }

    /// Resolve a label to a live sink, or `None` if it was never registered
    /// or has since been dropped.
    pub fn resolve(&self, label: &str) -> Option<SharedSink> {
        self.inner.borrow().get(label).and_then(Weak::upgrade)
    }

    /// Resolve to a weak handle, for holders that must not extend the
    /// sink's lifetime across calls (runner output listeners).
    pub fn resolve_weak(&self, label: &str) -> Option<WeakSink> {
        let inner = self.inner.borrow();
        let weak = inner.get(label)?;
        weak.upgrade().is_some().then(|| weak.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }
}
