use std::cell::Cell;
use std::rc::Rc;

/// Handle for requesting regeneration of the external poll set.
///
/// A minder's descriptor contribution changes whenever its running state
/// does, so start/stop raise this flag and the descriptor-set owner checks
/// it once per loop iteration with [`PollRegen::take`]. Clones share the
/// flag; nothing here is thread-safe.
#[derive(Debug, Clone, Default)]
pub struct PollRegen {
    flag: Rc<Cell<bool>>,
}

impl PollRegen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.flag.set(true);
    }

    /// Returns true (and clears the flag) if regeneration was requested.
    pub fn take(&self) -> bool {
        self.flag.replace(false)
    }

    pub fn pending(&self) -> bool {
        self.flag.get()
    }
}
