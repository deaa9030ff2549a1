//! Callback registry.
//!
//! One optional slot per event kind. Setting a slot drops whatever was
//! there before: handlers are replaced, never chained.

use ringchan_core::entry::{Completed, IoFailure};

pub type CompletionHandler<B> = Box<dyn FnMut(Completed<B>) + Send>;
pub type ExceptionHandler = Box<dyn FnMut(IoFailure) + Send>;

pub struct Callbacks<B> {
    read: Option<CompletionHandler<B>>,
    write: Option<CompletionHandler<B>>,
    exception: Option<ExceptionHandler>,
}

impl<B> Default for Callbacks<B> {
    fn default() -> Self {
        Self {
            read: None,
            write: None,
            exception: None,
        }
    }
}

impl<B> Callbacks<B> {
    pub fn set_read(&mut self, handler: CompletionHandler<B>) {
        self.read = Some(handler);
    }

    pub fn set_write(&mut self, handler: CompletionHandler<B>) {
        self.write = Some(handler);
    }

    pub fn set_exception(&mut self, handler: ExceptionHandler) {
        self.exception = Some(handler);
    }

    pub fn has_read(&self) -> bool {
        self.read.is_some()
    }

    pub fn has_write(&self) -> bool {
        self.write.is_some()
    }

    pub fn has_exception(&self) -> bool {
        self.exception.is_some()
    }

    /// Returns `false` when no handler was registered (the payload is dropped).
    pub fn dispatch_read(&mut self, done: Completed<B>) -> bool {
        match self.read.as_mut() {
            Some(h) => {
                h(done);
                true
            }
            None => false,
        }
    }

    pub fn dispatch_write(&mut self, done: Completed<B>) -> bool {
        match self.write.as_mut() {
            Some(h) => {
                h(done);
                true
            }
            None => false,
        }
    }

    pub fn dispatch_exception(&mut self, failure: IoFailure) -> bool {
        match self.exception.as_mut() {
            Some(h) => {
                h(failure);
                true
            }
            None => false,
        }
    }
}

impl<B> std::fmt::Debug for Callbacks<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("read", &self.has_read())
            .field("write", &self.has_write())
            .field("exception", &self.has_exception())
            .finish()
    }
}
