//! Output callback bridge
//!
//! Exports report results by calling a plain `(ptr, len)` function pointer.
//! That pointer carries no context, so each call installs a frame holding
//! its own handler in a thread-local slot for the duration of the native
//! call. The trampoline copies the foreign buffer and forwards the copy to
//! whichever frame is current on the calling thread.
//!
//! Frames nest: a handler may itself invoke another export, and the outer
//! frame is restored when the inner binding is dropped.

use std::any::Any;
use std::cell::Cell;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use tracing::warn;

/// Native signature of the output callback handed to exports
pub type OutputCallback = unsafe extern "C" fn(data: *const u8, len: usize);

type Handler = dyn FnMut(Vec<u8>);

struct CallbackFrame {
    // Lifetime erased; valid while the owning binding is alive.
    handler: *mut Handler,
    deliveries: usize,
    panic: Option<Box<dyn Any + Send + 'static>>,
}

thread_local! {
    static CURRENT_FRAME: Cell<*mut CallbackFrame> = const { Cell::new(ptr::null_mut()) };
}

/// A handler bound to the current thread for one export call
///
/// Not `Send`: the binding must be dropped on the thread that created it.
pub struct CallbackBinding<'h> {
    frame: Box<CallbackFrame>,
    previous: *mut CallbackFrame,
    _handler: PhantomData<&'h mut Handler>,
}

impl<'h> CallbackBinding<'h> {
    /// Bind `handler` as the receiver for output on this thread
    pub fn bind(handler: &'h mut (dyn FnMut(Vec<u8>) + 'h)) -> Self {
        let handler: *mut (dyn FnMut(Vec<u8>) + 'h) = handler;
        // SAFETY: only the trait object's lifetime bound changes. The pointer
        // is unreachable once this binding drops, which happens within 'h.
        let handler: *mut Handler = unsafe { std::mem::transmute(handler) };

        let mut frame = Box::new(CallbackFrame {
            handler,
            deliveries: 0,
            panic: None,
        });
        let frame_ptr: *mut CallbackFrame = &mut *frame;
        let previous = CURRENT_FRAME.with(|current| current.replace(frame_ptr));

        Self {
            frame,
            previous,
            _handler: PhantomData,
        }
    }

    /// Function pointer to pass to the export
    pub fn callback(&self) -> OutputCallback {
        deliver_output
    }

    /// Payloads delivered so far
    pub fn deliveries(&self) -> usize {
        self.frame.deliveries
    }

    /// Unbind and return the delivery count
    ///
    /// A panic raised by the handler inside the callback resumes here.
    pub fn finish(mut self) -> usize {
        let deliveries = self.frame.deliveries;
        let panic = self.frame.panic.take();
        drop(self);
        if let Some(payload) = panic {
            panic::resume_unwind(payload);
        }
        deliveries
    }
}

impl Drop for CallbackBinding<'_> {
    fn drop(&mut self) {
        let previous = self.previous;
        let _ = CURRENT_FRAME.try_with(|current| current.set(previous));
    }
}

/// Copy `len` bytes from a foreign buffer into host memory
///
/// Returns `None` when the pair cannot describe a readable buffer.
///
/// # Safety
///
/// When `len > 0`, `data` must point to `len` readable bytes.
pub unsafe fn copy_foreign_buffer(data: *const u8, len: usize) -> Option<Vec<u8>> {
    if len == 0 {
        return Some(Vec::new());
    }
    if data.is_null() || len > isize::MAX as usize {
        return None;
    }
    Some(std::slice::from_raw_parts(data, len).to_vec())
}

unsafe extern "C" fn deliver_output(data: *const u8, len: usize) {
    let frame = CURRENT_FRAME
        .try_with(|current| current.get())
        .unwrap_or(ptr::null_mut());
    if frame.is_null() {
        warn!("Discarding {} byte extension output: no invocation bound on this thread", len);
        return;
    }

    let Some(payload) = copy_foreign_buffer(data, len) else {
        warn!("Discarding extension output with null pointer and length {}", len);
        return;
    };

    let frame = &mut *frame;
    if frame.panic.is_some() {
        return;
    }
    let handler = &mut *frame.handler;
    match panic::catch_unwind(AssertUnwindSafe(|| handler(payload))) {
        Ok(()) => frame.deliveries += 1,
        Err(payload) => frame.panic = Some(payload),
    }
}
