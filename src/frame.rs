use std::sync::Arc;

/// Contract for the data units flowing through a pipeline.
///
/// A frame is a cheap, duplicable handle (typically reference counted) that
/// can move between worker threads. The engine never builds frames; it only
/// moves them through the chain and calls [`Frame::dispose`] exactly once per
/// admitted frame, after the last stage has returned it.
pub trait Frame: Send + 'static {
    /// Release the resources behind the handle
    fn dispose(frame: Self);

    /// Whether this is a null handle. Empty frames are never admitted.
    fn is_empty(&self) -> bool {
        false
    }
}

/// Shared frames are released by dropping the handle.
impl<T: Send + Sync + 'static> Frame for Arc<T> {
    fn dispose(frame: Self) {
        drop(frame);
    }
}

/// `None` is the null handle.
impl<F: Frame> Frame for Option<F> {
    fn dispose(frame: Self) {
        if let Some(frame) = frame {
            F::dispose(frame);
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Some(frame) => frame.is_empty(),
            None => true,
        }
    }
}
