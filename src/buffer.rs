use crate::frame::Frame;
use crossbeam::queue::ArrayQueue;

/// Pull contract for a source feeding a pipeline through a [`FrameBuffer`]
pub trait FrameSource<F: Frame> {
    /// Remove and return the next ready frame, if any
    fn pop_frame(&mut self) -> Option<F>;

    /// Whether a frame can be popped right now
    fn frame_available(&self) -> bool;

    /// Try to refill the buffer from the underlying source.
    /// Returns whether any frame was obtained.
    fn pull_source(&mut self) -> bool;

    /// Whether the source can still produce frames
    fn active(&self) -> bool;
}

/// A fixed-capacity lock-free queue of frame handles.
///
/// Push fails when full and pop fails when empty; neither blocks. Frames
/// still queued when the buffer is dropped are disposed.
#[derive(Debug)]
pub struct FrameBuffer<F: Frame> {
    queue: ArrayQueue<F>,
}

impl<F: Frame> FrameBuffer<F> {
    /// Create a buffer holding at most `capacity` frames
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
        }
    }

    /// Attempt to queue a frame. A full buffer hands the frame back.
    pub fn try_push(&self, frame: F) -> Result<(), F> {
        self.queue.push(frame)
    }

    /// Attempt to take the oldest queued frame
    pub fn try_pop(&self) -> Option<F> {
        self.queue.pop()
    }

    /// Number of queued frames
    pub fn size(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    /// Release a frame the source decided not to forward
    pub fn dispose(&self, frame: F) {
        F::dispose(frame);
    }
}

impl<F: Frame> Drop for FrameBuffer<F> {
    fn drop(&mut self) {
        let mut drained = 0usize;
        while let Some(frame) = self.queue.pop() {
            F::dispose(frame);
            drained += 1;
        }
        if drained > 0 {
            tracing::debug!(drained, "disposed frames left in buffer");
        }
    }
}

/// A [`FrameSource`] backed by an iterator, refilled in buffer-sized batches
pub struct IteratorSource<F: Frame, I: Iterator<Item = F>> {
    buffer: FrameBuffer<F>,
    iter: Option<I>,
}

impl<F: Frame, I: Iterator<Item = F>> IteratorSource<F, I> {
    /// Buffer up to `capacity` frames pulled from `iter`
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(iter: I, capacity: usize) -> Self {
        Self {
            buffer: FrameBuffer::new(capacity),
            iter: Some(iter),
        }
    }

    pub fn buffer(&self) -> &FrameBuffer<F> {
        &self.buffer
    }
}

impl<F: Frame, I: Iterator<Item = F>> FrameSource<F> for IteratorSource<F, I> {
    fn pop_frame(&mut self) -> Option<F> {
        self.buffer.try_pop()
    }

    fn frame_available(&self) -> bool {
        !self.buffer.is_empty()
    }

    fn pull_source(&mut self) -> bool {
        let Some(iter) = self.iter.as_mut() else {
            return false;
        };

        let mut pulled = false;
        while !self.buffer.is_full() {
            match iter.next() {
                Some(frame) => {
                    // Single producer and not full, so this cannot bounce.
                    if let Err(frame) = self.buffer.try_push(frame) {
                        self.buffer.dispose(frame);
                        break;
                    }
                    pulled = true;
                }
                None => {
                    self.iter = None;
                    break;
                }
            }
        }
        pulled
    }

    fn active(&self) -> bool {
        self.iter.is_some()
    }
}
