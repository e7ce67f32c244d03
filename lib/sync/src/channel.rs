use std::collections::VecDeque;
use std::sync::Arc;

use atomic_refcell::AtomicRefCell;
use simsched::{cond_schedule, schedule};

type Buffer<T> = Arc<AtomicRefCell<VecDeque<T>>>;

/// The sending half of a [`channel`], cloneable so multiple simulated
/// threads can each hold one.
///
/// Unlike [`crate::Mutex`], nothing here is fallible: the other half's
/// `consume()` asserts non-emptiness rather than erroring, because the
/// contract is that callers only ever call it right after a `peek()`
/// established the buffer is non-empty, and nothing else can run in between
/// (only one simulated thread executes at a time).
pub struct Tx<T> {
    buf: Buffer<T>,
}

/// The receiving half of a [`channel`], cloneable so multiple simulated
/// threads can each hold one.
pub struct Rx<T> {
    buf: Buffer<T>,
}

impl<T> Clone for Tx<T> {
    fn clone(&self) -> Self {
        Self {
            buf: Arc::clone(&self.buf),
        }
    }
}

impl<T> Clone for Rx<T> {
    fn clone(&self) -> Self {
        Self {
            buf: Arc::clone(&self.buf),
        }
    }
}

/// Creates a paired [`Tx`]/[`Rx`] sharing one unbounded FIFO buffer.
pub fn channel<T>() -> (Tx<T>, Rx<T>) {
    let buf: Buffer<T> = Arc::new(AtomicRefCell::new(VecDeque::new()));
    (
        Tx {
            buf: Arc::clone(&buf),
        },
        Rx { buf },
    )
}

impl<T> Tx<T> {
    pub fn is_empty(&self) -> bool {
        self.buf.borrow().is_empty()
    }

    pub fn len(&self) -> usize {
        self.buf.borrow().len()
    }

    /// Pushes `item` onto the back of the buffer, then offers a context
    /// switch so a blocked receiver gets a chance to notice.
    pub fn send(&self, item: T) {
        self.buf.borrow_mut().push_back(item);
        schedule();
    }
}

impl<T: Clone> Tx<T> {
    /// Calls `f` with every item still pending, oldest to newest, without
    /// removing any of them. Used by readers that need to observe in-flight
    /// items from the sending side rather than drain them.
    pub fn scan(&self, mut f: impl FnMut(&T)) {
        for item in self.buf.borrow().iter() {
            f(item);
        }
    }
}

impl<T> Rx<T> {
    pub fn is_empty(&self) -> bool {
        self.buf.borrow().is_empty()
    }

    pub fn len(&self) -> usize {
        self.buf.borrow().len()
    }

    /// Pops the front item, non-suspending. Panics if the buffer is empty;
    /// callers are expected to have just called [`Rx::peek`].
    pub fn consume(&self) -> T {
        self.buf
            .borrow_mut()
            .pop_front()
            .expect("consume() called on an empty channel")
    }
}

impl<T: Clone> Rx<T> {
    /// Blocks (yielding on every poll) until the buffer is non-empty, then
    /// returns a clone of the head without removing it.
    pub fn peek(&self) -> T {
        cond_schedule(|| !self.buf.borrow().is_empty());
        self.buf.borrow().front().unwrap().clone()
    }

    /// `peek()` followed by `consume()`.
    pub fn recv(&self) -> T {
        let head = self.peek();
        self.consume();
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simsched::{schedule, Engine, ThreadConstructor};
    use std::sync::Arc as StdArc;

    #[test]
    fn send_then_recv_with_no_intervening_producer() {
        let (tx, rx) = channel::<u32>();
        let received = StdArc::new(AtomicReceivedSlot::default());
        let received2 = StdArc::clone(&received);

        let sender: ThreadConstructor = Box::new(move || {
            let tx = tx.clone();
            Box::new(move || {
                tx.send(42);
                Ok(())
            })
        });
        let receiver: ThreadConstructor = Box::new(move || {
            let rx = rx.clone();
            let received = StdArc::clone(&received2);
            Box::new(move || {
                let v = rx.recv();
                received.set(v);
                Ok(())
            })
        });

        let mut engine = Engine::with_seed(1);
        let result = engine.run(&[sender, receiver], 50);

        assert!(result.is_ok());
        assert_eq!(received.get(), Some(42));
    }

    #[test]
    fn peek_does_not_consume() {
        let (tx, rx) = channel::<u32>();
        tx.send(7);
        assert_eq!(rx.len(), 1);
        let ctor: ThreadConstructor = {
            let rx = rx.clone();
            Box::new(move || {
                let rx = rx.clone();
                Box::new(move || {
                    let v = rx.peek();
                    assert_eq!(v, 7);
                    schedule();
                    Ok(())
                })
            })
        };
        let mut engine = Engine::with_seed(1);
        let result = engine.run(&[ctor], 10);
        assert!(result.is_ok());
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn tx_scan_observes_pending_items_without_consuming() {
        let (tx, rx) = channel::<u32>();
        tx.send(1);
        tx.send(2);
        let mut seen = Vec::new();
        tx.scan(|item| seen.push(*item));
        assert_eq!(seen, vec![1, 2]);
        assert_eq!(rx.len(), 2);
    }

    /// Minimal single-slot box used only to shuttle a received value back
    /// out of a simulated thread for assertion, since the thread body runs
    /// on a detached OS thread.
    #[derive(Default)]
    struct AtomicReceivedSlot(AtomicRefCell<Option<u32>>);

    impl AtomicReceivedSlot {
        fn set(&self, v: u32) {
            *self.0.borrow_mut() = Some(v);
        }
        fn get(&self) -> Option<u32> {
            *self.0.borrow()
        }
    }
}
