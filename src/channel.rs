//! Асинхронный ограниченный MPMC канал с явным однократным закрытием.
//!
//! Значения лежат в lock-free очереди [`Injector`]. Ёмкость ограничивает
//! [`Semaphore`], permits которого - свободные слоты, получателей будит общий
//! [`Notify`].
//!
//! При нулевой ёмкости канал работает как rendezvous: `send` завершается
//! только после того, как получатель забрал значение. Брошенный до передачи
//! `send` значение не доставляет.
//!
//! Закрытие явное и однократное. Повторный [`Sender::close`] возвращает
//! [`Error::DoubleClose`]. После закрытия получатели дочитывают буфер и
//! получают `None`, только когда очередь пуста и не осталось send, начатых
//! до закрытия.

use crate::errors::{Error, Result};
use crossbeam::deque::{Injector, Steal};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::{oneshot, Notify, Semaphore};
use tokio_util::sync::CancellationToken;

struct Envelope<T> {
    value: T,
    // подтверждение rendezvous
    delivered: Option<oneshot::Sender<()>>,
}

struct Shared<T> {
    queue: Injector<Envelope<T>>,
    slots: Option<Semaphore>,
    capacity: usize,
    ready: Notify,
    closed: AtomicBool,
    sending: AtomicUsize,
    queued: AtomicUsize,
    senders: AtomicUsize,
    receivers: AtomicUsize,
    disconnected: CancellationToken,
}

impl<T> Shared<T> {
    fn push(&self, envelope: Envelope<T>) {
        self.queued.fetch_add(1, Ordering::SeqCst);
        self.queue.push(envelope);
        self.ready.notify_one();
    }

    fn pop(&self) -> Option<Envelope<T>> {
        loop {
            match self.queue.steal() {
                Steal::Success(envelope) => {
                    self.queued.fetch_sub(1, Ordering::SeqCst);
                    return Some(envelope);
                }
                Steal::Empty => return None,
                Steal::Retry => std::hint::spin_loop(),
            }
        }
    }

    /// `false`, если канал уже был закрыт.
    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(slots) = &self.slots {
            slots.close();
        }
        self.ready.notify_waiters();
        true
    }

    fn is_finished(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
            && self.sending.load(Ordering::SeqCst) == 0
            && self.queue.is_empty()
    }

    fn disconnect(&self) {
        self.disconnected.cancel();
        while self.pop().is_some() {}
    }
}

/// Отмечает send в процессе, чтобы получатели не завершились раньше него.
struct SendGuard<'a, T> {
    shared: &'a Shared<T>,
}

impl<'a, T> SendGuard<'a, T> {
    fn enter(shared: &'a Shared<T>) -> Self {
        shared.sending.fetch_add(1, Ordering::SeqCst);
        Self { shared }
    }
}

impl<T> Drop for SendGuard<'_, T> {
    fn drop(&mut self) {
        if self.shared.sending.fetch_sub(1, Ordering::SeqCst) == 1
            && self.shared.closed.load(Ordering::SeqCst)
        {
            self.shared.ready.notify_waiters();
        }
    }
}

/// Канал с буфером на `capacity` значений, rendezvous при `capacity == 0`.
pub fn bounded<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    let shared = Arc::new(Shared {
        queue: Injector::new(),
        slots: (capacity > 0).then(|| Semaphore::new(capacity.min(Semaphore::MAX_PERMITS))),
        capacity,
        ready: Notify::new(),
        closed: AtomicBool::new(false),
        sending: AtomicUsize::new(0),
        queued: AtomicUsize::new(0),
        senders: AtomicUsize::new(1),
        receivers: AtomicUsize::new(1),
        disconnected: CancellationToken::new(),
    });

    (
        Sender {
            shared: shared.clone(),
        },
        Receiver { shared },
    )
}

pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Sender<T> {
    /// Отправляет значение, ожидая свободный слот (или получателя в режиме
    /// rendezvous).
    ///
    /// # Errors
    ///
    /// - [`Error::Closed`] если канал закрыт, в том числе пока вызов ждёт слот.
    /// - [`Error::Disconnected`] если все получатели дропнуты.
    pub async fn send(&self, value: T) -> Result<()> {
        let shared = &*self.shared;
        let guard = SendGuard::enter(shared);

        if shared.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        if shared.disconnected.is_cancelled() {
            return Err(Error::Disconnected);
        }

        match &shared.slots {
            Some(slots) => {
                tokio::select! {
                    permit = slots.acquire() => match permit {
                        Ok(permit) => permit.forget(),
                        Err(_) => return Err(Error::Closed),
                    },
                    _ = shared.disconnected.cancelled() => return Err(Error::Disconnected),
                }
                shared.push(Envelope {
                    value,
                    delivered: None,
                });
                Ok(())
            }
            None => {
                let (tx, rx) = oneshot::channel();
                shared.push(Envelope {
                    value,
                    delivered: Some(tx),
                });
                drop(guard);

                tokio::select! {
                    taken = rx => taken.map_err(|_| Error::Disconnected),
                    _ = shared.disconnected.cancelled() => Err(Error::Disconnected),
                }
            }
        }
    }

    /// Закрывает канал.
    ///
    /// # Errors
    ///
    /// [`Error::DoubleClose`] если канал уже закрыт.
    pub fn close(&self) -> Result<()> {
        if self.shared.close() {
            Ok(())
        } else {
            Err(Error::DoubleClose)
        }
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn is_disconnected(&self) -> bool {
        self.shared.disconnected.is_cancelled()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.shared.queued.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.shared.senders.fetch_add(1, Ordering::SeqCst);
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        if self.shared.senders.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.shared.close();
        }
    }
}

pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Receiver<T> {
    /// Следующее значение, или `None` когда канал закрыт и полностью вычитан.
    pub async fn recv(&self) -> Option<T> {
        let shared = &*self.shared;
        loop {
            let notified = shared.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(envelope) = shared.pop() {
                if let Some(slots) = &shared.slots {
                    slots.add_permits(1);
                }
                if let Some(delivered) = envelope.delivered {
                    // Отправитель бросил send до передачи: значение не доставляется.
                    if delivered.send(()).is_err() {
                        continue;
                    }
                }
                return Some(envelope.value);
            }

            if shared.is_finished() {
                return None;
            }

            notified.await;
        }
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// `true`, если `recv` сразу вернёт `None`.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.shared.is_finished()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.shared.queued.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        self.shared.receivers.fetch_add(1, Ordering::SeqCst);
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        if self.shared.receivers.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.shared.disconnect();
        }
    }
}
