use super::{
    channel::Receiver,
    errors::{Error, Result},
    model::{Completion, JoinOrdering},
};
use futures::stream::{self, Stream};
use tokio::time::Duration;

/// Сторона чтения [`WorkerPool`](crate::WorkerPool).
///
/// `recv` возвращает `None` только после выхода всех воркеров и чтения всех
/// результатов: конец потока означает конец работы. Клоны читают один канал,
/// каждый результат достаётся ровно одному из них.
pub struct Results<R> {
    receiver: Receiver<Completion<R>>,
}

impl<R> Clone for Results<R> {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.clone(),
        }
    }
}

impl<R> Results<R> {
    pub(crate) fn new(receiver: Receiver<Completion<R>>) -> Self {
        Self { receiver }
    }

    #[inline(always)]
    pub async fn recv(&self) -> Option<Completion<R>> {
        self.receiver.recv().await
    }

    /// # Errors
    ///
    /// [`Error::Timeout`] если за `timeout` ничего не пришло и канал не завершился.
    pub async fn recv_timeout(&self, timeout: Duration) -> Result<Option<Completion<R>>> {
        tokio::time::timeout(timeout, self.receiver.recv())
            .await
            .map_err(|_| Error::Timeout)
    }

    /// `true`, когда канал результатов закрыт и пуст.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.receiver.is_finished()
    }

    /// Результаты, ждущие чтения.
    #[inline]
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn into_stream(self) -> impl Stream<Item = Completion<R>> {
        stream::unfold(self, |results| async move {
            let next = results.recv().await?;
            Some((next, results))
        })
    }

    /// Вычитывает канал до конца.
    pub async fn collect(self, ordering: JoinOrdering) -> Vec<Completion<R>> {
        let mut completions = Vec::new();
        while let Some(completion) = self.recv().await {
            completions.push(completion);
        }
        if ordering == JoinOrdering::Ordered {
            completions.sort_by_key(|completion| completion.task);
        }
        completions
    }
}
