//! Background batch production.

use crate::common::*;
use std::sync::atomic::Ordering as AtomicOrdering;

/// Runs producers on worker threads and buffers their outputs.
///
/// The buffer is a bounded channel, so workers block once `capacity` items
/// are waiting. An error returned by a producer is handed to the consumer and
/// ends that worker.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct PrefetchWrapper<T> {
    #[derivative(Debug = "ignore")]
    receiver: Option<flume::Receiver<Result<T>>>,
    stop: Arc<AtomicBool>,
    #[derivative(Debug = "ignore")]
    workers: Vec<JoinHandle<()>>,
}

impl<T> PrefetchWrapper<T>
where
    T: 'static + Send,
{
    /// Starts `num_workers` threads, each running the producer built by
    /// `make_producer(worker_index)`.
    pub fn new<M, P>(num_workers: usize, capacity: usize, mut make_producer: M) -> Result<Self>
    where
        M: FnMut(usize) -> Result<P>,
        P: 'static + FnMut() -> Result<T> + Send,
    {
        ensure!(num_workers > 0, "num_workers must be positive");
        ensure!(capacity > 0, "capacity must be positive");

        let (sender, receiver) = flume::bounded(capacity);
        let stop = Arc::new(AtomicBool::new(false));

        let workers: Vec<_> = (0..num_workers)
            .map(|index| -> Result<_> {
                let mut producer = make_producer(index)?;
                let sender = sender.clone();
                let stop = stop.clone();

                let handle = thread::Builder::new()
                    .name(format!("prefetch-{}", index))
                    .spawn(move || {
                        while !stop.load(AtomicOrdering::SeqCst) {
                            let item = producer();
                            let failed = item.is_err();
                            if sender.send(item).is_err() || failed {
                                break;
                            }
                        }
                    })?;
                Ok(handle)
            })
            .try_collect()?;

        Ok(Self {
            receiver: Some(receiver),
            stop,
            workers,
        })
    }
}

impl<T> PrefetchWrapper<T> {
    /// Blocks until the next item is available.
    pub fn get_item(&self) -> Result<T> {
        let receiver = self
            .receiver
            .as_ref()
            .ok_or_else(|| format_err!("the prefetcher is closed"))?;
        receiver
            .recv()
            .map_err(|_| format_err!("all prefetch workers have terminated"))?
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }
}

impl<T> Drop for PrefetchWrapper<T> {
    fn drop(&mut self) {
        self.stop.store(true, AtomicOrdering::SeqCst);

        // disconnect the channel to wake up blocked workers
        drop(self.receiver.take());

        self.workers.drain(..).for_each(|handle| {
            if handle.join().is_err() {
                warn!("a prefetch worker panicked");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn items_from_all_workers() {
        let prefetch = PrefetchWrapper::new(2, 4, |index| {
            let mut count = 0;
            Ok(move || {
                count += 1;
                Ok((index, count))
            })
        })
        .unwrap();
        assert_eq!(prefetch.num_workers(), 2);

        let items: Vec<_> = (0..20).map(|_| prefetch.get_item().unwrap()).collect();
        assert!(items.iter().all(|&(index, count)| index < 2 && count >= 1));
    }

    #[test]
    fn producer_error_reaches_consumer() {
        let prefetch = PrefetchWrapper::new(1, 1, |_| {
            let mut count = 0;
            Ok(move || {
                count += 1;
                ensure!(count < 3, "exhausted");
                Ok(count)
            })
        })
        .unwrap();

        assert_eq!(prefetch.get_item().unwrap(), 1);
        assert_eq!(prefetch.get_item().unwrap(), 2);
        assert!(prefetch.get_item().is_err());
        // the worker has terminated
        assert!(prefetch.get_item().is_err());
    }

    #[test]
    fn drop_stops_blocked_workers() {
        let produced = Arc::new(AtomicUsize::new(0));
        let prefetch = {
            let produced = produced.clone();
            PrefetchWrapper::new(3, 2, move |_| {
                let produced = produced.clone();
                Ok(move || {
                    produced.fetch_add(1, AtomicOrdering::SeqCst);
                    Ok(())
                })
            })
            .unwrap()
        };
        prefetch.get_item().unwrap();
        drop(prefetch);

        let after_drop = produced.load(AtomicOrdering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(produced.load(AtomicOrdering::SeqCst), after_drop);
    }

    #[test]
    fn reject_invalid_arguments() {
        let result = PrefetchWrapper::<()>::new(0, 1, |_| Ok(|| Ok(())));
        assert!(result.is_err());
    }
}
