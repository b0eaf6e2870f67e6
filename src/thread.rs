use std::{io, panic, thread};

/// A group of threads, joined when finished or dropped
#[derive(Debug)]
pub(crate) struct Joiner<T>(Vec<thread::JoinHandle<T>>);

impl<T: Send + 'static> Joiner<T> {
    /// Spawn `threads` threads named `{name}-{i}`, each running a closure produced by `thread_fn`
    ///
    /// If spawning fails, the threads already started are detached: they are expected to exit
    /// once the channels they wait on are closed.
    pub(crate) fn new<Gen, ThreadFn>(name: &str, threads: usize, mut thread_fn: Gen) -> io::Result<Self>
    where
        Gen: FnMut() -> ThreadFn,
        ThreadFn: FnOnce() -> T,
        ThreadFn: Send + 'static,
    {
        let mut thread_handles = Vec::with_capacity(threads);
        for i in 0..threads {
            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, i))
                .spawn(thread_fn())?;
            thread_handles.push(handle);
        }
        Ok(Self(thread_handles))
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    pub(crate) fn finish(mut self) -> Vec<T> {
        self.0
            .drain(..)
            .map(|handle| match handle.join() {
                Ok(result) => result,
                Err(payload) => panic::resume_unwind(payload),
            })
            .collect()
    }
}

impl<T> Drop for Joiner<T> {
    fn drop(&mut self) {
        for t in self.0.drain(..) {
            let res = t.join();
            if let Err(payload) = res {
                if !thread::panicking() {
                    panic::resume_unwind(payload);
                }
            }
        }
    }
}
