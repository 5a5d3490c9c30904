//! Byte-counting I/O wrappers for the monitored listener.
//!
//! Every non-zero read or write on an accepted connection reports its size
//! to a counter callback, on the thread doing the I/O. The store-backed
//! counters call [`Store::add`], which waits for its turn to publish and
//! then broadcasts, so socket I/O is paced by the bus. Under
//! [`OverflowPolicy::Block`](crate::OverflowPolicy::Block) a full
//! subscriber can stall a read or write for up to the block timeout.

use crate::keys;
use crate::store::Store;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use tracing::warn;

/// Callback receiving a byte count.
pub type ByteCounter = Arc<dyn Fn(usize) + Send + Sync>;

/// Read and write counters shared by every connection of a listener.
#[derive(Clone)]
pub struct ByteCounters {
    pub on_read: ByteCounter,
    pub on_write: ByteCounter,
}

impl ByteCounters {
    pub fn new<R, W>(on_read: R, on_write: W) -> Self
    where
        R: Fn(usize) + Send + Sync + 'static,
        W: Fn(usize) + Send + Sync + 'static,
    {
        Self {
            on_read: Arc::new(on_read),
            on_write: Arc::new(on_write),
        }
    }

    /// Counters adding into `bytes.read.count` and `bytes.write.count`.
    pub fn for_store(store: Arc<Store>) -> Self {
        let read_store = Arc::clone(&store);
        Self::new(
            move |n| add_bytes(&read_store, keys::BYTES_READ, n),
            move |n| add_bytes(&store, keys::BYTES_WRITE, n),
        )
    }
}

impl fmt::Debug for ByteCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteCounters").finish_non_exhaustive()
    }
}

fn add_bytes(store: &Store, key: &str, n: usize) {
    let delta = i64::try_from(n).unwrap_or(i64::MAX);
    if let Err(e) = store.add(key, delta) {
        warn!(key, bytes = n, error = %e, "Failed to record byte count");
    }
}

/// A stream that reports the size of every read and write.
pub struct CountingStream<S> {
    inner: S,
    counters: ByteCounters,
}

impl<S> CountingStream<S> {
    pub fn new(inner: S, counters: ByteCounters) -> Self {
        Self { inner, counters }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Read> Read for CountingStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            (self.counters.on_read)(n);
        }
        Ok(n)
    }
}

impl<S: Write> Write for CountingStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        if n > 0 {
            (self.counters.on_write)(n);
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// A TCP listener whose accepted connections are counted.
pub struct CountingListener {
    inner: TcpListener,
    counters: ByteCounters,
}

impl CountingListener {
    pub fn bind(addr: impl ToSocketAddrs, counters: ByteCounters) -> io::Result<Self> {
        Ok(Self {
            inner: TcpListener::bind(addr)?,
            counters,
        })
    }

    /// Wrap an already bound listener.
    pub fn from_listener(inner: TcpListener, counters: ByteCounters) -> Self {
        Self { inner, counters }
    }

    pub fn accept(&self) -> io::Result<(CountingStream<TcpStream>, SocketAddr)> {
        let (stream, peer) = self.inner.accept()?;
        Ok((CountingStream::new(stream, self.counters.clone()), peer))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}
