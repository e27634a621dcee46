// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! Socket wait-set: readiness multiplexer over transport connections.
//!
//! One consumer thread calls [`SockWaitset::wait`]; any thread may add,
//! remove, purge, or trigger through a [`SockWaitsetHandle`]. Triggering is
//! level-triggered: a trigger that lands before `wait` is entered makes the
//! next `wait` return immediately. Spurious wakeups are permitted; a wait
//! result enumerates each ready connection at most once.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mio::{Events, Interest, Poll, Registry, Token, Waker};
use parking_lot::Mutex;

const TRIGGER_TOKEN: Token = Token(usize::MAX - 1);

/// A pollable transport connection.
pub trait Connection: Send {
    /// The mio event source to register for readability.
    fn source(&mut self) -> &mut dyn mio::event::Source;

    /// Downcast support for transport-specific I/O on a ready connection.
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

impl Connection for mio::net::UdpSocket {
    fn source(&mut self) -> &mut dyn mio::event::Source {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

impl Connection for mio::net::TcpStream {
    fn source(&mut self) -> &mut dyn mio::event::Source {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

/// Build a non-blocking UDP connection with address reuse, ready for
/// [`SockWaitsetHandle::add`]. Reuse matters because RTPS discovery binds
/// several sockets to the same well-known ports.
pub fn udp_connection(bind: std::net::SocketAddr) -> io::Result<mio::net::UdpSocket> {
    let domain = if bind.is_ipv4() {
        socket2::Domain::IPV4
    } else {
        socket2::Domain::IPV6
    };
    let socket = socket2::Socket::new(domain, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&bind.into())?;
    Ok(mio::net::UdpSocket::from_std(socket.into()))
}

struct WsShared {
    registry: Registry,
    waker: Waker,
    trigger_pending: AtomicBool,
    conns: Mutex<Vec<Option<Box<dyn Connection>>>>,
}

impl WsShared {
    fn detach(&self, conns: &mut Vec<Option<Box<dyn Connection>>>, index: usize) {
        if let Some(slot) = conns.get_mut(index) {
            if let Some(mut conn) = slot.take() {
                let _ = self.registry.deregister(conn.source());
            }
        }
    }
}

/// Producer-side handle: add/remove/purge connections and trigger.
#[derive(Clone)]
pub struct SockWaitsetHandle {
    shared: Arc<WsShared>,
}

impl SockWaitsetHandle {
    /// Register a connection for readability. Returns its index.
    pub fn add(&self, mut conn: Box<dyn Connection>) -> io::Result<usize> {
        let mut conns = self.shared.conns.lock();
        let index = conns.iter().position(Option::is_none).unwrap_or(conns.len());
        self.shared
            .registry
            .register(conn.source(), Token(index), Interest::READABLE)?;
        if index == conns.len() {
            conns.push(Some(conn));
        } else {
            conns[index] = Some(conn);
        }
        Ok(index)
    }

    /// Deregister and drop the connection at `index`.
    pub fn remove(&self, index: usize) {
        let mut conns = self.shared.conns.lock();
        self.shared.detach(&mut conns, index);
    }

    /// Detach every connection added after `index`, atomically with
    /// respect to the consumer.
    pub fn purge(&self, index: usize) {
        let mut conns = self.shared.conns.lock();
        for i in (index + 1)..conns.len() {
            self.shared.detach(&mut conns, i);
        }
    }

    /// Wake the consumer. Level-triggered: the wakeup is remembered until
    /// the next `wait` observes it.
    pub fn trigger(&self) {
        self.shared.trigger_pending.store(true, Ordering::Release);
        if let Err(e) = self.shared.waker.wake() {
            log::debug!("[waitset] waker failed: {}", e);
        }
    }

    /// Run `f` on the connection at `index` (e.g. to drain a socket).
    pub fn with_connection<R>(
        &self,
        index: usize,
        f: impl FnOnce(&mut dyn Connection) -> R,
    ) -> Option<R> {
        let mut conns = self.shared.conns.lock();
        match conns.get_mut(index) {
            Some(slot) => match slot.as_deref_mut() {
                Some(conn) => Some(f(conn)),
                None => None,
            },
            None => None,
        }
    }
}

/// One wait's result: the trigger flag plus ready connection indices.
pub struct WaitsetEvents {
    triggered: bool,
    ready: Vec<usize>,
    next: usize,
}

impl WaitsetEvents {
    /// Whether an asynchronous trigger woke this wait.
    #[must_use]
    pub fn triggered(&self) -> bool {
        self.triggered
    }

    /// Next ready connection index; each index is reported at most once.
    pub fn next_event(&mut self) -> Option<usize> {
        let idx = self.ready.get(self.next).copied();
        self.next += 1;
        idx
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.triggered && self.ready.is_empty()
    }
}

/// The consumer side. Single thread calls `wait`.
pub struct SockWaitset {
    poll: Poll,
    events: Events,
    shared: Arc<WsShared>,
}

impl SockWaitset {
    pub fn new() -> io::Result<SockWaitset> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let waker = Waker::new(poll.registry(), TRIGGER_TOKEN)?;
        Ok(SockWaitset {
            poll,
            events: Events::with_capacity(128),
            shared: Arc::new(WsShared {
                registry,
                waker,
                trigger_pending: AtomicBool::new(false),
                conns: Mutex::new(Vec::new()),
            }),
        })
    }

    #[must_use]
    pub fn handle(&self) -> SockWaitsetHandle {
        SockWaitsetHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Block until a connection is readable, a trigger lands, or the
    /// timeout expires (`Ok(None)`).
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<Option<WaitsetEvents>> {
        // trigger before wait => wake immediately
        if self.shared.trigger_pending.swap(false, Ordering::AcqRel) {
            return Ok(Some(WaitsetEvents {
                triggered: true,
                ready: Vec::new(),
                next: 0,
            }));
        }

        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                // spurious wakeup is allowed by the contract
                return Ok(Some(WaitsetEvents {
                    triggered: false,
                    ready: Vec::new(),
                    next: 0,
                }));
            }
            Err(e) => return Err(e),
        }

        if self.events.is_empty() {
            return Ok(None);
        }

        let mut triggered = false;
        let mut ready = Vec::new();
        for event in &self.events {
            if event.token() == TRIGGER_TOKEN {
                triggered = true;
                self.shared.trigger_pending.store(false, Ordering::Release);
            } else {
                let idx = event.token().0;
                if !ready.contains(&idx) {
                    ready.push(idx);
                }
            }
        }
        // only report connections still attached
        {
            let conns = self.shared.conns.lock();
            ready.retain(|&i| conns.get(i).is_some_and(Option::is_some));
        }
        Ok(Some(WaitsetEvents {
            triggered,
            ready,
            next: 0,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Instant;

    fn udp_pair() -> (mio::net::UdpSocket, std::net::UdpSocket, SocketAddr) {
        let rx = mio::net::UdpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = rx.local_addr().unwrap();
        let tx = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        (rx, tx, addr)
    }

    #[test]
    fn test_trigger_before_wait_wakes_immediately() {
        let mut ws = SockWaitset::new().unwrap();
        let h = ws.handle();
        h.trigger();
        let start = Instant::now();
        let ev = ws.wait(Some(Duration::from_secs(2))).unwrap().unwrap();
        assert!(ev.triggered());
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_trigger_from_other_thread() {
        let mut ws = SockWaitset::new().unwrap();
        let h = ws.handle();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            h.trigger();
        });
        let start = Instant::now();
        // spurious wakeups are allowed: loop until the trigger arrives
        loop {
            match ws.wait(Some(Duration::from_secs(2))).unwrap() {
                Some(ev) if ev.triggered() => break,
                Some(_) => continue,
                None => panic!("timed out waiting for trigger"),
            }
        }
        assert!(start.elapsed() >= Duration::from_millis(40));
        t.join().unwrap();
    }

    #[test]
    fn test_wait_timeout() {
        let mut ws = SockWaitset::new().unwrap();
        let start = Instant::now();
        let ev = ws.wait(Some(Duration::from_millis(50))).unwrap();
        assert!(ev.is_none());
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_ready_connection_reported_once() {
        let mut ws = SockWaitset::new().unwrap();
        let h = ws.handle();
        let (rx, tx, addr) = udp_pair();
        let idx = h.add(Box::new(rx)).unwrap();

        tx.send_to(b"ping", addr).unwrap();
        let mut seen = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        while seen.is_empty() && Instant::now() < deadline {
            if let Some(mut ev) = ws.wait(Some(Duration::from_millis(100))).unwrap() {
                while let Some(i) = ev.next_event() {
                    seen.push(i);
                }
            }
        }
        assert_eq!(seen, vec![idx]);

        // drain so the next wait doesn't see it again
        let drained = h
            .with_connection(idx, |c| {
                let sock = c
                    .as_any_mut()
                    .downcast_mut::<mio::net::UdpSocket>()
                    .expect("udp connection");
                let mut buf = [0u8; 16];
                sock.recv_from(&mut buf).map(|(n, _)| n)
            })
            .unwrap()
            .unwrap();
        assert_eq!(drained, 4);
    }

    #[test]
    fn test_purge_detaches_later_connections() {
        let mut ws = SockWaitset::new().unwrap();
        let h = ws.handle();
        let (rx0, _tx0, _a0) = udp_pair();
        let (rx1, tx1, a1) = udp_pair();
        let (rx2, tx2, a2) = udp_pair();
        let i0 = h.add(Box::new(rx0)).unwrap();
        let i1 = h.add(Box::new(rx1)).unwrap();
        let i2 = h.add(Box::new(rx2)).unwrap();
        assert_eq!((i0, i1, i2), (0, 1, 2));

        h.purge(i0);
        tx1.send_to(b"x", a1).unwrap();
        tx2.send_to(b"y", a2).unwrap();

        // purged connections never surface
        let deadline = Instant::now() + Duration::from_millis(300);
        while Instant::now() < deadline {
            if let Some(mut ev) = ws.wait(Some(Duration::from_millis(50))).unwrap() {
                while let Some(i) = ev.next_event() {
                    panic!("purged connection {i} reported ready");
                }
            }
        }
    }

    #[test]
    fn test_udp_connection_builder() {
        let mut ws = SockWaitset::new().unwrap();
        let h = ws.handle();
        let sock = udp_connection("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = sock.local_addr().unwrap();
        let idx = h.add(Box::new(sock)).unwrap();
        let tx = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        tx.send_to(b"hi", addr).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut got = false;
        while !got && Instant::now() < deadline {
            if let Some(mut ev) = ws.wait(Some(Duration::from_millis(100))).unwrap() {
                while let Some(i) = ev.next_event() {
                    assert_eq!(i, idx);
                    got = true;
                }
            }
        }
        assert!(got);
    }

    #[test]
    fn test_remove_frees_slot_for_reuse() {
        let ws = SockWaitset::new().unwrap();
        let h = ws.handle();
        let (rx0, _t0, _a0) = udp_pair();
        let (rx1, _t1, _a1) = udp_pair();
        let i0 = h.add(Box::new(rx0)).unwrap();
        h.remove(i0);
        let i0b = h.add(Box::new(rx1)).unwrap();
        assert_eq!(i0, i0b);
    }
}
