//! Black-box lifecycle scenarios (SPEC_FULL.md §8) driven over real
//! loopback TCP sockets and the `mio` reference poller, exercising the
//! full accept -> read -> write -> close -> reclaim path end to end.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::fd::IntoRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dcb_core::poller::mio_poller::MioPoller;
use dcb_core::poller::Poller;
use dcb_core::protocol::echo::EchoProtocol;
use dcb_core::protocol::Protocol;
use dcb_core::registry::Registry;
use dcb_core::zombie::{close_dcb, ZombieList};

/// A tiny single-threaded harness standing in for the demo binary's
/// worker pool: one thread runs `mio::Poll`, dispatches straight into the
/// protocol callbacks inline (no job queue), and calls
/// `process_zombies(0, ...)` once per cycle, exactly as a lone polling
/// worker would.
fn spawn_server(registry: Arc<Registry>, zombies: Arc<ZombieList>) -> (u16, Arc<dyn Poller>, std::thread::JoinHandle<()>, Arc<AtomicBool>) {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    std_listener.set_nonblocking(true).unwrap();
    let port = std_listener.local_addr().unwrap().port();

    let mut poll = mio::Poll::new().unwrap();
    let poller: Arc<dyn Poller> = Arc::new(MioPoller::new(&poll, 1).unwrap());
    let protocol: Arc<dyn Protocol> = Arc::new(EchoProtocol::new());

    let listener_fd = std_listener.into_raw_fd();
    let listener_dcb = registry.adopt_listener(listener_fd, protocol, poller.as_ref()).unwrap();

    let shutdown = Arc::new(AtomicBool::new(false));
    let handle = {
        let poller = poller.clone();
        let registry = registry.clone();
        let zombies = zombies.clone();
        let shutdown = shutdown.clone();
        std::thread::spawn(move || {
            let mut events = mio::Events::with_capacity(64);
            let mut conns = std::collections::HashMap::new();
            while !shutdown.load(Ordering::Relaxed) {
                poll.poll(&mut events, Some(Duration::from_millis(50))).unwrap();
                for event in events.iter() {
                    let fd = event.token().0 as i32;
                    if fd == listener_fd {
                        while let Some(new_dcb) = registry.accept(&listener_dcb, poller.as_ref()) {
                            conns.insert(new_dcb.fd(), new_dcb);
                        }
                        continue;
                    }
                    let Some(dcb) = conns.get(&fd).cloned() else { continue };
                    if event.is_readable() {
                        if let Err(_e) = dcb.protocol().read(&dcb) {
                            conns.remove(&fd);
                            close_dcb(&dcb, poller.as_ref(), &zombies);
                        }
                    }
                    if event.is_writable() {
                        let _ = dcb.drain_writeq();
                    }
                }
                zombies.process_zombies(0, &registry);
            }
        })
    };

    (port, poller, handle, shutdown)
}

#[test]
fn happy_echo_round_trip() {
    let registry = Arc::new(Registry::new());
    let zombies = Arc::new(ZombieList::new());
    let (port, _poller, handle, shutdown) = spawn_server(registry.clone(), zombies.clone());

    let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
    client.write_all(b"ping1234").unwrap();

    let mut buf = [0u8; 8];
    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    client.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"ping1234");

    drop(client);

    // give the single worker a few cycles to notice the peer close, close
    // the dcb, and reclaim it.
    let deadline = Instant::now() + Duration::from_secs(2);
    while registry.len() > 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(registry.len(), 0, "closed connection must eventually be finally freed");

    shutdown.store(true, Ordering::Relaxed);
    handle.join().unwrap();
}

#[test]
fn multiple_sequential_connections_each_get_reclaimed() {
    let registry = Arc::new(Registry::new());
    let zombies = Arc::new(ZombieList::new());
    let (port, _poller, handle, shutdown) = spawn_server(registry.clone(), zombies.clone());

    for i in 0..5u8 {
        let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let payload = [i; 4];
        client.write_all(&payload).unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(buf, payload);
    }

    let deadline = Instant::now() + Duration::from_secs(2);
    while registry.len() > 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(registry.len(), 0);

    shutdown.store(true, Ordering::Relaxed);
    handle.join().unwrap();
}
