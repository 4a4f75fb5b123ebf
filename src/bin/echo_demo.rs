//! Demo binary: wires the reference `mio` poller and the toy echo
//! protocol to the DCB core and serves plain TCP echo connections. Not
//! part of the DCB core's specification (SPEC_FULL.md §10.5) — exists so
//! the crate is independently runnable and so the integration tests have
//! something to drive end to end.

use std::collections::HashMap;
use std::net::TcpListener;
use std::os::fd::IntoRawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use mio::{Events, Poll};
use tracing::{info, warn};

use dcb_core::dcb::Dcb;
use dcb_core::config::ProxyConfig;
use dcb_core::poller::mio_poller::MioPoller;
use dcb_core::poller::Poller;
use dcb_core::registry::Registry;
use dcb_core::zombie::{close_dcb, ZombieList};
use dcb_core::protocol::echo::EchoProtocol;
use dcb_core::protocol::Protocol;

#[derive(Parser, Debug)]
#[command(name = "dcb-echo-demo")]
#[command(about = "Echo-protocol demo server built on the DCB core")]
struct Cli {
    /// Listen host, overrides the config file.
    #[arg(long)]
    host: Option<String>,

    /// Listen port, overrides the config file.
    #[arg(long)]
    port: Option<u16>,

    /// Worker thread count, overrides the config file.
    #[arg(long)]
    workers: Option<usize>,

    /// Optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind the listener, print the resolved configuration, and exit
    /// without serving.
    #[arg(long)]
    check: bool,
}

enum Job {
    Readable(Arc<Dcb>),
    Writable(Arc<Dcb>),
}

struct Shared {
    registry: Registry,
    zombies: ZombieList,
    poller: Arc<dyn Poller>,
    conns: Mutex<HashMap<i32, Arc<Dcb>>>,
}

fn main() {
    let cli = Cli::parse();

    let mut config = ProxyConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        eprintln!("config error: {e}");
        std::process::exit(1);
    });
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(workers) = cli.workers {
        config.workers = workers.max(1);
    }

    dcb_core::logging::init(&config.log_level);

    let std_listener = TcpListener::bind((config.host.as_str(), config.port)).unwrap_or_else(|e| {
        eprintln!("bind failed: {e}");
        std::process::exit(1);
    });
    std_listener.set_nonblocking(true).expect("set_nonblocking on listener");
    let local_addr = std_listener.local_addr().unwrap();

    if cli.check {
        let report = serde_json::json!({
            "config": config,
            "listening_on": local_addr.to_string(),
        });
        println!("{}", serde_json::to_string_pretty(&report).expect("serialize --check report"));
        return;
    }

    info!(?config, "starting echo demo");

    let mut poll = Poll::new().expect("mio::Poll::new");
    let poller: Arc<dyn Poller> = Arc::new(MioPoller::new(&poll, config.workers).expect("construct mio poller"));
    let protocol: Arc<dyn Protocol> = Arc::new(EchoProtocol::new());
    let registry = Registry::with_max_segment(config.max_segment);

    let listener_fd = std_listener.into_raw_fd();
    let listener_dcb = registry
        .adopt_listener(listener_fd, protocol, poller.as_ref())
        .expect("adopt listener fd as a dcb");

    let shared = Arc::new(Shared {
        registry,
        zombies: ZombieList::new(),
        poller: poller.clone(),
        conns: Mutex::new(HashMap::new()),
    });

    let (tx, rx) = bounded::<Job>(1024);
    let shutdown = Arc::new(AtomicBool::new(false));

    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&shutdown))
        .expect("failed to register SIGTERM handler");
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown))
        .expect("failed to register SIGINT handler");

    let handles: Vec<_> = (0..config.workers)
        .map(|worker_id| {
            let rx: Receiver<Job> = rx.clone();
            let shared = shared.clone();
            std::thread::Builder::new()
                .name(format!("dcb-worker-{worker_id}"))
                .spawn(move || worker_loop(worker_id, rx, shared))
                .expect("spawn dcb worker thread")
        })
        .collect();
    drop(rx);

    let mut events = Events::with_capacity(256);
    while !shutdown.load(Ordering::Relaxed) {
        match poll.poll(&mut events, Some(Duration::from_millis(200))) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(error = %e, "mio poll failed");
                break;
            }
        }
        for event in events.iter() {
            let fd = event.token().0 as i32;
            if fd == listener_fd {
                while let Some(new_dcb) = shared.registry.accept(&listener_dcb, shared.poller.as_ref()) {
                    shared.conns.lock().unwrap().insert(new_dcb.fd(), new_dcb);
                }
                continue;
            }
            let dcb = shared.conns.lock().unwrap().get(&fd).cloned();
            let Some(dcb) = dcb else { continue };
            if event.is_readable() {
                let _ = tx.send(Job::Readable(dcb.clone()));
            }
            if event.is_writable() {
                let _ = tx.send(Job::Writable(dcb));
            }
        }
    }

    info!("shutdown requested, draining worker queue");
    let snapshots = shared.registry.for_each_snapshot();
    let snapshot_json = serde_json::to_string(&snapshots).unwrap_or_else(|_| "[]".to_string());
    info!(snapshots = %snapshot_json, "registry state at shutdown");
    drop(tx);
    for handle in handles {
        let _ = handle.join();
    }
}

/// Once per poll cycle, regardless of whether a job arrived, every worker
/// must clear its bit on whatever DCBs are waiting for it in the zombie
/// list — gating `process_zombies` on dequeuing a `Job` would leave a
/// worker's bit set indefinitely whenever it has no readable/writable work
/// of its own pending.
fn worker_loop(worker_id: usize, rx: Receiver<Job>, shared: Arc<Shared>) {
    loop {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(Job::Readable(dcb)) => {
                if let Err(e) = dcb.protocol().read(&dcb) {
                    warn!(fd = dcb.fd(), error = %e, "read failed, closing dcb");
                    shared.conns.lock().unwrap().remove(&dcb.fd());
                    close_dcb(&dcb, shared.poller.as_ref(), &shared.zombies);
                }
            }
            Ok(Job::Writable(dcb)) => {
                if let Err(e) = dcb.drain_writeq() {
                    warn!(fd = dcb.fd(), error = %e, "drain_writeq failed, closing dcb");
                    shared.conns.lock().unwrap().remove(&dcb.fd());
                    close_dcb(&dcb, shared.poller.as_ref(), &shared.zombies);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                shared.zombies.process_zombies(worker_id, &shared.registry);
                break;
            }
        }
        shared.zombies.process_zombies(worker_id, &shared.registry);
    }
}
