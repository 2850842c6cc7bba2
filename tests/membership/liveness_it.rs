use super::fixtures::{cluster7_rows, harness, CountingLink};
use clusterer::membership::{Liveness, PeerLink};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Barrier};
use std::thread;

fn install_link(h: &super::fixtures::Harness) -> Arc<CountingLink> {
    let link = Arc::new(CountingLink::default());
    let view = h.registry.read();
    let peer = view.lookup_node(7, 2).unwrap();
    peer.link().install(link.clone() as Arc<dyn PeerLink>);
    link
}

#[test]
fn released_link_is_reaped_by_next_reader() {
    let h = harness(cluster7_rows());
    h.sync.load().unwrap();
    let link = install_link(&h);

    let view = h.registry.read();
    let slot = view.lookup_node(7, 2).unwrap().link();
    assert_eq!(slot.with(|link| link.send(b"ping").unwrap()), Some(4));
    assert_eq!(slot.release(), Liveness::Draining);
    assert_eq!(link.closed.load(Ordering::SeqCst), 0);

    assert!(slot.with(|link| link.send(b"ping")).is_none());
    assert_eq!(slot.phase(), Liveness::Destroyed);
    assert_eq!(link.closed.load(Ordering::SeqCst), 1);
    assert_eq!(link.sent.load(Ordering::SeqCst), 1);
}

#[test]
fn concurrent_readers_destroy_a_drained_link_once() {
    let h = harness(cluster7_rows());
    h.sync.load().unwrap();
    let link = install_link(&h);
    {
        let view = h.registry.read();
        view.lookup_node(7, 2).unwrap().link().release();
    }

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let registry = h.registry.clone();
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let barrier = barrier.clone();
            let registry = registry.clone();
            thread::spawn(move || {
                barrier.wait();
                let view = registry.read();
                let slot = view.lookup_node(7, 2).unwrap().link();
                let sent = slot.with(|link| link.send(b"x").ok()).flatten();
                sent
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), None);
    }
    assert_eq!(link.closed.load(Ordering::SeqCst), 1);
    assert_eq!(link.sent.load(Ordering::SeqCst), 0);
}

#[test]
fn retained_link_survives_reap_attempts() {
    let h = harness(cluster7_rows());
    h.sync.load().unwrap();
    let link = install_link(&h);
    let view = h.registry.read();
    let slot = view.lookup_node(7, 2).unwrap().link();
    assert!(slot.retain());
    assert_eq!(slot.release(), Liveness::Live);
    assert!(!slot.reap());
    assert_eq!(slot.holders(), 1);
    assert_eq!(link.closed.load(Ordering::SeqCst), 0);
}

#[test]
fn teardown_closes_every_link() {
    let h = harness(cluster7_rows());
    h.sync.load().unwrap();
    let link = install_link(&h);
    h.registry.teardown().unwrap();
    assert_eq!(link.closed.load(Ordering::SeqCst), 1);
}

#[test]
fn reload_closes_links_of_the_replaced_registry() {
    let h = harness(cluster7_rows());
    h.sync.load().unwrap();
    let link = install_link(&h);
    h.sync.load().unwrap();
    assert_eq!(link.closed.load(Ordering::SeqCst), 1);
    let view = h.registry.read();
    assert_eq!(view.lookup_node(7, 2).unwrap().link().phase(), Liveness::Destroyed);
}
