use super::fixtures::{cluster7_rows, harness, peer_row, LOCAL_NODE};
use clusterer::persistence::{FlushTimer, NodeUpdate};
use clusterer::util::ClustererError;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn flush_after_load_writes_nothing() {
    let h = harness(cluster7_rows());
    h.sync.load().unwrap();
    let report = h.sync.flush().unwrap();
    assert_eq!(report.attempted, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(h.store.write_count(), 0);
}

#[test]
fn local_change_is_written_once() {
    let h = harness(cluster7_rows());
    h.sync.load().unwrap();
    {
        let view = h.registry.read();
        let mut local = view.lookup_cluster(7).unwrap().current_node().unwrap().lock();
        local.bump_ls_seq_no();
        local.set_top_seq_no(12);
        local.set_enabled(false);
        assert!(!local.flags().is_synced());
    }

    let report = h.sync.flush().unwrap();
    assert_eq!((report.attempted, report.written), (1, 1));
    assert_eq!(
        h.store.updates(),
        vec![(
            1,
            NodeUpdate {
                ls_seq_no: 1,
                top_seq_no: 12,
                state: 0
            }
        )]
    );
    let stored = h.store.row(1).unwrap();
    assert_eq!((stored.ls_seq_no, stored.top_seq_no), (1, 12));
    assert!(!stored.is_enabled());

    let report = h.sync.flush().unwrap();
    assert_eq!(report.attempted, 0);
    assert_eq!(h.store.write_count(), 1);
}

#[test]
fn peer_changes_are_never_flushed() {
    let h = harness(cluster7_rows());
    h.sync.load().unwrap();
    {
        let view = h.registry.read();
        view.lookup_node(7, 2).unwrap().lock().bump_ls_seq_no();
    }
    h.sync.flush().unwrap();
    assert_eq!(h.store.write_count(), 0);
}

#[test]
fn failing_cluster_does_not_block_the_others() {
    let mut rows = cluster7_rows();
    rows.push(peer_row(10, 8, LOCAL_NODE));
    rows.push(peer_row(11, 8, 3));
    let h = harness(rows);
    h.sync.load().unwrap();
    {
        let view = h.registry.read();
        for cluster in view.clusters() {
            cluster.current_node().unwrap().lock().bump_ls_seq_no();
        }
    }
    h.store.fail_updates_for(1);

    match h.sync.flush() {
        Err(ClustererError::FlushIncomplete { failed, attempted }) => {
            assert_eq!((failed, attempted), (1, 2));
        }
        other => panic!("unexpected flush result {other:?}"),
    }
    assert_eq!(h.store.updates().len(), 1);
    assert_eq!(h.store.updates()[0].0, 10);

    // Only the cluster that failed is retried.
    h.store.clear_failures();
    let report = h.sync.flush().unwrap();
    assert_eq!((report.attempted, report.skipped), (1, 1));
    assert_eq!(h.store.updates()[1].0, 1);
}

#[test]
fn flush_timer_writes_in_the_background() {
    let h = harness(cluster7_rows());
    h.sync.load().unwrap();
    let store = h.store.clone();
    let registry = h.registry.clone();
    let sync = Arc::new(h.sync);
    let timer = FlushTimer::spawn(sync, Duration::from_millis(5)).unwrap();
    {
        let view = registry.read();
        view.lookup_cluster(7).unwrap().current_node().unwrap().lock().bump_ls_seq_no();
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while store.write_count() == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    timer.stop();
    assert_eq!(store.write_count(), 1);
}
