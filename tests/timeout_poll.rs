mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use queuelink::core::processor::QueueProcessor;
use queuelink::{BufType, QueueAttr, QueueError};

#[test]
fn second_enqueue_on_depth_one_queue_is_full_immediately() {
    let sim = common::device_sim();
    let p = common::control_cpu(&sim);
    let qid = p.create_queue(Some(&QueueAttr::with_depth(1))).unwrap();
    let a = p.alloc_buf(8, BufType::Normal).unwrap();
    let b = p.alloc_buf(8, BufType::Normal).unwrap();

    p.enqueue(qid, a, 0).unwrap();
    let start = Instant::now();
    let err = p.enqueue(qid, b, 0).unwrap_err();
    assert_eq!(err, QueueError::QueueFull { qid });
    assert!(err.is_retryable());
    assert!(start.elapsed() < Duration::from_millis(50));
    assert_eq!(sim.queue_len(qid), Some(1));
}

#[test]
fn enqueue_times_out_no_earlier_than_requested() {
    let sim = common::device_sim();
    let p = common::control_cpu(&sim);
    let qid = p.create_queue(Some(&QueueAttr::with_depth(1))).unwrap();
    let buf = p.alloc_buf(8, BufType::Normal).unwrap();
    p.enqueue(qid, buf, 0).unwrap();

    let start = Instant::now();
    let err = p.enqueue(qid, buf, 30).unwrap_err();
    let elapsed = start.elapsed();
    assert_eq!(err, QueueError::QueueFull { qid });
    assert!(elapsed >= Duration::from_millis(30), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(500), "returned after {elapsed:?}");
}

#[test]
fn dequeue_times_out_on_empty_queue() {
    let sim = common::device_sim();
    let p = common::control_cpu(&sim);
    let qid = p.create_queue(None).unwrap();

    let start = Instant::now();
    let err = p.dequeue(qid, 20).unwrap_err();
    assert_eq!(err, QueueError::QueueEmpty { qid });
    assert!(start.elapsed() >= Duration::from_millis(20));
}

#[test]
fn negative_timeout_waits_until_data_arrives() {
    let sim = common::device_sim();
    let p = Arc::new(common::control_cpu(&sim));
    let qid = p.create_queue(None).unwrap();
    let buf = p.alloc_buf(8, BufType::Normal).unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let consumer = {
        let p = Arc::clone(&p);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let got = p.dequeue(qid, -1).unwrap();
            done.store(true, Ordering::SeqCst);
            got
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!done.load(Ordering::SeqCst));
    p.enqueue(qid, buf, 0).unwrap();
    assert_eq!(consumer.join().unwrap(), buf);
}

#[test]
fn non_retryable_failures_return_at_once() {
    let sim = common::device_sim();
    let p = common::control_cpu(&sim);
    let buf = p.alloc_buf(8, BufType::Normal).unwrap();

    let start = Instant::now();
    let err = p.enqueue(4_242, buf, -1).unwrap_err();
    assert!(matches!(err, QueueError::Transport { api: "queue_enqueue", .. }));
    assert!(start.elapsed() < Duration::from_millis(100));
    assert!(matches!(
        p.enqueue(4_242, queuelink::BufHandle::NULL, 0),
        Err(QueueError::InvalidParam { param: "buf", .. })
    ));
}

#[test]
fn data_path_reports_full_and_empty() {
    let sim = common::device_sim();
    let p = common::control_cpu(&sim);
    let qid = p.create_queue(Some(&QueueAttr::with_depth(1))).unwrap();

    let mut out = [0u8; 8];
    let err = p.dequeue_data(qid, &mut out, &mut [], 0).unwrap_err();
    assert_eq!(err, QueueError::QueueEmpty { qid });

    p.enqueue_data(qid, b"one", &[], 0).unwrap();
    let err = p.enqueue_data(qid, b"two", &[], 10).unwrap_err();
    assert_eq!(err, QueueError::QueueFull { qid });
}
