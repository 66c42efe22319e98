mod common;

use queuelink::core::attr::{QueueAttrType, QueueAttrValue, DEFAULT_DEPTH};
use queuelink::core::processor::{ControlCpuProcessor, QueueProcessor};
use queuelink::{codes, QueueAttr, QueueError, Settings};

#[test]
fn null_attr_creates_default_queue() {
    let sim = common::device_sim();
    let p = common::control_cpu(&sim);
    let qid = p.create_queue(None).unwrap();
    let attr = sim.queue_attr(qid).unwrap();
    assert_eq!(attr.depth(), DEFAULT_DEPTH);
    assert_eq!(attr.name(), "");
}

#[test]
fn attr_name_round_trips_with_terminator_size() {
    let mut attr = QueueAttr::new();
    attr.set_name("abc").unwrap();
    let value = attr.get(QueueAttrType::Name);
    assert_eq!(value, QueueAttrValue::Name("abc".to_string()));
    assert_eq!(value.ret_size(), 4);

    let sim = common::device_sim();
    let p = common::control_cpu(&sim);
    let qid = p.create_queue(Some(&attr)).unwrap();
    assert_eq!(sim.queue_attr(qid).unwrap().name(), "abc");
}

#[test]
fn configured_depth_applies_to_default_attr() {
    let sim = common::device_sim();
    let mut settings = Settings::default();
    settings.queue.default_depth = 3;
    let p = ControlCpuProcessor::new(sim.clone(), settings);
    let qid = p.create_queue(None).unwrap();
    assert_eq!(sim.queue_attr(qid).unwrap().depth(), 3);
}

#[test]
fn name_longer_than_configured_limit_is_rejected() {
    let sim = common::device_sim();
    let mut settings = Settings::default();
    settings.queue.max_name_len = 8;
    let p = ControlCpuProcessor::new(sim.clone(), settings);

    let mut attr = QueueAttr::new();
    attr.set_name("abcdefg").unwrap();
    assert!(p.create_queue(Some(&attr)).is_ok());

    attr.set_name("abcdefgh").unwrap();
    let err = p.create_queue(Some(&attr)).unwrap_err();
    assert!(matches!(err, QueueError::InvalidParam { param: "name", .. }));
}

#[test]
fn zero_depth_is_a_transport_failure() {
    let sim = common::device_sim();
    let p = common::control_cpu(&sim);
    let err = p.create_queue(Some(&QueueAttr::with_depth(0))).unwrap_err();
    assert!(matches!(err, QueueError::Transport { api: "queue_create", .. }));
}

#[test]
fn host_create_initialises_queue_subsystem_every_time() {
    let sim = common::host_sim();
    let p = common::host(&sim);
    let a = p.create_queue(None).unwrap();
    let b = p.create_queue(None).unwrap();
    assert_ne!(a, b);
    // the second init reports "repeated" and is ignored
    assert_eq!(sim.queue_init_count(), 2);
}

#[test]
fn destroy_removes_queue_and_lock_pair() {
    let sim = common::device_sim();
    let p = common::control_cpu(&sim);
    let qid = p.create_queue(None).unwrap();
    p.enqueue_data(qid, b"x", &[], 0).unwrap();
    assert!(p.core().locks().contains(qid));

    p.destroy_queue(qid).unwrap();
    assert!(!sim.queue_exists(qid));
    assert!(!p.core().locks().contains(qid));
}

#[test]
fn destroy_unknown_queue_reports_transport_code() {
    let sim = common::device_sim();
    let p = common::control_cpu(&sim);
    let err = p.destroy_queue(9_999).unwrap_err();
    assert_eq!(err.code(), queuelink::RtError::NOT_FOUND.code());
}

#[test]
fn host_rejects_local_buffer_path() {
    let sim = common::host_sim();
    let p = common::host(&sim);
    let qid = p.create_queue(None).unwrap();
    let buf = queuelink::BufHandle::from_raw(1);

    let err = p.enqueue(qid, buf, 0).unwrap_err();
    assert_eq!(err.code(), codes::FEATURE_UNSUPPORTED);
    assert_eq!(p.dequeue(qid, 0).unwrap_err().code(), codes::FEATURE_UNSUPPORTED);
    assert_eq!(
        p.alloc_buf(16, queuelink::BufType::Normal).unwrap_err().code(),
        codes::FEATURE_UNSUPPORTED
    );

    let mut out = [0u8; 4];
    let results = vec![
        p.free_buf(buf),
        p.get_buf_data(buf).map(drop),
        p.write_buf_data(buf, 0, b"x"),
        p.get_buf_data_len(buf).map(drop),
        p.set_buf_data_len(buf, 1),
        p.get_buf_user_data(buf, &mut out, 0),
        p.set_buf_user_data(buf, b"x", 0),
        p.copy_buf_ref(buf).map(drop),
        p.append_buf_chain(buf, buf),
        p.get_buf_chain_num(buf).map(drop),
        p.get_buf_from_chain(buf, 0).map(drop),
    ];
    for (i, res) in results.into_iter().enumerate() {
        assert_eq!(res.unwrap_err().code(), codes::FEATURE_UNSUPPORTED, "buffer op #{i}");
    }
    assert_eq!(sim.live_mbufs(), 0);
}

#[test]
fn host_moves_payloads_through_data_path() {
    let sim = common::host_sim();
    let p = common::host(&sim);
    let qid = p.create_queue(None).unwrap();
    p.enqueue_data(qid, b"from host", b"meta", 0).unwrap();

    let mut data = [0u8; 32];
    let mut user = [0u8; 4];
    let n = p.dequeue_data(qid, &mut data, &mut user, 0).unwrap();
    assert_eq!(&data[..n], b"from host");
    assert_eq!(&user, b"meta");
}
