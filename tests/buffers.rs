mod common;

use queuelink::core::processor::QueueProcessor;
use queuelink::transport::GroupRights;
use queuelink::{codes, BufHandle, BufType, QueueError};

#[test]
fn control_cpu_creates_its_own_group_on_first_alloc() {
    let sim = common::device_sim();
    let p = common::control_cpu(&sim);
    assert!(sim.group_names().is_empty());

    let buf = p.alloc_buf(64, BufType::Normal).unwrap();
    let pid = std::process::id();
    assert_eq!(sim.group_names(), vec![format!("queuelink_{pid}")]);
    assert!(sim.mbuf_init_count() <= 1);

    // the group is cached after the first lookup
    p.alloc_buf(64, BufType::Dvpp).unwrap();
    assert_eq!(sim.group_names().len(), 1);
    p.free_buf(buf).unwrap();
}

#[test]
fn control_cpu_reuses_an_existing_alloc_group() {
    let sim = common::device_sim();
    let pid = std::process::id() as i32;
    sim.seed_group("preexisting", pid, GroupRights::FULL);
    let p = common::control_cpu(&sim);
    p.alloc_buf(16, BufType::Normal).unwrap();
    assert_eq!(sim.group_names(), vec!["preexisting".to_string()]);
}

#[test]
fn share_group_requires_a_group_with_alloc_rights() {
    let sim = common::device_sim();
    let pid = std::process::id() as i32;
    sim.seed_group(
        "readonly",
        pid,
        GroupRights {
            read: true,
            ..GroupRights::default()
        },
    );
    let p = common::share_group(&sim);
    let err = p.alloc_buf(16, BufType::Normal).unwrap_err();
    assert!(matches!(err, QueueError::Failure(_)));
    assert_eq!(err.code(), codes::FAILURE);

    sim.seed_group("writable", pid, GroupRights::FULL);
    assert!(p.alloc_buf(16, BufType::Normal).is_ok());
    assert_eq!(sim.group_names().len(), 2);
}

#[test]
fn data_and_lengths_pass_through() {
    let sim = common::device_sim();
    let p = common::control_cpu(&sim);
    let buf = p.alloc_buf(16, BufType::Normal).unwrap();

    p.write_buf_data(buf, 0, b"hello").unwrap();
    p.set_buf_data_len(buf, 5).unwrap();
    assert_eq!(p.get_buf_data_len(buf).unwrap(), 5);
    let data = p.get_buf_data(buf).unwrap();
    assert_eq!(data.len(), 16);
    assert_eq!(&data[..5], b"hello");

    assert!(p.set_buf_data_len(buf, 17).is_err());
    assert!(p.write_buf_data(buf, 14, b"xyz").is_err());
}

#[test]
fn user_data_is_addressed_by_offset() {
    let sim = common::device_sim();
    let p = common::control_cpu(&sim);
    let buf = p.alloc_buf(8, BufType::Normal).unwrap();

    p.set_buf_user_data(buf, b"trace", 10).unwrap();
    let mut out = [0u8; 5];
    p.get_buf_user_data(buf, &mut out, 10).unwrap();
    assert_eq!(&out, b"trace");
    let err = p.set_buf_user_data(buf, &[0u8; 8], 92).unwrap_err();
    assert_eq!(err.code(), queuelink::RtError::PARAM_INVALID.code());
}

#[test]
fn copied_reference_shares_the_payload() {
    let sim = common::device_sim();
    let p = common::control_cpu(&sim);
    let buf = p.alloc_buf(4, BufType::Normal).unwrap();
    let alias = p.copy_buf_ref(buf).unwrap();
    assert_ne!(alias, buf);

    p.write_buf_data(buf, 0, b"abcd").unwrap();
    assert_eq!(&p.get_buf_data(alias).unwrap()[..], b"abcd");
    p.free_buf(buf).unwrap();
    assert_eq!(&p.get_buf_data(alias).unwrap()[..], b"abcd");
}

#[test]
fn chains_report_length_and_members() {
    let sim = common::device_sim();
    let p = common::control_cpu(&sim);
    let head = p.alloc_buf(4, BufType::Normal).unwrap();
    let second = p.alloc_buf(4, BufType::Normal).unwrap();
    let third = p.alloc_buf(4, BufType::Normal).unwrap();

    assert_eq!(p.get_buf_chain_num(head).unwrap(), 1);
    p.append_buf_chain(head, second).unwrap();
    p.append_buf_chain(head, third).unwrap();
    assert_eq!(p.get_buf_chain_num(head).unwrap(), 3);
    assert_eq!(p.get_buf_from_chain(head, 0).unwrap(), head);
    assert_eq!(p.get_buf_from_chain(head, 2).unwrap(), third);
    assert!(p.get_buf_from_chain(head, 3).is_err());

    let live = sim.live_mbufs();
    p.free_buf(head).unwrap();
    assert_eq!(sim.live_mbufs(), live - 3);
}

#[test]
fn null_handles_are_rejected_before_the_transport() {
    let sim = common::device_sim();
    let p = common::control_cpu(&sim);
    let null = BufHandle::NULL;
    let buf = p.alloc_buf(4, BufType::Normal).unwrap();

    let checks: Vec<queuelink::Result<()>> = vec![
        p.free_buf(null),
        p.get_buf_data(null).map(drop),
        p.get_buf_data_len(null).map(drop),
        p.set_buf_data_len(null, 1),
        p.copy_buf_ref(null).map(drop),
        p.append_buf_chain(null, buf),
        p.append_buf_chain(buf, null),
        p.get_buf_chain_num(null).map(drop),
        p.get_buf_from_chain(null, 0).map(drop),
        p.get_buf_user_data(null, &mut [0u8; 1], 0),
        p.set_buf_user_data(null, b"x", 0),
    ];
    for result in checks {
        assert_eq!(result.unwrap_err().code(), codes::INVALID_PARAM);
    }
}

#[test]
fn freed_buffers_report_invalid_handle() {
    let sim = common::device_sim();
    let p = common::control_cpu(&sim);
    let buf = p.alloc_buf(4, BufType::Normal).unwrap();
    p.free_buf(buf).unwrap();
    let err = p.free_buf(buf).unwrap_err();
    assert_eq!(err.code(), queuelink::RtError::INVALID_HANDLE.code());
}
