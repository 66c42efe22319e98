mod common;

use queuelink::core::processor::QueueProcessor;
use queuelink::core::route::status;
use queuelink::{
    codes, Permission, QueueError, Route, RouteList, RouteQueryInfo, RouteQueryMode, RtError,
    Transport,
};

fn make_queues(p: &dyn QueueProcessor, n: usize) -> Vec<u32> {
    (0..n).map(|_| p.create_queue(None).unwrap()).collect()
}

fn query(p: &dyn QueueProcessor, info: RouteQueryInfo) -> RouteList {
    let mut out = RouteList::new();
    p.query_routes(&info, &mut out).unwrap();
    out
}

#[test]
fn empty_bind_is_a_no_op() {
    let sim = common::device_sim();
    let p = common::control_cpu(&sim);
    let mut routes = RouteList::new();
    p.bind_routes(&mut routes).unwrap();
    p.unbind_routes(&mut routes).unwrap();
    assert_eq!(sim.submit_count(), 0);
}

#[test]
fn bind_query_unbind_round_trip_on_device() {
    let sim = common::device_sim();
    let p = common::control_cpu(&sim);
    let q = make_queues(&p, 4);

    let mut routes: RouteList = vec![
        Route::new(q[0], q[1]),
        Route::new(q[0], q[2]),
        Route::new(q[3], q[1]),
    ]
    .into_iter()
    .collect();
    p.bind_routes(&mut routes).unwrap();
    assert!(routes.iter().all(|r| r.status() == status::UNBOUND));
    assert_eq!(sim.bound_routes().len(), 3);

    let by_src = query(&p, RouteQueryInfo::by_src(q[0]));
    assert_eq!(by_src.len(), 2);
    assert!(by_src.iter().all(|r| r.src() == q[0] && r.status() == status::BOUND));

    let by_dst = query(&p, RouteQueryInfo::by_dst(q[1]));
    let mut srcs: Vec<u32> = by_dst.iter().map(|r| r.src()).collect();
    srcs.sort_unstable();
    assert_eq!(srcs, vec![q[0], q[3]]);

    let exact = query(&p, RouteQueryInfo::by_src_and_dst(q[3], q[1]));
    assert_eq!(exact.len(), 1);
    assert_eq!(exact.get(0).unwrap().dst(), q[1]);

    p.unbind_routes(&mut routes).unwrap();
    assert!(sim.bound_routes().is_empty());
    assert!(query(&p, RouteQueryInfo::by_src(q[0])).is_empty());

    // every mailbox buffer went back to the pool
    assert_eq!(sim.live_mbufs(), 0);
}

#[test]
fn bind_is_idempotent() {
    let sim = common::device_sim();
    let p = common::control_cpu(&sim);
    let q = make_queues(&p, 2);
    let mut routes: RouteList = [Route::new(q[0], q[1])].into_iter().collect();
    p.bind_routes(&mut routes).unwrap();
    p.bind_routes(&mut routes).unwrap();
    assert_eq!(query(&p, RouteQueryInfo::by_src(q[0])).len(), 1);
}

#[test]
fn host_round_trip_releases_device_memory() {
    let sim = common::host_sim();
    let p = common::host(&sim);
    let q = make_queues(&p, 3);

    let mut routes: RouteList = [Route::new(q[0], q[1]), Route::new(q[0], q[2])]
        .into_iter()
        .collect();
    p.bind_routes(&mut routes).unwrap();
    assert_eq!(query(&p, RouteQueryInfo::by_src(q[0])).len(), 2);
    p.unbind_routes(&mut routes).unwrap();
    assert!(query(&p, RouteQueryInfo::by_src(q[0])).is_empty());
    assert_eq!(sim.live_dev_allocs(), 0);
}

#[test]
fn host_failures_still_release_device_memory() {
    let sim = common::host_sim();
    let p = common::host(&sim);
    let q = make_queues(&p, 2);
    let mut routes: RouteList = [Route::new(q[0], q[1])].into_iter().collect();

    sim.fail_next_submit(RtError::INTERNAL);
    let err = p.bind_routes(&mut routes).unwrap_err();
    assert_eq!(err.code(), RtError::INTERNAL.code());
    assert_eq!(sim.live_dev_allocs(), 0);

    sim.fail_next_reply(17);
    let err = p.bind_routes(&mut routes).unwrap_err();
    assert!(matches!(err, QueueError::Broker { code: 17, .. }));
    assert_eq!(err.code(), codes::FAILURE);
    assert_eq!(sim.live_dev_allocs(), 0);
    assert!(sim.bound_routes().is_empty());
}

#[test]
fn host_without_control_cpu_cannot_bind() {
    let sim = common::host_sim();
    let p = common::host(&sim);
    let q = make_queues(&p, 2);
    sim.set_control_cpu_pid(None);
    let mut routes: RouteList = [Route::new(q[0], q[1])].into_iter().collect();
    let err = p.bind_routes(&mut routes).unwrap_err();
    assert_eq!(err.code(), RtError::NOT_FOUND.code());
}

#[test]
fn rejected_route_fails_the_whole_request() {
    let sim = common::device_sim();
    let p = common::control_cpu(&sim);
    let q = make_queues(&p, 2);
    let mut routes: RouteList = [Route::new(q[0], q[1]), Route::new(q[0], q[0])]
        .into_iter()
        .collect();
    let err = p.bind_routes(&mut routes).unwrap_err();
    assert!(matches!(err, QueueError::Broker { op: "bind", .. }));
    assert_eq!(sim.live_mbufs(), 0);
}

#[test]
fn legacy_broker_mailbox_is_freed_locally() {
    let sim = common::device_sim_with_broker(1);
    let p = common::control_cpu(&sim);
    let q = make_queues(&p, 2);
    let mut routes: RouteList = [Route::new(q[0], q[1])].into_iter().collect();

    p.bind_routes(&mut routes).unwrap();
    assert!(!p.core().control().enhanced());
    assert_eq!(sim.live_mbufs(), 0);

    sim.fail_next_submit(RtError::INTERNAL);
    assert!(p.unbind_routes(&mut routes).is_err());
    assert_eq!(sim.live_mbufs(), 0);
}

#[test]
fn enhanced_broker_hands_buffer_back() {
    let sim = common::device_sim();
    let p = common::control_cpu(&sim);
    let q = make_queues(&p, 2);
    let mut routes: RouteList = [Route::new(q[0], q[1])].into_iter().collect();
    p.bind_routes(&mut routes).unwrap();
    assert!(p.core().control().enhanced());

    sim.fail_next_reply(23);
    let err = p.unbind_routes(&mut routes).unwrap_err();
    assert!(matches!(err, QueueError::Broker { code: 23, .. }));
    assert_eq!(sim.live_mbufs(), 0);
    assert_eq!(sim.bound_routes().len(), 1);
}

#[test]
fn connect_happens_once_per_processor() {
    let sim = common::device_sim();
    let p = common::control_cpu(&sim);
    let q = make_queues(&p, 2);
    let mut routes: RouteList = [Route::new(q[0], q[1])].into_iter().collect();

    p.bind_routes(&mut routes).unwrap();
    let contact = p.core().control().contact();
    assert!(contact.is_some());
    // connect + bind, then only bind
    assert_eq!(sim.submit_count(), 2);
    p.bind_routes(&mut routes).unwrap();
    assert_eq!(sim.submit_count(), 3);
    assert_eq!(p.core().control().contact(), contact);
}

#[test]
fn failed_connect_is_retried_next_time() {
    let sim = common::device_sim();
    let p = common::control_cpu(&sim);
    let q = make_queues(&p, 2);
    let mut routes: RouteList = [Route::new(q[0], q[1])].into_iter().collect();

    sim.fail_next_reply(5);
    let err = p.bind_routes(&mut routes).unwrap_err();
    assert!(matches!(err, QueueError::Broker { op: "connect", .. }));
    assert!(p.core().control().contact().is_none());

    p.bind_routes(&mut routes).unwrap();
    assert_eq!(sim.bound_routes().len(), 1);
}

#[test]
fn abnormal_query_reports_routes_with_missing_endpoints() {
    let sim = common::device_sim();
    let p = common::control_cpu(&sim);
    assert!(query(&p, RouteQueryInfo::abnormal()).is_empty());

    let q = make_queues(&p, 3);
    let mut routes: RouteList = [Route::new(q[0], q[1]), Route::new(q[0], q[2])]
        .into_iter()
        .collect();
    p.bind_routes(&mut routes).unwrap();

    // remove an endpoint behind the processor's back
    sim.queue_destroy(0, q[2]).unwrap();

    let abnormal = query(&p, RouteQueryInfo::abnormal());
    assert_eq!(abnormal.len(), 1);
    let route = abnormal.get(0).unwrap();
    assert_eq!((route.src(), route.dst()), (q[0], q[2]));
    assert_eq!(route.status(), status::BOUND_ABNORMAL);
}

#[test]
fn two_phase_query_caps_at_requested_count() {
    let sim = common::device_sim();
    let p = common::control_cpu(&sim);
    let q = make_queues(&p, 4);
    let mut routes: RouteList = q[1..].iter().map(|&dst| Route::new(q[0], dst)).collect();
    p.bind_routes(&mut routes).unwrap();

    let info = RouteQueryInfo::by_src(q[0]);
    assert_eq!(p.query_route_count(&info).unwrap(), 3);
    let mut out = RouteList::new();
    p.fetch_routes(&info, 2, &mut out).unwrap();
    assert_eq!(out.len(), 2);
    p.fetch_routes(&info, 0, &mut out).unwrap();
    assert_eq!(out.len(), 2);
}

#[test]
fn malformed_query_is_rejected_before_submission() {
    let sim = common::device_sim();
    let p = common::control_cpu(&sim);
    let info = RouteQueryInfo::new().mode(RouteQueryMode::BySrcAndDst).src(1);
    let mut out = RouteList::new();
    let err = p.query_routes(&info, &mut out).unwrap_err();
    assert_eq!(err.code(), codes::INVALID_PARAM);
    assert_eq!(sim.submit_count(), 0);
}

#[test]
fn share_group_bind_grants_endpoints_to_broker() {
    let sim = common::device_sim();
    let p = common::share_group(&sim);
    let q = make_queues(&p, 2);
    let mut routes: RouteList = [Route::new(q[0], q[1])].into_iter().collect();
    p.bind_routes(&mut routes).unwrap();

    assert!(sim.granted(q[0], 4_002).contains(Permission::READ_WRITE));
    assert!(sim.granted(q[1], 4_002).contains(Permission::READ_WRITE));
    assert!(!sim.granted(q[0], 4_002).contains(Permission::MANAGE));
    assert_eq!(query(&p, RouteQueryInfo::by_dst(q[1])).len(), 1);
}
