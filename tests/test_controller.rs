mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use common::ScriptedTransport;
use conduit::config::ConnectorConfig;
use conduit::connector::{Helper, ServerHandler, Side};
use conduit::http::{Exchange, Method, Request, RequestBuilder, Response};

#[test]
fn test_controller_sheds_load_while_workers_are_saturated() {
    let gate = Arc::new(AtomicBool::new(false));
    let handled = Arc::new(AtomicUsize::new(0));

    let service = {
        let gate = Arc::clone(&gate);
        let handled = Arc::clone(&handled);
        move |_req: &Request| {
            while !gate.load(Ordering::Acquire) {
                std::thread::sleep(Duration::from_millis(2));
            }
            handled.fetch_add(1, Ordering::SeqCst);
            Response::ok("done")
        }
    };

    let config = ConnectorConfig {
        max_threads: 2,
        controller_sleep_time_ms: 50,
        ..ConnectorConfig::default()
    };
    let period = config.controller_sleep_time();
    let helper =
        Helper::<ScriptedTransport>::new(Side::Server, config, ServerHandler::new(service)).unwrap();

    for path in ["/1", "/2", "/3"] {
        let request = RequestBuilder::new().method(Method::GET).path(path).build().unwrap();
        helper.submit_inbound(Exchange::new(request));
    }
    helper.start().unwrap();

    // The flag follows saturation at the next tick
    assert!(common::wait_until(Duration::from_secs(2), || helper.is_worker_service_full()));
    assert!(common::wait_until(period * 2, || helper.controller().is_overloaded()));
    assert!(helper.is_worker_service_full());
    assert_eq!(helper.queued_inbound(), 1);

    // And clears at the first tick after a worker frees up
    gate.store(true, Ordering::Release);
    assert!(common::wait_until(Duration::from_secs(2), || !helper.is_worker_service_full()));
    assert!(common::wait_until(period * 2, || !helper.controller().is_overloaded()));

    assert!(common::wait_until(Duration::from_secs(5), || {
        handled.load(Ordering::SeqCst) == 3 && !helper.controller().is_overloaded()
    }));
    assert!(helper.workers().unwrap().snapshot().rejected > 0);

    helper.stop();
    assert!(!helper.is_started());
}

#[test]
fn test_idle_connections_leave_workers_free() {
    let config = ConnectorConfig {
        max_threads: 2,
        controller_sleep_time_ms: 10,
        ..ConnectorConfig::default()
    };
    let helper = Helper::<ScriptedTransport>::new(
        Side::Server,
        config,
        ServerHandler::new(|_req: &Request| Response::ok("")),
    )
    .unwrap();
    helper.start().unwrap();

    let transports: Vec<ScriptedTransport> = (0..20).map(|_| ScriptedTransport::new()).collect();
    for transport in &transports {
        helper.register(transport.clone());
    }

    // Twenty ticks with nothing to read
    std::thread::sleep(Duration::from_millis(200));

    let snapshot = helper.workers().unwrap().snapshot();
    assert_eq!(snapshot.rejected, 0);
    assert_eq!(snapshot.scheduled, 0);
    assert!(!helper.controller().is_overloaded());
    assert!(transports.iter().all(|t| t.reads.load(Ordering::SeqCst) == 0));

    // The first bytes from a peer get it read
    transports[3].push_input(b"GET /late HTTP/1.1\r\n\r\n");
    assert!(common::wait_until(Duration::from_secs(2), || transports[3]
        .output_text()
        .starts_with("HTTP/1.1 200 OK")));

    helper.stop();
}

#[test]
fn test_controller_closes_finished_connections() {
    let config = ConnectorConfig {
        controller_sleep_time_ms: 10,
        ..ConnectorConfig::default()
    };
    let helper = Helper::<ScriptedTransport>::new(
        Side::Server,
        config,
        ServerHandler::new(|_req: &Request| Response::ok("")),
    )
    .unwrap();
    helper.start().unwrap();

    let transport = ScriptedTransport::new();
    transport.eof.store(true, Ordering::SeqCst);
    helper.register(transport.clone());

    assert!(common::wait_until(Duration::from_secs(5), || helper.connection_count() == 0));
    assert!(transport.is_closed());

    helper.stop();
}
