//! Tests for the acceptor.

use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::mpsc;
use std::time::Duration;

use rstest::{fixture, rstest};

use super::{
    Acceptor, AcceptorExit, CountingManager, FailingSource, ListenerError, wait_for_count,
};
use crate::log_sink::{LogSink, Verbosity};
use crate::manager::ConnectionManager;

#[derive(Clone)]
struct CountingFixture {
    count: Arc<AtomicUsize>,
    manager: Arc<CountingManager>,
}

#[fixture]
fn counting_fixture() -> CountingFixture {
    let (count, manager) = CountingManager::new();
    CountingFixture { count, manager }
}

#[fixture]
fn quiet_log() -> LogSink {
    LogSink::stderr(Verbosity::ERROR)
}

#[rstest]
fn acceptor_dispatches_connections_to_intake(
    counting_fixture: CountingFixture,
    quiet_log: LogSink,
) {
    let acceptor = Acceptor::bind("127.0.0.1", 0).expect("bind acceptor");
    let addr = acceptor.local_addr();
    let CountingFixture { count, manager } = counting_fixture;
    let manager: Arc<dyn ConnectionManager> = manager;
    let handle = acceptor
        .start(manager, quiet_log, |_| {})
        .expect("start acceptor");

    let _first = TcpStream::connect(addr).expect("connect first client");
    let _second = TcpStream::connect(addr).expect("connect second client");

    assert!(wait_for_count(&count, 2), "expected two connections");
    handle.close();
    assert_eq!(handle.join().expect("join acceptor"), AcceptorExit::Closed);
}

#[rstest]
fn closing_refuses_later_connections(counting_fixture: CountingFixture, quiet_log: LogSink) {
    let acceptor = Acceptor::bind("127.0.0.1", 0).expect("bind acceptor");
    let addr = acceptor.local_addr();
    let handle = acceptor
        .start(counting_fixture.manager, quiet_log, |_| {})
        .expect("start acceptor");

    handle.close();
    handle.join().expect("join acceptor");

    assert!(TcpStream::connect_timeout(&addr, Duration::from_secs(1)).is_err());
}

#[rstest]
fn exit_is_reported_to_the_owner(counting_fixture: CountingFixture, quiet_log: LogSink) {
    let acceptor = Acceptor::bind("127.0.0.1", 0).expect("bind acceptor");
    let (sender, receiver) = mpsc::channel();
    let handle = acceptor
        .start(counting_fixture.manager, quiet_log, move |exit| {
            let _sent = sender.send(exit.clone());
        })
        .expect("start acceptor");

    handle.close();

    let reported = receiver
        .recv_timeout(Duration::from_secs(2))
        .expect("exit reported");
    assert_eq!(reported, AcceptorExit::Closed);
    assert!(handle.is_finished() || handle.join().is_ok());
}

#[rstest]
fn dropping_the_handle_stops_the_loop(counting_fixture: CountingFixture, quiet_log: LogSink) {
    let acceptor = Acceptor::bind("127.0.0.1", 0).expect("bind acceptor");
    let (sender, receiver) = mpsc::channel();
    let handle = acceptor
        .start(counting_fixture.manager, quiet_log, move |exit| {
            let _sent = sender.send(exit.clone());
        })
        .expect("start acceptor");

    drop(handle);

    assert_eq!(
        receiver.recv_timeout(Duration::from_secs(2)).ok(),
        Some(AcceptorExit::Closed)
    );
}

#[rstest]
fn accept_errors_end_the_loop(counting_fixture: CountingFixture, quiet_log: LogSink) {
    let acceptor = Acceptor::from_source(FailingSource::bind(io::ErrorKind::ConnectionAborted))
        .expect("wrap source");
    let (sender, receiver) = mpsc::channel();
    let handle = acceptor
        .start(counting_fixture.manager, quiet_log, move |exit| {
            let _sent = sender.send(exit.clone());
        })
        .expect("start acceptor");

    let reported = receiver
        .recv_timeout(Duration::from_secs(2))
        .expect("exit reported");
    let joined = handle.join().expect("join acceptor");

    assert!(matches!(
        reported,
        AcceptorExit::Failed {
            kind: io::ErrorKind::ConnectionAborted,
            ..
        }
    ));
    assert_eq!(joined, reported);
}

#[test]
fn binding_a_held_port_fails() {
    let holder = TcpListener::bind("127.0.0.1:0").expect("bind holder");
    let port = holder.local_addr().expect("holder addr").port();

    let error = Acceptor::bind("127.0.0.1", port).expect_err("port is held");

    assert!(matches!(error, ListenerError::Bind { .. }));
}

#[test]
fn unresolvable_hosts_are_rejected() {
    let error = Acceptor::bind("host.invalid.", 5042).expect_err("host should not resolve");

    assert!(matches!(
        error,
        ListenerError::Resolve { .. } | ListenerError::ResolveEmpty { .. }
    ));
}
