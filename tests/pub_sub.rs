use pattern_socket::{
    Bindable, Connectable, Context, Handle, Mode, Progress, Publish, Readable, Readiness, SocketOptions, Subscribe,
    Writable,
};
use std::thread;
use std::time::{Duration, Instant};

fn wait_for_peers<B: Bindable>(bound: &mut B, expected: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while bound.peer_count().unwrap() < expected {
        assert!(Instant::now() < deadline, "peers did not attach in time");
        thread::sleep(Duration::from_millis(10));
    }
}

fn subscriber(ctx: &Context, port: u16) -> pattern_socket::Socket<Subscribe> {
    let mut sub = ctx.socket::<Subscribe>().unwrap();
    sub.connect("127.0.0.1", port).unwrap();
    sub
}

#[test]
fn every_subscriber_receives_each_message() {
    let ctx = Context::new();
    let mut publisher = ctx.bind::<Publish>(0).unwrap();
    let port = publisher.local_port().unwrap();

    let mut first = subscriber(&ctx, port);
    let mut second = subscriber(&ctx, port);
    wait_for_peers(&mut publisher, 2);

    assert_eq!(publisher.write(b"msg\n").unwrap(), 4);
    assert_eq!(first.readline(b"\n").unwrap(), Some(b"msg".to_vec()));
    assert_eq!(second.readline(b"\n").unwrap(), Some(b"msg".to_vec()));
}

#[test]
fn publishing_without_subscribers_succeeds() {
    let ctx = Context::new();
    let mut publisher = ctx.bind::<Publish>(0).unwrap();
    assert_eq!(publisher.peer_count().unwrap(), 0);
    assert_eq!(publisher.write(b"nobody listens").unwrap(), 14);
    assert_eq!(publisher.wait_ready(0, 0).unwrap(), Readiness::Ready);
    assert_eq!(publisher.wait_ready(u64::MAX, 999_999).unwrap(), Readiness::Ready);
}

#[test]
fn slow_subscriber_does_not_stall_the_publisher() {
    let ctx = Context::with_options(SocketOptions::default().with_fanout_high_water(4096));
    let mut publisher = ctx.bind::<Publish>(0).unwrap();
    let port = publisher.local_port().unwrap();

    let _stalled = subscriber(&ctx, port);
    let mut live = subscriber(&ctx, port);
    wait_for_peers(&mut publisher, 2);

    let chunk = [7u8; 1024];
    let start = Instant::now();
    for _ in 0..20_000 {
        assert_eq!(publisher.write(&chunk).unwrap(), chunk.len());
    }
    assert!(start.elapsed() < Duration::from_secs(10));

    // The reading subscriber still gets a prefix of the stream.
    live.set_blocking_mode(Mode::NonBlocking).unwrap();
    let mut buf = [0u8; 1024];
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match live.try_read(&mut buf).unwrap() {
            Progress::Ready(n) => {
                assert!(n > 0);
                assert!(buf[..n].iter().all(|&b| b == 7));
                break;
            }
            Progress::WouldBlock => {
                assert!(Instant::now() < deadline);
                live.wait_ready(0, 100_000).unwrap();
            }
        }
    }
}

#[test]
fn subscriber_sees_publisher_going_away() {
    let ctx = Context::new();
    let mut publisher = ctx.bind::<Publish>(0).unwrap();
    let port = publisher.local_port().unwrap();
    let mut sub = subscriber(&ctx, port);
    wait_for_peers(&mut publisher, 1);

    publisher.write(b"last\n").unwrap();
    publisher.destroy().unwrap();
    assert_eq!(sub.readline(b"\n").unwrap(), Some(b"last".to_vec()));
    assert_eq!(sub.readline(b"\n").unwrap(), None);
}

#[test]
fn departed_subscribers_are_dropped() {
    let ctx = Context::new();
    let mut publisher = ctx.bind::<Publish>(0).unwrap();
    let port = publisher.local_port().unwrap();
    let sub = subscriber(&ctx, port);
    wait_for_peers(&mut publisher, 1);
    sub.destroy().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        publisher.write(b"anyone?\n").unwrap();
        if publisher.peer_count().unwrap() == 0 {
            break;
        }
        assert!(Instant::now() < deadline, "closed subscriber was never dropped");
        thread::sleep(Duration::from_millis(10));
    }
}
