use clap::Parser;
use pattern_socket::{
    parse_port, Bindable, Connectable, Context, Handle, Interest, Listenable, Mode, Progress, Publish, Readable, Readiness,
    Reply, Request, SocketError, Subscribe, Writable,
};
use std::time::{Duration, Instant};
use tracing_subscriber::filter::EnvFilter;

fn run_client_mode(args: Args) -> Result<(), SocketError> {
    let port = parse_port(&args.port)?;
    let ctx = Context::new();
    let mut req = ctx.socket::<Request>()?;
    req.connect(&args.addr, port)?;
    if args.nonblocking {
        req.set_blocking_mode(Mode::NonBlocking)?;
    }
    println!("Connected successfully to {}:{port} ({} mode)", args.addr, req.mode());

    let mut buf = vec![0u8; args.size];
    buf.fill(42);

    loop {
        let n = match req.try_write(&buf)? {
            Progress::Ready(n) => n,
            Progress::WouldBlock if req.mode() == Mode::NonBlocking => {
                if req.wait_ready_for(Interest::Write, Some(Duration::from_secs(1)))?
                    == Readiness::Timeout
                {
                    tracing::debug!("Peer is not draining, still waiting");
                }
                continue;
            }
            Progress::WouldBlock => req.write(&buf)?,
        };
        if n == 0 {
            println!("Connection closed by remote peer");
            break;
        }
    }
    req.destroy()
}

fn measure<R: Readable>(reader: &mut R, size: usize, period: u64, cid: usize) {
    let mut buf = vec![0u8; size];
    let mut start = Instant::now();
    let mut total_recv = 0;
    let sampling_period = Duration::from_secs(period);
    loop {
        let n = match reader.read(&mut buf) {
            Ok(n) => n,
            Err(e) => {
                println!("[{cid}]: read failed: {e}");
                break;
            }
        };
        if n == 0 {
            println!("Socket close from remote party...");
            break;
        }
        total_recv += n;
        let delta = start.elapsed();
        if delta >= sampling_period {
            let throughput = ((total_recv * 8) as f32 / delta.as_secs_f32()) / (10u64.pow(6) as f32);
            println!("[{cid}]: {throughput} Mbps");
            start = Instant::now();
            total_recv = 0;
        }
    }
}

fn run_server_mode(args: Args) -> Result<(), SocketError> {
    let port = parse_port(&args.port)?;
    let ctx = Context::new();
    let mut listener = ctx.socket::<Reply>()?;
    listener.bind_and_listen(port, args.backlog)?;
    println!("Listening on port {}", listener.local_port().unwrap_or(port));

    let mut sid = 0;
    loop {
        match listener.accept(Mode::Blocking) {
            Ok(mut peer) => {
                println!("Accepted peer {}", peer.id());
                let (size, period, cid) = (args.size, args.period, sid);
                sid += 1;
                std::thread::spawn(move || measure(&mut peer, size, period, cid));
            }
            Err(e) => println!("Failed to accept connection: {e}"),
        }
    }
}

fn run_publisher_mode(args: Args) -> Result<(), SocketError> {
    let port = parse_port(&args.port)?;
    let ctx = Context::new();
    let mut publisher = ctx.bind::<Publish>(port)?;
    println!("Publishing on port {}", publisher.local_port().unwrap_or(port));

    let mut buf = vec![0u8; args.size];
    buf.fill(42);
    let mut last_report = Instant::now();
    loop {
        publisher.write(&buf)?;
        if last_report.elapsed() >= Duration::from_secs(args.period) {
            println!("{} subscriber(s) attached", publisher.peer_count()?);
            last_report = Instant::now();
        }
    }
}

fn run_subscriber_mode(args: Args) -> Result<(), SocketError> {
    let port = parse_port(&args.port)?;
    let ctx = Context::new();
    let mut sub = ctx.socket::<Subscribe>()?;
    sub.connect(&args.addr, port)?;
    println!("Subscribed to {}:{port}", args.addr);
    measure(&mut sub, args.size, args.period, 0);
    sub.destroy()
}

fn init_env_filter(env_filter: EnvFilter) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_level(true)
        .with_target(true);

    let subscriber = subscriber.finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn main() {
    tracing_log::LogTracer::init().expect("Failed to set logger");

    // Initialize tracing subscriber
    if let Ok(env_filter) = EnvFilter::try_from_default_env() {
        init_env_filter(env_filter);
    }

    let args = Args::parse();
    let outcome = match (args.client, args.broadcast) {
        (true, false) => run_client_mode(args),
        (false, false) => run_server_mode(args),
        (true, true) => run_publisher_mode(args),
        (false, true) => run_subscriber_mode(args),
    };
    if let Err(e) = outcome {
        eprintln!("sockperf: {e}");
        std::process::exit(1);
    }
}

/// The throughput benchmark for request/reply and publish/subscribe sockets
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Set the client mode for the application
    #[arg(short, long)]
    client: bool,
    /// The address to connect to (the publisher's, in broadcast server mode)
    #[arg(short, long, default_value = "127.0.0.1")]
    addr: String,
    /// The port to listen on or connect to
    #[arg(short = 'P', long)]
    port: String,
    /// The read/write buffer size
    #[arg(short, long)]
    size: usize,
    /// The listen backlog
    #[arg(short, long, default_value = "16")]
    backlog: i32,
    /// Measure publish/subscribe instead of request/reply: the client publishes, the server subscribes
    #[arg(short = 'B', long)]
    broadcast: bool,
    /// Drive the client socket in non-blocking mode
    #[arg(short, long)]
    nonblocking: bool,
    /// The sampling period in seconds
    #[arg(short, long, default_value = "1")]
    period: u64,
}
