use clap::Parser;
use pattern_socket::{
    parse_port, AnySocket, Bindable, Context, Handle, Listenable, Mode, Pattern, Readable, SocketError, Writable,
};
use std::io::BufRead;
use tracing_subscriber::filter::EnvFilter;

fn echo_lines<P: Readable + Writable>(mut peer: P, terminator: Vec<u8>) {
    loop {
        match peer.readline(&terminator) {
            Ok(Some(line)) => {
                println!("[{}] {}", peer.id(), String::from_utf8_lossy(&line));
                let mut reply = line;
                reply.extend_from_slice(&terminator);
                if let Err(e) = peer.write_all(&reply) {
                    tracing::warn!("Reply to {} failed: {e}", peer.id());
                    break;
                }
            }
            Ok(None) => {
                println!("Peer {} closed the connection", peer.id());
                break;
            }
            Err(e) => {
                tracing::warn!("Read from {} failed: {e}", peer.id());
                break;
            }
        }
    }
}

fn serve<L>(listener: &mut L, port: u16, backlog: i32, terminator: &[u8]) -> Result<(), SocketError>
where
    L: Listenable,
    L::Peer: Readable + Writable + Send + 'static,
{
    listener.bind_and_listen(port, backlog)?;
    println!("Listening on port {}", listener.local_port().unwrap_or(port));
    loop {
        match listener.accept(Mode::Blocking) {
            Ok(peer) => {
                println!("Accepted peer {}", peer.id());
                let terminator = terminator.to_vec();
                std::thread::spawn(move || echo_lines(peer, terminator));
            }
            Err(e) => tracing::warn!("Failed to accept connection: {e}"),
        }
    }
}

fn broadcast<B: Bindable + Writable>(writer: &mut B, port: u16, terminator: &[u8]) -> Result<(), SocketError> {
    writer.bind(port)?;
    println!("Bound on port {}", writer.local_port().unwrap_or(port));
    for line in std::io::stdin().lock().lines() {
        let mut msg = line?.into_bytes();
        msg.extend_from_slice(terminator);
        writer.write_all(&msg)?;
    }
    Ok(())
}

fn subscribe(reader: &mut dyn Readable, terminator: &[u8]) -> Result<(), SocketError> {
    while let Some(line) = reader.readline(terminator)? {
        println!("{}", String::from_utf8_lossy(&line));
    }
    println!("Connection closed by remote peer");
    Ok(())
}

fn request(socket: &mut AnySocket, terminator: &[u8]) -> Result<(), SocketError> {
    for line in std::io::stdin().lock().lines() {
        let mut msg = line?.into_bytes();
        msg.extend_from_slice(terminator);
        let writer = socket
            .writable()
            .ok_or(SocketError::InvalidArgument("pattern cannot write"))?;
        writer.write_all(&msg)?;
        let reader = socket
            .readable()
            .ok_or(SocketError::InvalidArgument("pattern cannot read"))?;
        match reader.readline(terminator)? {
            Some(reply) => println!("{}", String::from_utf8_lossy(&reply)),
            None => {
                println!("Connection closed by remote peer");
                break;
            }
        }
    }
    Ok(())
}

fn run(args: Args) -> Result<(), SocketError> {
    let pattern: Pattern = args.pattern.parse()?;
    let port = parse_port(&args.port)?;
    let terminator = args.terminator.as_bytes();
    let ctx = Context::new();
    let mut socket = ctx.open(pattern)?;

    if args.listen {
        return match &mut socket {
            AnySocket::Reply(s) => serve(s, port, args.backlog, terminator),
            AnySocket::Respond(s) => serve(s, port, args.backlog, terminator),
            AnySocket::Other(s) => serve(s, port, args.backlog, terminator),
            AnySocket::Publish(s) => broadcast(s, port, terminator),
            AnySocket::Survey(s) => broadcast(s, port, terminator),
            AnySocket::Local(s) => broadcast(s, port, terminator),
            _ => Err(SocketError::InvalidPattern(format!("{pattern} cannot listen"))),
        };
    }

    let connector = socket
        .connectable()
        .ok_or_else(|| SocketError::InvalidPattern(format!("{pattern} cannot connect")))?;
    connector.connect(&args.addr, port)?;
    println!("Connected successfully to {}:{port}", args.addr);

    if let AnySocket::Subscribe(s) = &mut socket {
        return subscribe(s, terminator);
    }
    request(&mut socket, terminator)?;
    socket.destroy()
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
    if let Err(e) = run(args) {
        eprintln!("sockcat: {e}");
        std::process::exit(1);
    }
}

/// Line-oriented netcat over any messaging pattern.
///
/// Listening reply, respond and other sockets echo every line back. Bound
/// publish, survey and local sockets broadcast stdin. Connected sockets send stdin
/// line by line and print the replies; subscribers only print.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// The messaging pattern (req, rep, surveyor, respondent, pub, sub, local, raw)
    #[arg(short = 'P', long)]
    pattern: String,
    /// Listen (or bind, for broadcast patterns) instead of connecting
    #[arg(short, long)]
    listen: bool,
    /// The address to connect to
    #[arg(short, long, default_value = "127.0.0.1")]
    addr: String,
    /// The port to connect, listen or bind on; 0 picks an ephemeral one
    #[arg(short, long)]
    port: String,
    /// The listen backlog
    #[arg(short, long, default_value = "16")]
    backlog: i32,
    /// The line terminator
    #[arg(short, long, default_value = "\n")]
    terminator: String,
}
