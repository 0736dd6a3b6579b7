use clap::Parser;
use pattern_socket::{Context, Handle, Listenable, Mode, Readable, Reply, Writable};
use tracing_subscriber::filter::EnvFilter;

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

fn main() -> std::io::Result<()> {
    // Initialize log bridge to capture log crate messages - MUST be first!
    tracing_log::LogTracer::init().expect("Failed to set logger");

    if let Ok(env_filter) = EnvFilter::try_from_default_env() {
        init_env_filter(env_filter);
    }

    let args = Args::parse();
    let ctx = Context::new();
    let mut listener = ctx.socket::<Reply>()?;
    listener.bind_and_listen(args.port, 16)?;
    println!("Reply server listening on port {}", args.port);

    for _ in 0..args.count {
        let mut peer = listener.accept(Mode::Blocking)?;
        println!("Accepted peer {}", peer.id());
        while let Some(request) = peer.readline(b"\n")? {
            println!("Got request: {}", String::from_utf8_lossy(&request));
            peer.write_all(b"hello ")?;
            peer.write_all(&request)?;
            peer.write_all(b"\n")?;
        }
        peer.destroy()?;
    }
    listener.destroy()?;
    Ok(())
}

/// A reply server greeting every line it receives.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// The port to listen on
    #[arg(short, long, default_value = "7890")]
    port: u16,
    /// The number of clients to serve before exiting
    #[arg(short, long, default_value = "1")]
    count: usize,
}
