use clap::Parser;
use pattern_socket::{Connectable, Context, Handle, Readable, Request, Writable};
use std::time::Duration;
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
    let mut req = ctx.socket::<Request>()?;
    req.connect(&args.addr, args.port)?;
    println!("Connected to {}:{}", args.addr, args.port);

    for i in 0..args.count {
        let msg = format!("{} {i}\n", args.name);
        req.write_all(msg.as_bytes())?;
        match req.readline(b"\n")? {
            Some(reply) => println!("Got reply: {}", String::from_utf8_lossy(&reply)),
            None => {
                println!("Connection closed by remote peer");
                break;
            }
        }
        std::thread::sleep(Duration::from_millis(args.period));
    }
    req.destroy()?;
    Ok(())
}

/// A request client sending numbered greetings.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// The server address
    #[arg(short, long, default_value = "127.0.0.1")]
    addr: String,
    /// The server port
    #[arg(short, long, default_value = "7890")]
    port: u16,
    /// The name to greet with
    #[arg(short, long, default_value = "world")]
    name: String,
    /// The number of requests
    #[arg(short, long, default_value = "3")]
    count: usize,
    /// Pause between requests in milliseconds
    #[arg(long, default_value = "500")]
    period: u64,
}
