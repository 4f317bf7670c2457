//! The binary foodlog-srv.

use foodlog_srv::*;

#[derive(clap::Parser, Debug)]
#[command(version)]
pub struct Args {
    /// By default foodlog-srv runs in "testing" configuration, listening
    /// only on localhost at a random port with a small worker pool.
    ///
    /// The "production" mode listens on port 80 on all interfaces and
    /// sizes the worker pool to the machine.
    #[arg(long)]
    pub production: bool,

    /// Listen on this address instead of the mode default.
    /// May be given more than once.
    #[arg(long)]
    pub listen: Vec<std::net::SocketAddr>,

    /// Directory holding the json collection files and uploaded images.
    #[arg(long)]
    pub data_dir: Option<std::path::PathBuf>,

    /// Override the worker thread count.
    #[arg(long)]
    pub worker_thread_count: Option<usize>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = <Args as clap::Parser>::parse();

    let mut config = if args.production {
        Config::production()
    } else {
        Config::testing()
    };

    if !args.listen.is_empty() {
        config.listen_address_list = args.listen.clone();
    }
    if let Some(data_dir) = &args.data_dir {
        config.data_dir = data_dir.clone();
    }
    if let Some(count) = args.worker_thread_count {
        config.worker_thread_count = count.max(1);
    }

    tracing::info!(?args, ?config, "Starting");

    let (send, recv) = std::sync::mpsc::channel();

    if let Err(err) = ctrlc::set_handler(move || {
        let _ = send.send(());
    }) {
        eprintln!("failed to install ctrl-c handler: {err}");
        std::process::exit(1);
    }

    let srv = match FoodLogSrv::new(config) {
        Ok(srv) => srv,
        Err(err) => {
            eprintln!("failed to start server: {err}");
            std::process::exit(1);
        }
    };

    srv.print_addrs();

    let _ = recv.recv();

    println!("Terminating...");
    drop(srv);
    println!("Done.");
    std::process::exit(0);
}
