use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn main() {
    let args = gcpatch::cli::Args::parse();
    let default_filter = if args.verbose { "gcpatch=debug" } else { "gcpatch=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(err) = gcpatch::run(args) {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}
