use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufWriter;
use tracing::{error, info};

use airdac::audio::codec::{L16Decoder, Plaintext};
use airdac::audio::sink::{AudioSink, NullSink, WriterSink};
use airdac::cli::{parse_args, print_help};
use airdac::config::{Config, OutputTarget};
use airdac::rtp::frames_to_duration;
use airdac::session::{Session, StreamSetup};

fn open_sink(target: &OutputTarget) -> Result<Box<dyn AudioSink>> {
    Ok(match target {
        OutputTarget::Stdout => Box::new(WriterSink::new(std::io::stdout())),
        OutputTarget::File(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file {}", path.display()))?;
            Box::new(WriterSink::new(BufWriter::new(file)))
        }
        OutputTarget::Null => Box::new(NullSink::new()),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    if args.help {
        print_help();
        return Ok(());
    }

    // Logs go to stderr; stdout may be carrying audio
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("airdac=info".parse().unwrap()),
        )
        .init();

    info!("airdac v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::from_env()?;
    if let Some(output) = &args.output {
        config.output = OutputTarget::parse(output);
    }
    info!("Configuration loaded");
    info!("  Data port: {}", config.port);
    info!("  Control: {}", config.control_addr);
    info!(
        "  Buffer: {} frames, start at {}",
        config.buffer_frames, config.start_fill
    );
    info!("  Rate adapter: {:?}", config.rate_adapter);
    info!("  Output: {:?}", config.output);

    // Handle --validate mode
    if args.validate {
        info!("Validating configuration...");
        match config.validate() {
            Ok(()) => {
                info!("Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        }
    }

    config.validate()?;
    let session_config = config.session_config()?;
    info!(
        "  Start latency: {} ms",
        frames_to_duration(config.start_fill, &session_config.buffer.params).as_millis()
    );
    let control_addr = config.control_socket_addr()?;

    let socket = std::net::UdpSocket::bind(("0.0.0.0", config.port))
        .with_context(|| format!("Failed to bind audio socket on port {}", config.port))?;

    let mut session = Session::new(session_config);
    session.set_volume(config.volume_db);
    session
        .start(StreamSetup {
            socket,
            control_addr,
            cipher: Box::new(Plaintext),
            decoder: Box::new(L16Decoder),
            sink: open_sink(&config.output)?,
        })
        .await
        .context("Failed to start session")?;

    info!("Receiving on port {}; Ctrl-C to stop", config.port);
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Shutting down...");
    if let Some(summary) = session.stop().await {
        info!(
            "Played {} frames: {} missing, {} late, {} resend requests ({} sent)",
            summary.buffer.frames_played,
            summary.buffer.frames_missing,
            summary.buffer.packets_too_late,
            summary.buffer.resend_requests,
            summary.resends_sent
        );
    }

    Ok(())
}
