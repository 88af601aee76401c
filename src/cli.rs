//! Command-line argument parsing for airdac

/// Parsed command line
#[derive(Debug, Default)]
pub struct Args {
    pub validate: bool,
    pub help: bool,
    /// Overrides AIRDAC_OUTPUT
    pub output: Option<String>,
}

pub fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    parse_args_from(&args)
}

/// Parse an argv-style list (first element is the program name)
pub fn parse_args_from(args: &[String]) -> Args {
    let mut result = Args::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--validate" => result.validate = true,
            "--help" | "-h" => result.help = true,
            "--output" | "-o" => {
                if i + 1 < args.len() {
                    i += 1;
                    result.output = Some(args[i].clone());
                } else {
                    result.output = Some("-".to_string());
                }
            }
            _ => {}
        }
        i += 1;
    }

    result
}

pub fn print_help() {
    println!("airdac - network audio receiver\n");
    println!("USAGE:");
    println!("    airdac [OPTIONS]\n");
    println!("OPTIONS:");
    println!("    --validate              Validate configuration and exit");
    println!("    --output, -o PATH       Write s16le PCM to PATH ('-' for stdout, 'null' to discard)");
    println!("    --help, -h              Show this help message\n");
    println!("ENVIRONMENT:");
    println!("    AIRDAC_CONTROL_ADDR     Sender control channel, host:port (required)");
    println!("    AIRDAC_PORT             Local audio data port (default: 6000)");
    println!("    AIRDAC_BUFFER_FRAMES    Jitter buffer slots, power of two (default: 512)");
    println!("    AIRDAC_START_FILL       Packets buffered before playback (default: 220)");
    println!("    AIRDAC_FMTP             Stream format line (default: ALAC 352/16/44100)");
    println!("    AIRDAC_RATE_ADAPTER     'stuffing' or 'resample' (default: stuffing)");
    println!("    AIRDAC_MAX_RATE_DEVIATION  Largest drift correction (default: 0.02)");
    println!("    AIRDAC_VOLUME_DB        Initial volume, -144..0 (default: 0)");
    println!("    AIRDAC_OUTPUT           Output target (default: '-')");
}
