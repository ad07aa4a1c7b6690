use clap::{App, Arg};
use gpioman::config::{DaemonConfig, LineConfig};
use gpioman::logging::{self, DebugSwitch};
use gpioman::protocol::{self, Response};
use gpioman::{Registry, TimingStrategy};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("gpiomand")
        .version("0.1.0")
        .about("GPIO pulse manager daemon")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("listen")
                .short("l")
                .long("listen")
                .value_name("ADDR")
                .help("Control protocol listen address (overrides the config file)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("timing")
                .short("t")
                .long("timing")
                .value_name("STRATEGY")
                .help("Timing strategy (overrides the config file)")
                .takes_value(true)
                .possible_values(&["coarse", "fine"]),
        )
        .arg(
            Arg::with_name("line")
                .long("line")
                .value_name("NAME")
                .help("Bind an additional virtual line")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Start with debug logging enabled"),
        )
        .get_matches();

    let debug = logging::init(matches.is_present("verbose"))?;

    let mut config = match matches.value_of("config") {
        Some(path) => DaemonConfig::load(path)?,
        None => DaemonConfig::default(),
    };
    if let Some(listen) = matches.value_of("listen") {
        config.listen = listen.to_string();
    }
    if let Some(strategy) = matches.value_of("timing") {
        config.timing.strategy = strategy.parse::<TimingStrategy>()?;
    }
    if let Some(names) = matches.values_of("line") {
        config.lines.extend(names.map(LineConfig::virtual_line));
    }
    config.validate()?;

    let registry = Arc::new(Registry::new(config.timing));
    config.bind_lines(&registry)?;
    info!(
        "managing {} line(s) with {:?} timing (tick rate {} Hz)",
        registry.len(),
        config.timing.strategy,
        config.timing.tick_hz
    );

    let listener = TcpListener::bind(&config.listen).await?;
    info!("control protocol listening on {}", config.listen);

    tokio::select! {
        result = serve(listener, Arc::clone(&registry), debug) => {
            if let Err(e) = result {
                error!("control server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
        }
    }

    registry.teardown_all();
    info!("all lines released");
    Ok(())
}

async fn serve(
    listener: TcpListener,
    registry: Arc<Registry>,
    debug: DebugSwitch,
) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("client connected: {}", addr);
                let client_registry = Arc::clone(&registry);
                let client_debug = debug.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, client_registry, client_debug).await {
                        warn!("client {} error: {}", addr, e);
                    }
                    info!("client {} disconnected", addr);
                });
            }
            Err(e) => {
                error!("failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    registry: Arc<Registry>,
    debug: DebugSwitch,
) -> Result<(), Box<dyn std::error::Error>> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response: Response = match protocol::parse_request(&line) {
            Ok(request) => protocol::handle_request_with_debug(&registry, &debug, request),
            Err(e) => {
                warn!("rejected request: {}", e);
                protocol::invalid_request(&e)
            }
        };

        let response_json = serde_json::to_string(&response)?;
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }

    Ok(())
}
