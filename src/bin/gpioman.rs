use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use gpioman::protocol::{CommandType, Request, Response, ResponseStatus};
use gpioman::{Attribute, Level, LineSnapshot};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "7070";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let line_arg = || Arg::with_name("line").help("Line name").required(true);
    let attribute_arg = || {
        Arg::with_name("attribute")
            .help("Attribute name")
            .required(true)
            .possible_values(&["frequency", "freq", "enabled", "status", "on_cycles", "off_cycles"])
    };

    let matches = App::new("gpioman")
        .version("0.1.0")
        .about("Control pulsing GPIO lines managed by gpiomand")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("host")
                .short("H")
                .long("host")
                .value_name("HOST")
                .help("Daemon host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Daemon port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table"])
                .default_value("table")
                .global(true),
        )
        .subcommand(SubCommand::with_name("ping").about("Check that the daemon is responsive"))
        .subcommand(SubCommand::with_name("list").about("Show every managed line"))
        .subcommand(
            SubCommand::with_name("show")
                .about("Show one line")
                .arg(line_arg()),
        )
        .subcommand(
            SubCommand::with_name("get")
                .about("Read one attribute of a line")
                .arg(line_arg())
                .arg(attribute_arg()),
        )
        .subcommand(
            SubCommand::with_name("set")
                .about("Write one attribute of a line")
                .arg(line_arg())
                .arg(attribute_arg())
                .arg(Arg::with_name("value").help("Non-negative integer value").required(true)),
        )
        .subcommand(
            SubCommand::with_name("enable")
                .about("Start pulsing a line")
                .arg(line_arg()),
        )
        .subcommand(
            SubCommand::with_name("disable")
                .about("Stop pulsing a line and leave it deasserted")
                .arg(line_arg()),
        )
        .subcommand(
            SubCommand::with_name("debug")
                .about("Show or switch the daemon's debug logging")
                .arg(Arg::with_name("state").possible_values(&["on", "off"])),
        )
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port: u16 = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse()?;
    let format = matches.value_of("format").unwrap_or("table");

    let command = match matches.subcommand() {
        ("ping", _) => CommandType::Ping,
        ("list", _) => CommandType::ListLines,
        ("show", Some(sub)) => CommandType::ReadLine { line: arg(sub, "line") },
        ("get", Some(sub)) => CommandType::ReadAttribute {
            line: arg(sub, "line"),
            attribute: arg(sub, "attribute"),
        },
        ("set", Some(sub)) => CommandType::WriteAttribute {
            line: arg(sub, "line"),
            attribute: arg(sub, "attribute"),
            value: arg(sub, "value"),
        },
        ("enable", Some(sub)) => write_enabled(sub, true),
        ("disable", Some(sub)) => write_enabled(sub, false),
        ("debug", Some(sub)) => match sub.value_of("state") {
            Some(state) => CommandType::SetDebug { enabled: state == "on" },
            None => CommandType::ReadDebug,
        },
        _ => unreachable!("subcommand required"),
    };

    let response = send_request(host, port, &Request { id: 1, command }).await?;
    print_response(&response, format)?;

    if !response.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn arg(matches: &ArgMatches<'_>, name: &str) -> String {
    matches.value_of(name).unwrap_or_default().to_string()
}

fn write_enabled(matches: &ArgMatches<'_>, enabled: bool) -> CommandType {
    CommandType::WriteAttribute {
        line: arg(matches, "line"),
        attribute: Attribute::Enabled.name().to_string(),
        value: if enabled { "1" } else { "0" }.to_string(),
    }
}

async fn send_request(host: &str, port: u16, request: &Request) -> Result<Response, Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", host, port);
    let stream = match TcpStream::connect(&addr).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("{} Failed to connect to gpiomand at {}", "❌".red(), addr.bright_white());
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                eprintln!("{} Daemon is not running. Start it with:", "💡".yellow());
                eprintln!("   {}", "gpiomand --config /etc/gpioman.json".bright_cyan());
            }
            return Err(e.into());
        }
    };

    let (reader, mut writer) = stream.into_split();
    let mut payload = serde_json::to_string(request)?;
    payload.push('\n');

    let reply = tokio::time::timeout(REQUEST_TIMEOUT, async move {
        writer.write_all(payload.as_bytes()).await?;
        let mut lines = BufReader::new(reader).lines();
        lines.next_line().await
    })
    .await
    .map_err(|_| format!("no response from {} within {:?}", addr, REQUEST_TIMEOUT))??;

    match reply {
        Some(line) => Ok(serde_json::from_str(&line)?),
        None => Err("daemon closed the connection".into()),
    }
}

fn print_response(response: &Response, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(response)?);
        return Ok(());
    }

    if !response.is_success() {
        let label = match response.status {
            ResponseStatus::Rejected => "REJECTED",
            ResponseStatus::UnknownLine => "UNKNOWN LINE",
            ResponseStatus::InvalidCommand => "INVALID COMMAND",
            _ => "ERROR",
        };
        eprintln!(
            "{} {}: {}",
            "❌".red(),
            label.bright_red().bold(),
            response.message.as_deref().unwrap_or("no details")
        );
        return Ok(());
    }

    if let Some(message) = &response.message {
        println!("{} {}", "✅".green(), message.bright_white());
    }
    if let Some(value) = response.value {
        println!("{}", value.to_string().bright_cyan());
    }
    if !response.lines.is_empty() {
        print_table(&response.lines);
    }
    Ok(())
}

fn print_table(lines: &[LineSnapshot]) {
    println!(
        "{}",
        format!(
            "{:<16} {:>8} {:>10} {:>6} {:>6} {:>7} {:>11}",
            "LINE", "ENABLED", "FREQ (Hz)", "ON", "OFF", "DUTY", "LEVEL"
        )
        .bright_white()
        .bold()
    );

    for line in lines {
        let total = u64::from(line.on_cycles) + u64::from(line.off_cycles);
        let duty = if total == 0 {
            0.0
        } else {
            f64::from(line.on_cycles) * 100.0 / total as f64
        };
        let enabled = if line.enabled { "yes".bright_green() } else { "no".bright_red() };
        let level = match line.level {
            Level::Asserted => "asserted".bright_yellow(),
            Level::Deasserted => "deasserted".dimmed(),
        };

        println!(
            "{:<16} {:>8} {:>10} {:>6} {:>6} {:>6.1}% {:>11}",
            line.name, enabled, line.frequency, line.on_cycles, line.off_cycles, duty, level
        );
    }
}
