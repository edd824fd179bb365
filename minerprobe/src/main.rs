//! # minerprobe
//!
//! Command line probe for the two device protocols of mining tooling:
//!
//! - `api`: send one command to the API socket of a mining-rig daemon and print the reply
//! - `serial`: push the Icarus test vectors, or arbitrary bytes, over a serial link
//! - `discover`: find daemons on the local network through multicast
//!
//! Decoded output goes to stdout, diagnostics go to stderr through `env_logger`.
use std::error::Error;
use std::net::Ipv4Addr;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use env_logger::Env;
use icarus_probe::{SerialConfig, SerialProbe};
use minerapi_client::{
    ApiClient, Builder, CancellationToken,
    discovery::{self, DiscoveryConfig},
};
use minerapi_protocol::{
    ApiRequest, ApiStatus, DEFAULT_API_PORT, Drain, ParameterPolicy, RequestEncoding,
};

const ICARUS_COMMAND: &str = "icarus";

#[derive(ValueEnum, Clone, Copy, Debug, Eq, PartialEq)]
enum DrainArg {
    /// Read until the daemon closes the connection
    UntilClose,
    /// A single read of at most 1024 bytes
    SingleRead,
    /// Read until the reply's NUL terminator
    UntilNul,
}

impl From<DrainArg> for Drain {
    fn from(value: DrainArg) -> Self {
        match value {
            DrainArg::UntilClose => Drain::until_close(),
            DrainArg::SingleRead => Drain::single_read(),
            DrainArg::UntilNul => Drain::until_nul(),
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, Eq, PartialEq)]
enum StyleArg {
    /// Always send a parameter, empty if none was given
    Always,
    /// Leave the parameter out if none was given
    Omit,
}

impl From<StyleArg> for ParameterPolicy {
    fn from(value: StyleArg) -> Self {
        match value {
            StyleArg::Always => ParameterPolicy::AlwaysPresent,
            StyleArg::Omit => ParameterPolicy::OmitWhenAbsent,
        }
    }
}

#[derive(Subcommand, Eq, PartialEq, Clone)]
enum Command {
    /// Send a command to the API socket of a daemon
    Api {
        #[arg(default_value = "summary", help = "Command, optionally with a parameter as command|parameter")]
        command: String,
        #[arg(default_value = "127.0.0.1")]
        host: String,
        #[arg(default_value_t = DEFAULT_API_PORT)]
        port: u16,
        #[arg(short, long, value_enum, default_value = "until-close")]
        drain: DrainArg,
        #[arg(short, long, value_enum, default_value = "omit")]
        style: StyleArg,
        #[arg(long, help = "Use the plain text API instead of JSON")]
        plain: bool,
        #[arg(long, default_value = "|")]
        separator: char,
        #[arg(long, help = "Connect timeout in milliseconds")]
        connect_timeout_ms: Option<u64>,
        #[arg(long, help = "Read and write timeout in milliseconds")]
        timeout_ms: Option<u64>,
    },
    /// Send data to a device on a serial link and wait for a reply
    Serial {
        #[arg(help = "Device, e.g. /dev/ttyUSB0 or COM1")]
        device: String,
        #[arg(
            required = true,
            help = "'icarus' to send the Icarus test vectors, otherwise '0xXXXX' hex or text tokens"
        )]
        tokens: Vec<String>,
        #[arg(short, long, default_value = "115200")]
        baud: u32,
        #[arg(short, long, help = "Seconds to wait for a reply", default_value = "10")]
        timeout_secs: u64,
    },
    /// Find daemons through multicast
    Discover {
        #[arg(long, default_value = discovery::DEFAULT_CODE)]
        code: String,
        #[arg(long, default_value_t = discovery::DEFAULT_GROUP)]
        group: Ipv4Addr,
        #[arg(long, default_value_t = DEFAULT_API_PORT)]
        port: u16,
        #[arg(long, default_value_t = discovery::DEFAULT_REPLY_PORT)]
        reply_port: u16,
        #[arg(long, help = "How long to wait for replies in milliseconds", default_value = "1000")]
        wait_ms: u64,
    },
}

#[derive(Parser)]
#[command(about = "Probe mining-rig API daemons and Icarus serial devices", long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

async fn api(
    client: ApiClient,
    request: ApiRequest,
    addr: (String, u16),
    plain: bool,
) -> Result<(), Box<dyn Error>> {
    if plain {
        let reply = tokio::task::spawn_blocking(move || client.call_plain(addr, &request)).await??;
        match ApiStatus::from_plain(&reply) {
            Ok(status) => log::info!("Status {} ({}): {}", status.severity, status.code, status.msg),
            Err(err) => log::warn!("Reply has no usable STATUS section: {}", err),
        }
        print!("{}", reply);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let reply = client.call_async(addr, &request, &cancel).await?;
    match ApiStatus::from_json(&reply) {
        Ok(status) => log::info!("Status {} ({}): {}", status.severity, status.code, status.msg),
        Err(err) => log::warn!("Reply has no usable STATUS section: {}", err),
    }
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

fn serial(device: &str, tokens: &[String], config: SerialConfig) -> Result<(), Box<dyn Error>> {
    let wait = config.timeout.as_secs();
    let mut probe = SerialProbe::open(device, &config)?;

    if tokens[0] == ICARUS_COMMAND {
        let results = probe.send_icarus_fixture();
        probe.close();
        for result in results? {
            println!("Push payload to icarus: {}", result.payload);
            println!(
                "Result:(should be: {}): {}",
                hex::encode(result.expected),
                hex::encode(&result.received)
            );
            if !result.matches() {
                log::warn!("Device did not answer with the expected nonce");
            }
        }
    } else {
        println!("Waiting up to {} seconds ...", wait);
        let reply = probe.send_generic(tokens);
        probe.close();
        let reply = reply?;
        println!("Result: hex 0x{}", hex::encode(&reply));
        println!("Result: asc {}", reply.escape_ascii());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let result = match args.command {
        Command::Api {
            command,
            host,
            port,
            drain,
            style,
            plain,
            separator,
            connect_timeout_ms,
            timeout_ms,
        } => {
            let request = ApiRequest::parse(command.trim(), separator);
            log::debug!("Parsed arguments: host={}, port={}, request={}", host, port, request);

            let mut builder = Builder::new()
                .encoding(RequestEncoding::Json(style.into()))
                .drain(drain.into());
            if let Some(ms) = connect_timeout_ms {
                builder = builder.connect_timeout(Duration::from_millis(ms));
            }
            if let Some(ms) = timeout_ms {
                builder = builder.io_timeout(Duration::from_millis(ms));
            }
            api(builder.build(), request, (host, port), plain).await
        }
        Command::Serial {
            device,
            tokens,
            baud,
            timeout_secs,
        } => {
            let config = SerialConfig {
                baud_rate: baud,
                timeout: Duration::from_secs(timeout_secs),
            };
            log::debug!("Serial config: {:?}", config);
            tokio::task::spawn_blocking(move || {
                serial(&device, &tokens, config).map_err(|err| err.to_string())
            })
            .await?
            .map_err(Into::into)
        }
        Command::Discover {
            code,
            group,
            port,
            reply_port,
            wait_ms,
        } => {
            let config = DiscoveryConfig {
                code,
                group,
                port,
                reply_port,
                wait: Duration::from_millis(wait_ms),
            };
            let found = tokio::task::spawn_blocking(move || discovery::discover(&config)).await??;
            for announcement in &found {
                println!(
                    "Got: '{}' from {} after {}ms",
                    announcement.message,
                    announcement.from,
                    announcement.elapsed.as_millis()
                );
            }
            Ok(())
        }
    };

    if let Err(err) = &result {
        log::error!("{}", err);
    }
    result
}
