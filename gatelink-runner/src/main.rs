mod console;

use clap::Parser;
use console::{ConsoleAudio, ConsoleIndicator};
use crossbeam_channel::RecvTimeoutError;
use gatelink_channel::{Channel, ChannelError, FileChannel, MemoryChannel, Origin, RecordFilter};
use gatelink_config::{load_config, ChannelType, Config, Role};
use gatelink_driver::{
    cancel_pair, AudioSink, CancelHandle, IndicatorSink, ReceiveLoop, ReceiveSettings, Reply,
    TransmitError, Transmitter,
};
use gatelink_signal::{corrupt_message, Mode};

#[cfg(feature = "websocket")]
use gatelink_channel::{WsClientChannel, WsServerChannel};

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the communicator configuration file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Override the configured role (sender or receiver)
    #[arg(long)]
    role: Option<String>,

    /// Corrupt outgoing messages, as a possessed terminal would
    #[arg(long)]
    possessed: bool,
}

fn main() {
    env_logger::init();
    println!("Gatelink Dimensional Communicator");

    let args = Args::parse();

    let mut config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {:?}", e);
            process::exit(1);
        }
    };
    println!("Using configuration from {}", args.config.display());

    if let Some(role) = &args.role {
        match role.as_str() {
            "sender" => config.role = Role::Sender,
            "receiver" => config.role = Role::Receiver,
            other => {
                eprintln!("Unknown role '{}', expected sender or receiver", other);
                process::exit(1);
            }
        }
    }
    if args.possessed {
        config.possessed = true;
    }

    let channel = match create_channel(&config) {
        Ok(channel) => channel,
        Err(e) => {
            eprintln!("Failed to open channel: {}", e);
            process::exit(1);
        }
    };

    match config.role {
        Role::Sender => run_sender(&config, channel),
        Role::Receiver => run_receiver(&config, channel),
    }
}

#[allow(unused_variables)]
fn create_channel(config: &Config) -> Result<Box<dyn Channel>, ChannelError> {
    match config.channel.channel_type {
        ChannelType::Memory => {
            // A lone process attached to its own hub: useful for trying the
            // modes locally, nothing will be on the other side.
            println!("Using in-process channel; no other context will hear this");
            Ok(Box::new(MemoryChannel::new().attach()))
        }
        ChannelType::File => {
            let options = config.channel.get_file_options();
            println!("Sharing slot file: {}", options.path);
            Ok(Box::new(FileChannel::new(&options.path)))
        }
        ChannelType::WebSocket => {
            #[cfg(feature = "websocket")]
            {
                let options = config.channel.get_websocket_options();
                match &options.connect {
                    Some(url) => {
                        println!("Connecting to peer at {}", url);
                        Ok(Box::new(WsClientChannel::connect(url)?))
                    }
                    None => {
                        println!(
                            "Serving channel on ws://{}:{}",
                            options.host, options.port
                        );
                        Ok(Box::new(WsServerChannel::bind(&options.host, options.port)?))
                    }
                }
            }
            #[cfg(not(feature = "websocket"))]
            {
                eprintln!("WebSocket channel configured but websocket feature is not enabled!");
                process::exit(1);
            }
        }
    }
}

fn install_ctrlc(handle: CancelHandle) {
    if let Err(e) = ctrlc::set_handler(move || handle.cancel()) {
        log::warn!("could not install Ctrl+C handler: {}", e);
    }
}

fn run_sender(config: &Config, channel: Box<dyn Channel>) {
    let indicators: Arc<Mutex<dyn IndicatorSink>> = Arc::new(Mutex::new(ConsoleIndicator::new()));
    let audio: Arc<Mutex<dyn AudioSink>> = Arc::new(Mutex::new(ConsoleAudio));
    let mut transmitter =
        Transmitter::new(Origin::Sender, indicators, Arc::clone(&audio), channel);
    transmitter.set_speed(config.speed);

    let mut mode = config.default_mode;
    let mut possessed = config.possessed;
    let mut incoming = RecordFilter::new(Origin::Sender);

    let (shutdown_handle, shutdown) = cancel_pair();
    install_ctrlc(shutdown_handle.clone());

    // Stdin pump on its own thread so Ctrl+C interrupts the prompt loop.
    let (line_tx, line_rx) = crossbeam_channel::unbounded::<String>();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    println!("TRANSMIT mode {} at speed {}", mode.name(), transmitter.speed());
    println!("Type a message to transmit, or: /mode <name>  /speed <1-5>  /abort  /possessed  /quit");

    while shutdown.check().is_ok() {
        let line = match line_rx.recv_timeout(Duration::from_millis(200)) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => {
                // The link is two-way: the far side may answer.
                if let Some(record) = transmitter.poll_incoming(&mut incoming) {
                    println!("⚡ INCOMING FROM THE OTHER SIDE ⚡");
                    if let Ok(mut audio) = audio.lock() {
                        audio.noise(Duration::from_millis(500));
                    }
                    println!("<< {}", record.message);
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let line = line.trim();

        if let Some(rest) = line.strip_prefix("/mode") {
            match Mode::parse(rest) {
                Some(Mode::All) => println!("'all' is a receive-side presentation"),
                Some(new_mode) => {
                    mode = new_mode;
                    transmitter.abort();
                    println!("mode -> {}", mode.name());
                }
                None => println!("unknown mode '{}'", rest.trim()),
            }
        } else if let Some(rest) = line.strip_prefix("/speed") {
            match rest.trim().parse::<u8>() {
                Ok(speed @ 1..=5) => {
                    transmitter.set_speed(speed);
                    println!("speed -> {}", speed);
                }
                _ => println!("speed must be 1-5"),
            }
        } else if line == "/abort" {
            transmitter.abort();
            println!("TRANSMISSION ABORTED");
        } else if line == "/possessed" {
            possessed = !possessed;
            println!(
                "possession {}",
                if possessed { "TAKES HOLD" } else { "lifts" }
            );
        } else if line == "/quit" {
            break;
        } else {
            let outgoing = if possessed {
                corrupt_message(line)
            } else {
                line.to_string()
            };
            match transmitter.transmit(&outgoing, mode) {
                Ok(()) => println!("TRANSMITTING: {}", outgoing),
                Err(TransmitError::EmptyMessage) => {
                    println!("⚠ SIGNAL LOST - enter a message first");
                }
            }
        }
    }

    transmitter.abort();
    println!("Portal closed.");
}

fn run_receiver(config: &Config, channel: Box<dyn Channel>) {
    let indicators: Arc<Mutex<dyn IndicatorSink>> = Arc::new(Mutex::new(ConsoleIndicator::new()));
    let audio: Arc<Mutex<dyn AudioSink>> = Arc::new(Mutex::new(ConsoleAudio));
    let settings = ReceiveSettings {
        poll_interval: Duration::from_millis(config.receive.poll_interval_ms),
        cadence: Duration::from_millis(config.receive.cadence_ms),
        history_limit: config.receive.history_limit,
    };
    let mut receive_loop = ReceiveLoop::new(channel, Origin::Receiver, settings, indicators, audio);
    let replies = receive_loop.reply_sender();

    // Answers ride the default mode; 'all' is a presentation, not a signal.
    let reply_mode = match config.default_mode {
        Mode::All => Mode::Christmas,
        mode => mode,
    };

    let (shutdown_handle, shutdown) = cancel_pair();
    install_ctrlc(shutdown_handle.clone());

    println!("PORTAL OPEN - AWAITING SIGNAL");
    println!("Type a message to answer back, or /quit to close the portal");

    let worker = thread::spawn(move || {
        receive_loop.run(&shutdown);
        receive_loop.history().to_vec()
    });

    let (line_tx, line_rx) = crossbeam_channel::unbounded::<String>();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    while !shutdown_handle.is_cancelled() {
        let line = match line_rx.recv_timeout(Duration::from_millis(200)) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let line = line.trim();
        if line == "/quit" {
            break;
        }
        if line.is_empty() {
            continue;
        }
        let reply = Reply {
            message: line.to_string(),
            mode: reply_mode,
        };
        if replies.send(reply).is_err() {
            break;
        }
        println!("ANSWER SENT: {}", line);
    }
    shutdown_handle.cancel();

    let history = worker.join().unwrap_or_default();
    if !history.is_empty() {
        println!("--- received transmissions ---");
        for entry in &history {
            println!("[{}] {}", entry.received_at.format("%H:%M:%S"), entry.message);
        }
    }
    println!("PORTAL CLOSED");
}
