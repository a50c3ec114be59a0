use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ackframe::messages::{self, Counter, HardwareInfo, InfoCode};
use ackframe_ack::{ProcessorConfig, RequestProcessor};
use ackframe_dispatch::{Dispatcher, Priority};
use ackframe_frame::{Ack, Registry};
use ackframe_peer::{Outgoing, PeerError, PeerListener, Pump, PumpConfig, TcpLink};

use crate::cmd::{install_ctrlc_handler, parse_duration, ServeArgs};
use crate::exit::{frame_error, peer_error, CliResult, SUCCESS};
use crate::output::{describe, print_message, OutputFormat};

const POLL: Duration = Duration::from_millis(100);

/// State shared by every connection of one `serve` run.
struct Responder {
    name: String,
    counter: AtomicI32,
}

impl Responder {
    fn hardware_info(&self, request: &Ack<HardwareInfo>, peer: SocketAddr) -> HardwareInfo {
        let code = request.payload().code;
        let information = match code {
            InfoCode::HardwareName => self.name.clone(),
            InfoCode::SerialPortName => format!("tcp://{peer}"),
        };
        HardwareInfo::answer(code, information)
    }

    fn step(&self, request: &Ack<Counter>) -> Counter {
        let count = if request.payload().increment {
            self.counter.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
        } else {
            self.counter.fetch_sub(1, Ordering::SeqCst).wrapping_sub(1)
        };
        Counter::value(count)
    }
}

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let registry = Arc::new(messages::registry().map_err(|err| frame_error("registry", err))?);
    let processor_config = ProcessorConfig {
        cache_expiry: parse_duration(&args.cache_expiry)?,
        ..ProcessorConfig::default()
    };
    let pump_config = PumpConfig::default();

    let listener = PeerListener::bind(args.addr.as_str())
        .map_err(|err| peer_error("bind failed", err))?
        .with_frame_config(pump_config.frame.clone());
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "listening");
    }

    let running = install_ctrlc_handler()?;
    let responder = Arc::new(Responder {
        name: args.name,
        counter: AtomicI32::new(0),
    });

    while running.load(Ordering::SeqCst) {
        let link = listener
            .accept()
            .map_err(|err| peer_error("accept failed", err))?;
        let peer = link.peer_addr;
        tracing::info!(%peer, "peer connected");

        let result = serve_peer(
            link,
            &registry,
            &responder,
            processor_config,
            pump_config.clone(),
            format,
            || running.load(Ordering::SeqCst),
        );
        match result {
            Ok(()) => tracing::info!(%peer, "peer disconnected"),
            Err(err) => tracing::warn!(%peer, error = %err, "peer dropped"),
        }

        if args.once {
            break;
        }
    }

    Ok(SUCCESS)
}

fn serve_peer(
    link: TcpLink,
    registry: &Arc<Registry>,
    responder: &Arc<Responder>,
    config: ProcessorConfig,
    pump_config: PumpConfig,
    format: OutputFormat,
    keep_going: impl Fn() -> bool,
) -> Result<(), PeerError> {
    let peer = link.peer_addr;
    let (outgoing, queue) = Outgoing::channel();

    let state = Arc::clone(responder);
    let hardware = Arc::new(RequestProcessor::<HardwareInfo>::with_config(
        outgoing.outbox(),
        move |request: &Ack<HardwareInfo>| Some(state.hardware_info(request, peer)),
        config,
    ));
    let state = Arc::clone(responder);
    let counter = Arc::new(RequestProcessor::<Counter>::with_config(
        outgoing.outbox(),
        move |request: &Ack<Counter>| Some(state.step(request)),
        config,
    ));

    let mut dispatcher = Dispatcher::new();
    let peer_name = peer.to_string();
    dispatcher.observe_all(Priority::Critical, move |message| {
        print_message(&describe(message, &peer_name), format);
    });
    hardware.register(&mut dispatcher);
    counter.register(&mut dispatcher);
    dispatcher.observe_all(Priority::Lowest, |message| {
        tracing::debug!(message = message.name(), "no handler consumed message");
    });

    let pump = Pump::spawn(
        link.reader,
        link.writer,
        Arc::clone(registry),
        Arc::new(dispatcher),
        queue,
        pump_config,
    )?;

    while keep_going() && pump.is_running() {
        std::thread::sleep(POLL);
        hardware.update_cache();
        counter.update_cache();
    }

    pump.shutdown();
    pump.join()
}
