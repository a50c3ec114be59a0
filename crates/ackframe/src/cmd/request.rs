use std::sync::Arc;
use std::time::Duration;

use ackframe::messages::{self, Counter, HardwareInfo, InfoCode};
use ackframe_ack::{ProcessorConfig, RequestProcessor};
use ackframe_dispatch::Dispatcher;
use ackframe_frame::{Ack, AckPayload, Message, Registry};
use ackframe_peer::{connect, Outgoing, Pump, PumpConfig, TcpLink};

use crate::cmd::{parse_duration, RequestArgs, RequestKind};
use crate::exit::{ack_error, frame_error, peer_error, CliResult, SUCCESS};
use crate::output::{describe, print_message, OutputFormat};

pub fn run(args: RequestArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let config = ProcessorConfig {
        resend_interval: parse_duration(&args.resend)?,
        ..ProcessorConfig::default()
    };
    let registry = Arc::new(messages::registry().map_err(|err| frame_error("registry", err))?);
    let pump_config = PumpConfig::default();
    let link = connect(args.addr.as_str(), &pump_config.frame)
        .map_err(|err| peer_error("connect failed", err))?;
    let peer = link.peer_addr.to_string();

    let response: Box<dyn Message> = match args.kind {
        RequestKind::HardwareName => Box::new(exchange(
            link,
            registry,
            HardwareInfo::request(InfoCode::HardwareName),
            config,
            pump_config,
            timeout,
        )?),
        RequestKind::SerialPort => Box::new(exchange(
            link,
            registry,
            HardwareInfo::request(InfoCode::SerialPortName),
            config,
            pump_config,
            timeout,
        )?),
        RequestKind::Increment | RequestKind::Decrement => Box::new(exchange(
            link,
            registry,
            Counter::step(args.kind == RequestKind::Increment),
            config,
            pump_config,
            timeout,
        )?),
    };

    print_message(&describe(&*response, &peer), format);
    Ok(SUCCESS)
}

/// Run one request over a fresh pump and stop the pump afterwards.
fn exchange<P: AckPayload>(
    link: TcpLink,
    registry: Arc<Registry>,
    payload: P,
    config: ProcessorConfig,
    pump_config: PumpConfig,
    timeout: Duration,
) -> CliResult<Ack<P>> {
    let (outgoing, queue) = Outgoing::channel();
    let processor = Arc::new(RequestProcessor::<P>::requester(outgoing.outbox(), config));
    let mut dispatcher = Dispatcher::new();
    processor.register(&mut dispatcher);

    let pump = Pump::spawn(
        link.reader,
        link.writer,
        registry,
        Arc::new(dispatcher),
        queue,
        pump_config,
    )
    .map_err(|err| peer_error("pump failed", err))?;

    let response = processor.request_timeout(payload, timeout);
    pump.shutdown();
    let stopped = pump.join();

    let response = response.map_err(|err| ack_error("request failed", err))?;
    if let Err(err) = stopped {
        tracing::debug!(error = %err, "pump stopped with error after response");
    }
    Ok(response)
}
