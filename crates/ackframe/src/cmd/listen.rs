use std::sync::atomic::Ordering;
use std::sync::{mpsc, Arc};
use std::time::Duration;

use ackframe::messages;
use ackframe_dispatch::{Dispatcher, Priority};
use ackframe_peer::{connect, Outgoing, Pump, PumpConfig};

use crate::cmd::{install_ctrlc_handler, ListenArgs};
use crate::exit::{frame_error, peer_error, CliResult, SUCCESS};
use crate::output::{describe, print_message, MessageView, OutputFormat};

const POLL: Duration = Duration::from_millis(100);

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let registry = Arc::new(messages::registry().map_err(|err| frame_error("registry", err))?);
    let config = PumpConfig::default();
    let link = connect(args.addr.as_str(), &config.frame)
        .map_err(|err| peer_error("connect failed", err))?;
    let peer = link.peer_addr.to_string();

    let running = install_ctrlc_handler()?;

    let (views, received) = mpsc::channel::<MessageView>();
    let mut dispatcher = Dispatcher::new();
    dispatcher.observe_all(Priority::Normal, move |message| {
        let _ = views.send(describe(message, &peer));
    });

    // Nothing is sent, but the pump still owns a writer.
    let (_outgoing, queue) = Outgoing::channel();
    let pump = Pump::spawn(
        link.reader,
        link.writer,
        registry,
        Arc::new(dispatcher),
        queue,
        config,
    )
    .map_err(|err| peer_error("pump failed", err))?;

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) && !reached(printed, args.count) {
        match received.recv_timeout(POLL) {
            Ok(view) => {
                print_message(&view, format);
                printed = printed.saturating_add(1);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if !pump.is_running() {
                    break;
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    pump.shutdown();
    match pump.join() {
        // A peer hanging up mid-frame after we got what we wanted is not a failure.
        Err(err) if !reached(printed, args.count) => Err(peer_error("receive failed", err)),
        _ => Ok(SUCCESS),
    }
}

fn reached(printed: usize, count: Option<usize>) -> bool {
    count.is_some_and(|count| printed >= count)
}
