use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use ackframe::messages::{
    Blob, Counter, DigitalWrite, HardwareInfo, LongData, PeerInfo, BLOB, COUNTER, DIGITAL_WRITE,
    HARDWARE_INFO, LONG_DATA, PEER_INFO,
};
use ackframe_frame::{Ack, AckPayload, Message};
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Owned, printable snapshot of a decoded message.
#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    pub tag: Option<u8>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    pub fields: Value,
    pub peer: String,
    pub timestamp: String,
}

struct Described {
    tag: u8,
    kind: &'static str,
    key: Option<u32>,
    destination: Option<String>,
    fields: Value,
}

fn plain<T: Message + Serialize>(message: &dyn Message, tag: u8, kind: &'static str) -> Option<Described> {
    let msg = message.downcast_ref::<T>()?;
    Some(Described {
        tag,
        kind,
        key: None,
        destination: None,
        fields: serde_json::to_value(msg).unwrap_or(Value::Null),
    })
}

fn ack<P: AckPayload + Serialize>(message: &dyn Message, tag: u8, kind: &'static str) -> Option<Described> {
    let msg = message.downcast_ref::<Ack<P>>()?;
    Some(Described {
        tag,
        kind,
        key: Some(msg.key().get()),
        destination: Some(format!("{:?}", msg.destination())),
        fields: serde_json::to_value(msg.payload()).unwrap_or(Value::Null),
    })
}

pub fn describe(message: &dyn Message, peer: &str) -> MessageView {
    let described = plain::<LongData>(message, LONG_DATA, "LongData")
        .or_else(|| plain::<PeerInfo>(message, PEER_INFO, "PeerInfo"))
        .or_else(|| ack::<HardwareInfo>(message, HARDWARE_INFO, "HardwareInfo"))
        .or_else(|| ack::<Counter>(message, COUNTER, "Counter"))
        .or_else(|| plain::<DigitalWrite>(message, DIGITAL_WRITE, "DigitalWrite"))
        .or_else(|| plain::<Blob>(message, BLOB, "Blob"));

    let (tag, kind, key, destination, fields) = match described {
        Some(d) => (Some(d.tag), d.kind.to_string(), d.key, d.destination, d.fields),
        None => (
            None,
            message.name().to_string(),
            None,
            None,
            Value::String(format!("{message:?}")),
        ),
    };

    MessageView {
        tag,
        kind,
        key,
        destination,
        fields,
        peer: peer.to_string(),
        timestamp: now_unix_seconds(),
    }
}

pub fn print_message(view: &MessageView, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(view).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["TAG", "TYPE", "KEY", "DESTINATION", "PEER", "FIELDS"])
                .add_row(vec![
                    optional(view.tag),
                    view.kind.clone(),
                    optional(view.key),
                    view.destination.clone().unwrap_or_else(|| "-".to_string()),
                    view.peer.clone(),
                    view.fields.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let mut line = format!("tag={} type={}", optional(view.tag), view.kind);
            if let (Some(key), Some(destination)) = (view.key, &view.destination) {
                line.push_str(&format!(" key={key} destination={destination}"));
            }
            println!("{line} peer={} fields={}", view.peer, view.fields);
        }
    }
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use ackframe_frame::IdempotencyKey;
    use bytes::BytesMut;

    use super::*;

    #[test]
    fn describes_ack_messages_with_envelope() {
        let key = IdempotencyKey::new(12).unwrap();
        let msg = Ack::response(key, Counter::value(5));
        let view = describe(&msg, "127.0.0.1:9000");

        assert_eq!(view.tag, Some(COUNTER));
        assert_eq!(view.kind, "Counter");
        assert_eq!(view.key, Some(12));
        assert_eq!(view.destination.as_deref(), Some("ToClient"));
        assert_eq!(view.fields["count"], 5);
    }

    #[test]
    fn plain_messages_have_no_envelope_fields() {
        let view = describe(&DigitalWrite { pin: 4, state: true }, "peer");
        let json: Value = serde_json::to_value(&view).unwrap();

        assert_eq!(json["type"], "DigitalWrite");
        assert_eq!(json["fields"]["pin"], 4);
        assert!(json.get("key").is_none());
        assert!(json.get("destination").is_none());
    }

    #[test]
    fn blob_fields_are_hex() {
        let view = describe(&Blob(bytes::Bytes::from_static(&[0xde, 0xad])), "peer");
        assert_eq!(view.fields, Value::String("dead".to_string()));
    }

    #[test]
    fn unknown_messages_fall_back_to_debug() {
        #[derive(Debug)]
        struct Custom;
        impl Message for Custom {
            fn payload_len(&self) -> usize {
                0
            }
            fn write_payload(&self, _dst: &mut BytesMut) -> ackframe_frame::Result<()> {
                Ok(())
            }
        }

        let view = describe(&Custom, "peer");
        assert_eq!(view.tag, None);
        assert!(view.kind.ends_with("Custom"));
        assert_eq!(view.fields, Value::String("Custom".to_string()));
    }
}
