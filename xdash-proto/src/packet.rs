use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{MetricKind, UnknownMetricKind, field};

/// One telemetry record as it travels over the wire.
///
/// `module` and the `data` values stay loosely typed so that packets of a kind
/// this build does not know about still decode and can be reported by the
/// receiver. Known kinds read their fields through [`Packet::field`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub host: String,
    pub module: String,
    pub data: BTreeMap<String, Value>,
}

#[derive(Debug, thiserror::Error)]
#[error("malformed packet: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

impl Packet {
    pub fn new(host: impl Into<String>, kind: MetricKind) -> Self {
        Packet {
            host: host.into(),
            module: kind.as_str().to_owned(),
            data: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.data.insert(name.to_owned(), Value::from(value));
        self
    }

    pub fn network(host: impl Into<String>, bytes_sent: f64, bytes_recv: f64) -> Self {
        Packet::new(host, MetricKind::Network)
            .with(field::BYTES_SENT, bytes_sent)
            .with(field::BYTES_RECV, bytes_recv)
    }

    pub fn memory(host: impl Into<String>, physical_percent: f64) -> Self {
        Packet::new(host, MetricKind::Memory).with(field::PHYSICAL_PERCENT, physical_percent)
    }

    pub fn cpu(host: impl Into<String>, avg: f64) -> Self {
        Packet::new(host, MetricKind::Cpu).with(field::AVG, avg)
    }

    pub fn kind(&self) -> Result<MetricKind, UnknownMetricKind> {
        self.module.parse()
    }

    /// Numeric value of `name`; `None` when absent or not a number.
    pub fn field(&self, name: &str) -> Option<f64> {
        self.data.get(name).and_then(Value::as_f64)
    }

    pub fn from_json(raw: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn to_json(&self) -> Result<String, DecodeError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_network_packet() {
        let packet = Packet::from_json(
            r#"{"host":"h1","module":"network","data":{"bytes-sent":2048,"bytes-recv":1024.5}}"#,
        )
        .unwrap();

        assert_eq!(packet.host, "h1");
        assert_eq!(packet.kind(), Ok(MetricKind::Network));
        assert_eq!(packet.field(field::BYTES_SENT), Some(2048.0));
        assert_eq!(packet.field(field::BYTES_RECV), Some(1024.5));
    }

    #[test]
    fn unknown_module_still_decodes() {
        let packet = Packet::from_json(r#"{"host":"h1","module":"disk","data":{}}"#).unwrap();

        assert_eq!(packet.kind(), Err(UnknownMetricKind("disk".to_owned())));
    }

    #[test]
    fn reject_malformed_payloads() {
        assert!(Packet::from_json("not json").is_err());
        assert!(Packet::from_json(r#"{"host":"h1","data":{}}"#).is_err());
        assert!(Packet::from_json(r#"{"host":"h1","module":"cpu","data":[]}"#).is_err());
    }

    #[test]
    fn non_numeric_fields_decode_but_read_as_missing() {
        let packet =
            Packet::from_json(r#"{"host":"h1","module":"cpu","data":{"avg":"high"}}"#).unwrap();

        assert_eq!(packet.field(field::AVG), None);
    }

    #[test]
    fn unknown_module_with_nested_data_decodes() {
        let packet = Packet::from_json(
            r#"{"host":"h1","module":"net","data":{"eth0":{"bytes_sent":1},"pct":[1,2]}}"#,
        )
        .unwrap();

        assert_eq!(packet.kind(), Err(UnknownMetricKind("net".to_owned())));
    }

    #[test]
    fn constructors_match_wire_shape() {
        let json = Packet::cpu("h1", 0.5).to_json().unwrap();

        assert_eq!(json, r#"{"host":"h1","module":"cpu","data":{"avg":0.5}}"#);
    }
}
