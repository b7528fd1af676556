//! Collector-request instrumentation

use crate::CaptureConfig;
use tagscope_common::{params_from_query, params_from_url, QueueVariant, RelayMessage, RequestShape};
use tagscope_relay::CaptureConn;

/// Observes outgoing requests made through the page's own request machinery
/// and emits a `NetworkEvent` for each one destined for the collector
/// endpoint. Everything else passes unobserved.
pub struct NetworkTap {
    variant: QueueVariant,
    endpoints: Vec<String>,
    relay: CaptureConn,
}

impl NetworkTap {
    pub fn new(variant: QueueVariant, relay: CaptureConn, config: &CaptureConfig) -> Self {
        Self {
            variant,
            endpoints: config.collector_endpoints.clone(),
            relay,
        }
    }

    /// Observe one outgoing request. `body` is the decoded request payload
    /// when the page sent one (POST), `None` for plain GET beacons.
    pub fn observe(&self, url: &str, body: Option<&str>) {
        if !self.is_collector(url) {
            return;
        }
        let message = RelayMessage::NetworkEvent {
            variant: self.variant,
            url: url.to_string(),
            shape: request_shape(url, body),
        };
        if let Err(err) = self.relay.send(&message) {
            tracing::debug!("Dropped network observation: {}", err);
        }
    }

    fn is_collector(&self, url: &str) -> bool {
        let path = url.split_once('?').map_or(url, |(path, _)| path);
        let path = path.split_once('#').map_or(path, |(path, _)| path);
        self.endpoints.iter().any(|suffix| path.ends_with(suffix))
    }
}

/// Decide the request shape from the payload, not the URL pattern. A batch
/// is the bulk-collector body: a JSON object whose `requests` array holds
/// one query string per bundled event. A payload that parses as neither
/// yields an empty parameter sequence, which downstream classification
/// surfaces as a broken event rather than an error.
fn request_shape(url: &str, body: Option<&str>) -> RequestShape {
    match body {
        None => RequestShape::Single {
            params: params_from_url(url),
        },
        Some(body) if body.is_empty() => RequestShape::Single {
            params: params_from_url(url),
        },
        Some(body) if body.trim_start().starts_with('{') => {
            parse_batch(body).unwrap_or(RequestShape::Single { params: Vec::new() })
        }
        Some(body) => RequestShape::Single {
            params: params_from_query(body),
        },
    }
}

fn parse_batch(body: &str) -> Option<RequestShape> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let requests = value.get("requests")?.as_array()?;
    let requests = requests
        .iter()
        .map(|request| request.as_str().map(params_from_query))
        .collect::<Option<Vec<_>>>()?;
    Some(RequestShape::Batch { requests })
}
