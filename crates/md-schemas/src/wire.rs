use serde::{Deserialize, Serialize};

use crate::Timeframe;

/// Frames sent by a client over the subscription WebSocket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe {
        market: String,
        provider: String,
        symbol: String,
        #[serde(default = "default_stream_type")]
        stream_type: String,
        timeframe: String,
        since: Option<i64>,
    },
    Unsubscribe {
        market: String,
        provider: String,
        symbol: String,
        #[serde(default = "default_stream_type")]
        stream_type: String,
        timeframe: String,
    },
    Ping,
    Pong,
}

fn default_stream_type() -> String {
    "ohlcv".to_string()
}

/// Frames sent by the server over the subscription WebSocket.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Subscribed {
        symbol: String,
        timeframe: Timeframe,
        payload: MessagePayload,
    },
    Data {
        symbol: String,
        timeframe: Timeframe,
        payload: StreamPayload,
    },
    Notice {
        symbol: String,
        timeframe: Timeframe,
        payload: MessagePayload,
    },
    Error {
        symbol: String,
        timeframe: Timeframe,
        payload: MessagePayload,
    },
    Ping,
    Pong,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessagePayload {
    pub message: String,
}

/// `{"ohlc":[[ts,o,h,l,c],...],"volume":[[ts,v],...],"initial_batch":bool}`
#[derive(Debug, Clone, Serialize, Default)]
pub struct StreamPayload {
    pub ohlc: Vec<[f64; 5]>,
    pub volume: Vec<[f64; 2]>,
    pub initial_batch: bool,
}

impl StreamPayload {
    pub fn from_bars(bars: &[crate::OHLCVBar], initial_batch: bool) -> Self {
        let ohlc = bars
            .iter()
            .map(|b| [b.timestamp as f64, b.open, b.high, b.low, b.close])
            .collect();
        let volume = bars.iter().map(|b| [b.timestamp as f64, b.volume]).collect();
        Self { ohlc, volume, initial_batch }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subscribe_frame() {
        let raw = r#"{"action":"subscribe","market":"crypto","provider":"binance","symbol":"BTC/USDT","stream_type":"ohlcv","timeframe":"1m","since":null}"#;
        let frame: ClientFrame = serde_json::from_str(raw).unwrap();
        matches!(frame, ClientFrame::Subscribe { .. });
    }

    #[test]
    fn parses_ping_frame() {
        let raw = r#"{"action":"ping"}"#;
        let frame: ClientFrame = serde_json::from_str(raw).unwrap();
        matches!(frame, ClientFrame::Ping);
    }

    #[test]
    fn stream_payload_shapes_bars() {
        let bars = [crate::OHLCVBar::new(1000, 1.0, 2.0, 0.5, 1.5, 10.0)];
        let payload = StreamPayload::from_bars(&bars, true);
        assert_eq!(payload.ohlc.len(), 1);
        assert_eq!(payload.volume[0], [1000.0, 10.0]);
        assert!(payload.initial_batch);
    }
}
