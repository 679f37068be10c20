//! Publish [FrameMetrics] to holding registers on the remote controller.

use tracing::trace;

use crate::pixel_stats::FrameMetrics;

/// Number of registers written per frame.
pub const REGISTER_COUNT: usize = 10;

/// A failure reported by a [RegisterTransport].
#[derive(thiserror::Error, Debug)]
#[error("{reason}")]
pub struct TransportError {
    reason: String,
}

impl TransportError {
    pub fn new<S: Into<String>>(reason: S) -> Self {
        Self {
            reason: reason.into(),
        }
    }
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl From<register_comms::Error> for TransportError {
    fn from(orig: register_comms::Error) -> Self {
        Self::new(orig.to_string())
    }
}

/// Writes consecutive 16-bit registers.
pub trait RegisterTransport: Send {
    fn write_registers(&mut self, base_address: u16, values: &[u16]) -> Result<(), TransportError>;
}

impl RegisterTransport for register_comms::ModbusTcpClient {
    fn write_registers(&mut self, base_address: u16, values: &[u16]) -> Result<(), TransportError> {
        Ok(register_comms::ModbusTcpClient::write_registers(
            self,
            base_address,
            values,
        )?)
    }
}

impl<T: RegisterTransport + ?Sized> RegisterTransport for Box<T> {
    fn write_registers(&mut self, base_address: u16, values: &[u16]) -> Result<(), TransportError> {
        (**self).write_registers(base_address, values)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PublishError {
    #[error("writing {count} registers at address {base_address} failed: {source}")]
    Transport {
        base_address: u16,
        count: usize,
        #[source]
        source: TransportError,
    },
}

/// The register payload for one frame.
///
/// Order: mean R, G, B, minimum R, G, B, peak percentage R, G, B (fraction
/// discarded), frame height (saturating).
pub fn register_payload(metrics: &FrameMetrics) -> [u16; REGISTER_COUNT] {
    let pct = |p: f64| p.clamp(0.0, 100.0).trunc() as u16;
    [
        metrics.mean_r.into(),
        metrics.mean_g.into(),
        metrics.mean_b.into(),
        metrics.min_r.into(),
        metrics.min_g.into(),
        metrics.min_b.into(),
        pct(metrics.peak_percent_r),
        pct(metrics.peak_percent_g),
        pct(metrics.peak_percent_b),
        u16::try_from(metrics.height).unwrap_or(u16::MAX),
    ]
}

pub struct RegisterPublisher<T> {
    transport: T,
    base_address: u16,
}

impl<T: RegisterTransport> RegisterPublisher<T> {
    pub fn new(transport: T, base_address: u16) -> Self {
        Self {
            transport,
            base_address,
        }
    }

    pub fn base_address(&self) -> u16 {
        self.base_address
    }

    pub fn publish(&mut self, metrics: &FrameMetrics) -> Result<(), PublishError> {
        let payload = register_payload(metrics);
        trace!("writing {:?} at {}", payload, self.base_address);
        self.transport
            .write_registers(self.base_address, &payload)
            .map_err(|source| PublishError::Transport {
                base_address: self.base_address,
                count: payload.len(),
                source,
            })
    }

    pub fn into_inner(self) -> T {
        self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        writes: Vec<(u16, Vec<u16>)>,
        fail: bool,
    }

    impl RegisterTransport for Recorder {
        fn write_registers(
            &mut self,
            base_address: u16,
            values: &[u16],
        ) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError::new("connection reset"));
            }
            self.writes.push((base_address, values.to_vec()));
            Ok(())
        }
    }

    fn metrics() -> FrameMetrics {
        FrameMetrics {
            mean_r: 2,
            mean_g: 3,
            mean_b: 4,
            min_r: 0,
            min_g: 1,
            min_b: 2,
            peak_percent_r: 99.0,
            peak_percent_g: 45.99,
            peak_percent_b: 0.5,
            height: 322,
        }
    }

    #[test]
    fn payload_order_and_truncation() {
        assert_eq!(
            register_payload(&metrics()),
            [2, 3, 4, 0, 1, 2, 99, 45, 0, 322]
        );
    }

    #[test]
    fn height_saturates() {
        let mut m = metrics();
        m.height = 100_000;
        assert_eq!(register_payload(&m)[9], u16::MAX);
    }

    #[test]
    fn publish_writes_at_base_address() {
        let mut publisher = RegisterPublisher::new(Recorder::default(), 40);
        publisher.publish(&metrics()).unwrap();
        let rec = publisher.into_inner();
        assert_eq!(rec.writes.len(), 1);
        assert_eq!(rec.writes[0].0, 40);
        assert_eq!(rec.writes[0].1.len(), REGISTER_COUNT);
    }

    #[test]
    fn transport_failure_is_returned() {
        let mut publisher = RegisterPublisher::new(
            Recorder {
                fail: true,
                ..Default::default()
            },
            0,
        );
        let err = publisher.publish(&metrics()).unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }
}
