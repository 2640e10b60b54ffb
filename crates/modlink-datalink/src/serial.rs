use crate::channel::StreamChannel;
use crate::DataLinkError;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};

pub type SerialChannel = StreamChannel<SerialStream>;

#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub parity: Parity,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            parity: Parity::None,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

impl SerialConfig {
    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    pub fn with_data_bits(mut self, data_bits: DataBits) -> Self {
        self.data_bits = data_bits;
        self
    }

    pub fn with_stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    pub fn with_flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }
}

/// Opens a serial port as a channel. Pair it with the RTU or ASCII codec.
pub fn open(
    path: &str,
    baud_rate: u32,
    config: &SerialConfig,
) -> Result<SerialChannel, DataLinkError> {
    let stream = tokio_serial::new(path, baud_rate)
        .parity(config.parity)
        .data_bits(config.data_bits)
        .stop_bits(config.stop_bits)
        .flow_control(config.flow_control)
        .open_native_async()
        .map_err(|err| {
            DataLinkError::Io(std::io::Error::other(format!(
                "failed to open serial port '{path}': {err}"
            )))
        })?;
    Ok(StreamChannel::new(stream, format!("serial {path}@{baud_rate}")))
}
