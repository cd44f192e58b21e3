//! `MessageChannel`-backed channel factory

use tether_hal::{ChannelFactory, Port, PortError};
use web_sys::MessageChannel;

use crate::port::WebPort;

/// Creates [`WebPort`] pairs over a fresh `MessageChannel`
#[derive(Clone, Copy, Debug, Default)]
pub struct WebChannelFactory;

impl ChannelFactory for WebChannelFactory {
    fn create_channel(&self, label: &str) -> Result<(Box<dyn Port>, Box<dyn Port>), PortError> {
        let channel = MessageChannel::new().map_err(|e| PortError::CreateFailed(format!("{:?}", e)))?;
        let first = WebPort::message_port(channel.port1(), format!("{}#1", label));
        let second = WebPort::message_port(channel.port2(), format!("{}#2", label));
        Ok((Box::new(first), Box::new(second)))
    }
}
