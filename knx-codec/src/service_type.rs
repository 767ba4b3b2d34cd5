//! KNXnet/IP service type identifiers

use knx_core::{KnxError, KnxResult};
use std::fmt;

/// KNXnet/IP service type
///
/// A closed enum over the canonical service set with an exhaustive
/// code-to-variant mapping that fails loudly on unknown codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ServiceType {
    SearchRequest = 0x0201,
    SearchResponse = 0x0202,
    DescriptionRequest = 0x0203,
    DescriptionResponse = 0x0204,
    ConnectRequest = 0x0205,
    ConnectResponse = 0x0206,
    ConnectionStateRequest = 0x0207,
    ConnectionStateResponse = 0x0208,
    DisconnectRequest = 0x0209,
    DisconnectResponse = 0x020A,
    DeviceConfigurationRequest = 0x0310,
    DeviceConfigurationAck = 0x0311,
    TunnelingRequest = 0x0420,
    TunnelingAck = 0x0421,
    RoutingIndication = 0x0530,
}

impl ServiceType {
    /// All supported service types, in code order
    pub const ALL: [ServiceType; 15] = [
        ServiceType::SearchRequest,
        ServiceType::SearchResponse,
        ServiceType::DescriptionRequest,
        ServiceType::DescriptionResponse,
        ServiceType::ConnectRequest,
        ServiceType::ConnectResponse,
        ServiceType::ConnectionStateRequest,
        ServiceType::ConnectionStateResponse,
        ServiceType::DisconnectRequest,
        ServiceType::DisconnectResponse,
        ServiceType::DeviceConfigurationRequest,
        ServiceType::DeviceConfigurationAck,
        ServiceType::TunnelingRequest,
        ServiceType::TunnelingAck,
        ServiceType::RoutingIndication,
    ];

    /// Map a 2-byte service code to its variant
    ///
    /// # Errors
    /// Returns `KnxError::UnknownCode` for codes outside the supported set
    pub fn from_code(code: u16) -> KnxResult<Self> {
        match code {
            0x0201 => Ok(ServiceType::SearchRequest),
            0x0202 => Ok(ServiceType::SearchResponse),
            0x0203 => Ok(ServiceType::DescriptionRequest),
            0x0204 => Ok(ServiceType::DescriptionResponse),
            0x0205 => Ok(ServiceType::ConnectRequest),
            0x0206 => Ok(ServiceType::ConnectResponse),
            0x0207 => Ok(ServiceType::ConnectionStateRequest),
            0x0208 => Ok(ServiceType::ConnectionStateResponse),
            0x0209 => Ok(ServiceType::DisconnectRequest),
            0x020A => Ok(ServiceType::DisconnectResponse),
            0x0310 => Ok(ServiceType::DeviceConfigurationRequest),
            0x0311 => Ok(ServiceType::DeviceConfigurationAck),
            0x0420 => Ok(ServiceType::TunnelingRequest),
            0x0421 => Ok(ServiceType::TunnelingAck),
            0x0530 => Ok(ServiceType::RoutingIndication),
            _ => Err(KnxError::UnknownCode {
                field: "service type",
                code,
            }),
        }
    }

    /// Get the 2-byte service code
    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// Human-readable service name
    pub fn name(&self) -> &'static str {
        match self {
            ServiceType::SearchRequest => "SEARCH_REQUEST",
            ServiceType::SearchResponse => "SEARCH_RESPONSE",
            ServiceType::DescriptionRequest => "DESCRIPTION_REQUEST",
            ServiceType::DescriptionResponse => "DESCRIPTION_RESPONSE",
            ServiceType::ConnectRequest => "CONNECT_REQUEST",
            ServiceType::ConnectResponse => "CONNECT_RESPONSE",
            ServiceType::ConnectionStateRequest => "CONNECTIONSTATE_REQUEST",
            ServiceType::ConnectionStateResponse => "CONNECTIONSTATE_RESPONSE",
            ServiceType::DisconnectRequest => "DISCONNECT_REQUEST",
            ServiceType::DisconnectResponse => "DISCONNECT_RESPONSE",
            ServiceType::DeviceConfigurationRequest => "DEVICE_CONFIGURATION_REQUEST",
            ServiceType::DeviceConfigurationAck => "DEVICE_CONFIGURATION_ACK",
            ServiceType::TunnelingRequest => "TUNNELING_REQUEST",
            ServiceType::TunnelingAck => "TUNNELING_ACK",
            ServiceType::RoutingIndication => "ROUTING_INDICATION",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_mapping_exhaustive() {
        for service in ServiceType::ALL {
            assert_eq!(ServiceType::from_code(service.code()).unwrap(), service);
        }
    }

    #[test]
    fn test_unknown_code_fails() {
        let err = ServiceType::from_code(0x0999).unwrap_err();
        assert!(matches!(
            err,
            KnxError::UnknownCode {
                field: "service type",
                code: 0x0999
            }
        ));
    }
}
