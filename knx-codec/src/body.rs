//! Frame body variants and full-frame encode/decode

use crate::cemi::Cemi;
use crate::connection::{ConnectionRequestInformation, ConnectionResponseData};
use crate::header::{Header, HEADER_LENGTH};
use crate::hpai::{Hpai, HPAI_LENGTH};
use crate::service_type::ServiceType;
use crate::status::Status;
use knx_core::{KnxError, KnxResult};

/// Length of the connection header prefixed to tunneling and device
/// configuration bodies: structure length, channel id, sequence, status
const CONNECTION_HEADER_LENGTH: usize = 4;

/// KNXnet/IP frame body
///
/// A tagged union over the supported request/response kinds. Every
/// variant is reconstructible byte-for-byte from its own fields; see
/// [`Body::encode`] and [`Body::decode`].
///
/// Search and Description responses carry their DIB block opaque — the
/// engine never interprets device descriptions, it only preserves them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    SearchRequest {
        discovery_endpoint: Hpai,
    },
    SearchResponse {
        control_endpoint: Hpai,
        description: Vec<u8>,
    },
    DescriptionRequest {
        control_endpoint: Hpai,
    },
    DescriptionResponse {
        description: Vec<u8>,
    },
    ConnectRequest {
        control_endpoint: Hpai,
        data_endpoint: Hpai,
        cri: ConnectionRequestInformation,
    },
    ConnectResponse {
        channel_id: u8,
        status: Status,
        /// Present only when `status` is `NoError`
        data_endpoint: Option<Hpai>,
        /// Present only when `status` is `NoError`
        crd: Option<ConnectionResponseData>,
    },
    ConnectionStateRequest {
        channel_id: u8,
        control_endpoint: Hpai,
    },
    ConnectionStateResponse {
        channel_id: u8,
        status: Status,
    },
    DisconnectRequest {
        channel_id: u8,
        control_endpoint: Hpai,
    },
    DisconnectResponse {
        channel_id: u8,
        status: Status,
    },
    TunnelingRequest {
        channel_id: u8,
        sequence: u8,
        cemi: Cemi,
    },
    TunnelingAck {
        channel_id: u8,
        sequence: u8,
        status: Status,
    },
    DeviceConfigurationRequest {
        channel_id: u8,
        sequence: u8,
        cemi: Cemi,
    },
    DeviceConfigurationAck {
        channel_id: u8,
        sequence: u8,
        status: Status,
    },
    RoutingIndication {
        cemi: Cemi,
    },
}

impl Body {
    /// The service type tag of this variant
    pub fn service_type(&self) -> ServiceType {
        match self {
            Body::SearchRequest { .. } => ServiceType::SearchRequest,
            Body::SearchResponse { .. } => ServiceType::SearchResponse,
            Body::DescriptionRequest { .. } => ServiceType::DescriptionRequest,
            Body::DescriptionResponse { .. } => ServiceType::DescriptionResponse,
            Body::ConnectRequest { .. } => ServiceType::ConnectRequest,
            Body::ConnectResponse { .. } => ServiceType::ConnectResponse,
            Body::ConnectionStateRequest { .. } => ServiceType::ConnectionStateRequest,
            Body::ConnectionStateResponse { .. } => ServiceType::ConnectionStateResponse,
            Body::DisconnectRequest { .. } => ServiceType::DisconnectRequest,
            Body::DisconnectResponse { .. } => ServiceType::DisconnectResponse,
            Body::TunnelingRequest { .. } => ServiceType::TunnelingRequest,
            Body::TunnelingAck { .. } => ServiceType::TunnelingAck,
            Body::DeviceConfigurationRequest { .. } => ServiceType::DeviceConfigurationRequest,
            Body::DeviceConfigurationAck { .. } => ServiceType::DeviceConfigurationAck,
            Body::RoutingIndication { .. } => ServiceType::RoutingIndication,
        }
    }

    /// The channel identifier, for variants scoped to a channel
    ///
    /// Discovery, description and routing traffic carry no channel id and
    /// return `None`.
    pub fn channel_id(&self) -> Option<u8> {
        match self {
            Body::ConnectResponse { channel_id, .. }
            | Body::ConnectionStateRequest { channel_id, .. }
            | Body::ConnectionStateResponse { channel_id, .. }
            | Body::DisconnectRequest { channel_id, .. }
            | Body::DisconnectResponse { channel_id, .. }
            | Body::TunnelingRequest { channel_id, .. }
            | Body::TunnelingAck { channel_id, .. }
            | Body::DeviceConfigurationRequest { channel_id, .. }
            | Body::DeviceConfigurationAck { channel_id, .. } => Some(*channel_id),
            Body::SearchRequest { .. }
            | Body::SearchResponse { .. }
            | Body::DescriptionRequest { .. }
            | Body::DescriptionResponse { .. }
            | Body::ConnectRequest { .. } => None,
            Body::RoutingIndication { .. } => None,
        }
    }

    /// Encode the complete frame, header included
    pub fn encode(&self) -> KnxResult<Vec<u8>> {
        let body = self.encode_body();
        let header = Header::for_body(self.service_type(), body.len())?;
        let mut out = Vec::with_capacity(HEADER_LENGTH + body.len());
        out.extend_from_slice(&header.encode());
        out.extend_from_slice(&body);
        Ok(out)
    }

    fn encode_body(&self) -> Vec<u8> {
        match self {
            Body::SearchRequest { discovery_endpoint } => discovery_endpoint.encode().to_vec(),
            Body::SearchResponse {
                control_endpoint,
                description,
            } => {
                let mut out = control_endpoint.encode().to_vec();
                out.extend_from_slice(description);
                out
            }
            Body::DescriptionRequest { control_endpoint } => control_endpoint.encode().to_vec(),
            Body::DescriptionResponse { description } => description.clone(),
            Body::ConnectRequest {
                control_endpoint,
                data_endpoint,
                cri,
            } => {
                let mut out = control_endpoint.encode().to_vec();
                out.extend_from_slice(&data_endpoint.encode());
                out.extend_from_slice(&cri.encode());
                out
            }
            Body::ConnectResponse {
                channel_id,
                status,
                data_endpoint,
                crd,
            } => {
                let mut out = vec![*channel_id, status.code()];
                if let Some(endpoint) = data_endpoint {
                    out.extend_from_slice(&endpoint.encode());
                }
                if let Some(crd) = crd {
                    out.extend_from_slice(&crd.encode());
                }
                out
            }
            Body::ConnectionStateRequest {
                channel_id,
                control_endpoint,
            }
            | Body::DisconnectRequest {
                channel_id,
                control_endpoint,
            } => {
                let mut out = vec![*channel_id, 0x00];
                out.extend_from_slice(&control_endpoint.encode());
                out
            }
            Body::ConnectionStateResponse { channel_id, status }
            | Body::DisconnectResponse { channel_id, status } => {
                vec![*channel_id, status.code()]
            }
            Body::TunnelingRequest {
                channel_id,
                sequence,
                cemi,
            }
            | Body::DeviceConfigurationRequest {
                channel_id,
                sequence,
                cemi,
            } => {
                let mut out = vec![
                    CONNECTION_HEADER_LENGTH as u8,
                    *channel_id,
                    *sequence,
                    0x00,
                ];
                out.extend_from_slice(&cemi.encode());
                out
            }
            Body::TunnelingAck {
                channel_id,
                sequence,
                status,
            }
            | Body::DeviceConfigurationAck {
                channel_id,
                sequence,
                status,
            } => {
                vec![
                    CONNECTION_HEADER_LENGTH as u8,
                    *channel_id,
                    *sequence,
                    status.code(),
                ]
            }
            Body::RoutingIndication { cemi } => cemi.encode(),
        }
    }

    /// Decode a complete frame
    ///
    /// Validates the header, that the declared total length matches the
    /// slice, and the body layout of the tagged variant. Never returns a
    /// partially-populated value.
    pub fn decode(bytes: &[u8]) -> KnxResult<Self> {
        let header = Header::decode(bytes)?;
        if header.total_length() as usize != bytes.len() {
            return Err(KnxError::OutOfRange {
                field: "header total length",
                min: bytes.len() as u32,
                max: bytes.len() as u32,
                actual: header.total_length() as u32,
            });
        }
        let body = &bytes[HEADER_LENGTH..];
        match header.service_type() {
            ServiceType::SearchRequest => Ok(Body::SearchRequest {
                discovery_endpoint: decode_exact_hpai(body, "SEARCH_REQUEST body")?,
            }),
            ServiceType::SearchResponse => {
                let control_endpoint = Hpai::decode(body)?;
                Ok(Body::SearchResponse {
                    control_endpoint,
                    description: body[HPAI_LENGTH..].to_vec(),
                })
            }
            ServiceType::DescriptionRequest => Ok(Body::DescriptionRequest {
                control_endpoint: decode_exact_hpai(body, "DESCRIPTION_REQUEST body")?,
            }),
            ServiceType::DescriptionResponse => Ok(Body::DescriptionResponse {
                description: body.to_vec(),
            }),
            ServiceType::ConnectRequest => {
                let expected = 2 * HPAI_LENGTH + 4;
                check_body_length(body, expected, expected, "CONNECT_REQUEST body")?;
                Ok(Body::ConnectRequest {
                    control_endpoint: Hpai::decode(&body[..HPAI_LENGTH])?,
                    data_endpoint: Hpai::decode(&body[HPAI_LENGTH..2 * HPAI_LENGTH])?,
                    cri: ConnectionRequestInformation::decode(&body[2 * HPAI_LENGTH..])?,
                })
            }
            ServiceType::ConnectResponse => decode_connect_response(body),
            ServiceType::ConnectionStateRequest => {
                let (channel_id, control_endpoint) =
                    decode_channel_endpoint(body, "CONNECTIONSTATE_REQUEST body")?;
                Ok(Body::ConnectionStateRequest {
                    channel_id,
                    control_endpoint,
                })
            }
            ServiceType::ConnectionStateResponse => {
                let (channel_id, status) =
                    decode_channel_status(body, "CONNECTIONSTATE_RESPONSE body")?;
                Ok(Body::ConnectionStateResponse { channel_id, status })
            }
            ServiceType::DisconnectRequest => {
                let (channel_id, control_endpoint) =
                    decode_channel_endpoint(body, "DISCONNECT_REQUEST body")?;
                Ok(Body::DisconnectRequest {
                    channel_id,
                    control_endpoint,
                })
            }
            ServiceType::DisconnectResponse => {
                let (channel_id, status) = decode_channel_status(body, "DISCONNECT_RESPONSE body")?;
                Ok(Body::DisconnectResponse { channel_id, status })
            }
            ServiceType::TunnelingRequest => {
                let (channel_id, sequence, cemi) =
                    decode_connection_data(body, "TUNNELING_REQUEST body")?;
                Ok(Body::TunnelingRequest {
                    channel_id,
                    sequence,
                    cemi,
                })
            }
            ServiceType::TunnelingAck => {
                let (channel_id, sequence, status) =
                    decode_connection_ack(body, "TUNNELING_ACK body")?;
                Ok(Body::TunnelingAck {
                    channel_id,
                    sequence,
                    status,
                })
            }
            ServiceType::DeviceConfigurationRequest => {
                let (channel_id, sequence, cemi) =
                    decode_connection_data(body, "DEVICE_CONFIGURATION_REQUEST body")?;
                Ok(Body::DeviceConfigurationRequest {
                    channel_id,
                    sequence,
                    cemi,
                })
            }
            ServiceType::DeviceConfigurationAck => {
                let (channel_id, sequence, status) =
                    decode_connection_ack(body, "DEVICE_CONFIGURATION_ACK body")?;
                Ok(Body::DeviceConfigurationAck {
                    channel_id,
                    sequence,
                    status,
                })
            }
            ServiceType::RoutingIndication => Ok(Body::RoutingIndication {
                cemi: Cemi::decode(body)?,
            }),
        }
    }
}

fn check_body_length(
    body: &[u8],
    min: usize,
    max: usize,
    field: &'static str,
) -> KnxResult<()> {
    if body.len() < min || body.len() > max {
        return Err(KnxError::OutOfRange {
            field,
            min: min as u32,
            max: max as u32,
            actual: body.len() as u32,
        });
    }
    Ok(())
}

fn decode_exact_hpai(body: &[u8], field: &'static str) -> KnxResult<Hpai> {
    check_body_length(body, HPAI_LENGTH, HPAI_LENGTH, field)?;
    Hpai::decode(body)
}

fn decode_channel_endpoint(body: &[u8], field: &'static str) -> KnxResult<(u8, Hpai)> {
    check_body_length(body, 2 + HPAI_LENGTH, 2 + HPAI_LENGTH, field)?;
    // byte 1 is reserved
    Ok((body[0], Hpai::decode(&body[2..])?))
}

fn decode_channel_status(body: &[u8], field: &'static str) -> KnxResult<(u8, Status)> {
    check_body_length(body, 2, 2, field)?;
    Ok((body[0], Status::from_code(body[1])?))
}

fn decode_connection_header(body: &[u8], field: &'static str) -> KnxResult<(u8, u8, u8)> {
    if body.len() < CONNECTION_HEADER_LENGTH {
        return Err(KnxError::OutOfRange {
            field,
            min: CONNECTION_HEADER_LENGTH as u32,
            max: u16::MAX as u32,
            actual: body.len() as u32,
        });
    }
    if body[0] as usize != CONNECTION_HEADER_LENGTH {
        return Err(KnxError::OutOfRange {
            field: "connection header length",
            min: CONNECTION_HEADER_LENGTH as u32,
            max: CONNECTION_HEADER_LENGTH as u32,
            actual: body[0] as u32,
        });
    }
    Ok((body[1], body[2], body[3]))
}

fn decode_connection_data(body: &[u8], field: &'static str) -> KnxResult<(u8, u8, Cemi)> {
    let (channel_id, sequence, _reserved) = decode_connection_header(body, field)?;
    let cemi = Cemi::decode(&body[CONNECTION_HEADER_LENGTH..])?;
    Ok((channel_id, sequence, cemi))
}

fn decode_connection_ack(body: &[u8], field: &'static str) -> KnxResult<(u8, u8, Status)> {
    check_body_length(
        body,
        CONNECTION_HEADER_LENGTH,
        CONNECTION_HEADER_LENGTH,
        field,
    )?;
    let (channel_id, sequence, status) = decode_connection_header(body, field)?;
    Ok((channel_id, sequence, Status::from_code(status)?))
}

fn decode_connect_response(body: &[u8]) -> KnxResult<Body> {
    check_body_length(body, 2, 2 + HPAI_LENGTH + 4, "CONNECT_RESPONSE body")?;
    let channel_id = body[0];
    let status = Status::from_code(body[1])?;
    if body.len() == 2 {
        // Error responses may omit the data endpoint and CRD
        return Ok(Body::ConnectResponse {
            channel_id,
            status,
            data_endpoint: None,
            crd: None,
        });
    }
    check_body_length(
        body,
        2 + HPAI_LENGTH + 4,
        2 + HPAI_LENGTH + 4,
        "CONNECT_RESPONSE body",
    )?;
    Ok(Body::ConnectResponse {
        channel_id,
        status,
        data_endpoint: Some(Hpai::decode(&body[2..2 + HPAI_LENGTH])?),
        crd: Some(ConnectionResponseData::decode(&body[2 + HPAI_LENGTH..])?),
    })
}
