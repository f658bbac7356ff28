//! Wire messages and framing.
//!
//! One exchange is one [`Request`] answered by one [`Response`], each sent
//! as a `u32` little-endian length prefix followed by the bincode body.
//! The connection carries exactly one exchange and is closed afterwards.

use std::io::{Read, Write};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::RmiError;
use crate::skeleton::Outcome;

/// Upper bound on a single frame. Reads and writes beyond this are treated
/// as protocol violations rather than allocation requests.
pub const MAX_FRAME: usize = 64 * 1024 * 1024;

/// A method invocation request.
///
/// `args` is the bincode encoding of the argument tuple; the outer layers
/// never look inside it, so the runtime stays independent of any
/// particular interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    pub param_types: Vec<String>,
    pub return_type: String,
    pub args: Vec<u8>,
}

/// The response union.
///
/// `ReturnValue` and `MethodException` carry bincode payloads typed by the
/// interface (the return value, or the user-declared error). Transport and
/// dispatch failures travel as `RmiException`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    ReturnValue(Vec<u8>),
    MethodException(Vec<u8>),
    RmiException(RmiError),
}

/// Write one length-prefixed frame.
pub fn write_frame<T: Serialize>(stream: &mut impl Write, value: &T) -> Result<(), RmiError> {
    let payload = bincode::serialize(value).map_err(RmiError::codec)?;
    if payload.len() > MAX_FRAME {
        return Err(RmiError::Protocol(format!(
            "outgoing frame of {} bytes exceeds the {} byte limit",
            payload.len(),
            MAX_FRAME
        )));
    }
    let len = (payload.len() as u32).to_le_bytes();
    stream.write_all(&len).map_err(RmiError::io)?;
    stream.write_all(&payload).map_err(RmiError::io)?;
    stream.flush().map_err(RmiError::io)?;
    Ok(())
}

/// Read one length-prefixed frame.
pub fn read_frame<T: DeserializeOwned>(stream: &mut impl Read) -> Result<T, RmiError> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).map_err(RmiError::io)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME {
        return Err(RmiError::Protocol(format!(
            "incoming frame of {len} bytes exceeds the {MAX_FRAME} byte limit"
        )));
    }
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).map_err(RmiError::io)?;
    bincode::deserialize(&payload).map_err(RmiError::codec)
}

/// Decode an argument tuple inside a dispatcher.
pub fn decode_args<T: DeserializeOwned>(args: &[u8]) -> Result<T, RmiError> {
    bincode::deserialize(args).map_err(RmiError::codec)
}

/// Encode a method result inside a dispatcher: the `Ok` value becomes a
/// return payload, the declared error becomes a method-exception payload.
pub fn encode_outcome<R: Serialize, E: Serialize>(
    result: Result<R, E>,
) -> Result<Outcome, RmiError> {
    match result {
        Ok(value) => Ok(Outcome::Return(
            bincode::serialize(&value).map_err(RmiError::codec)?,
        )),
        Err(fault) => Ok(Outcome::Fault(
            bincode::serialize(&fault).map_err(RmiError::codec)?,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trip() {
        let request = Request {
            method: "read".to_string(),
            param_types: vec!["VPath".to_string(), "u64".to_string(), "u32".to_string()],
            return_type: "Vec<u8>".to_string(),
            args: vec![1, 2, 3],
        };

        let mut buf = Vec::new();
        write_frame(&mut buf, &request).unwrap();
        let decoded: Request = read_frame(&mut buf.as_slice()).unwrap();

        assert_eq!(decoded.method, "read");
        assert_eq!(decoded.param_types.len(), 3);
        assert_eq!(decoded.args, vec![1, 2, 3]);
    }

    #[test]
    fn oversized_incoming_frame_is_a_protocol_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME as u32 + 1).to_le_bytes());
        let result: Result<Request, _> = read_frame(&mut buf.as_slice());
        assert!(matches!(result, Err(RmiError::Protocol(_))));
    }

    #[test]
    fn truncated_frame_is_an_io_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&16u32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 4]); // 12 bytes short
        let result: Result<Request, _> = read_frame(&mut buf.as_slice());
        assert!(matches!(result, Err(RmiError::Io(_))));
    }

    #[test]
    fn response_union_round_trip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Response::RmiException(RmiError::AlreadyStarted)).unwrap();
        let decoded: Response = read_frame(&mut buf.as_slice()).unwrap();
        assert!(matches!(
            decoded,
            Response::RmiException(RmiError::AlreadyStarted)
        ));
    }

    #[test]
    fn outcome_encodes_ok_and_fault_separately() {
        let ok: Result<u64, String> = Ok(7);
        match encode_outcome(ok).unwrap() {
            Outcome::Return(bytes) => {
                assert_eq!(bincode::deserialize::<u64>(&bytes).unwrap(), 7)
            }
            Outcome::Fault(_) => panic!("Ok value must encode as a return"),
        }

        let fault: Result<u64, String> = Err("missing".to_string());
        match encode_outcome(fault).unwrap() {
            Outcome::Fault(bytes) => {
                assert_eq!(bincode::deserialize::<String>(&bytes).unwrap(), "missing")
            }
            Outcome::Return(_) => panic!("Err value must encode as a fault"),
        }
    }
}
