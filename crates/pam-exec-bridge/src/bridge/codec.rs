//! Framed codec for the bridge socket.
//!
//! Length-prefixed frames (4-byte prefix) carrying JSON. One codec type
//! covers both directions: `Rx` is what we decode, `Tx` what we encode, so
//! the server instantiates `FrameCodec<BridgeRequest, BridgeResponse>` and
//! the helper client the mirror image.

use std::io;
use std::marker::PhantomData;

use serde::{de::DeserializeOwned, Serialize};
use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

pub struct FrameCodec<Rx, Tx> {
    framing: LengthDelimitedCodec,
    _direction: PhantomData<(Rx, Tx)>,
}

impl<Rx, Tx> FrameCodec<Rx, Tx> {
    pub fn new() -> Self {
        Self {
            framing: LengthDelimitedCodec::builder()
                .length_field_length(4)
                .new_codec(),
            _direction: PhantomData,
        }
    }
}

impl<Rx, Tx> Default for FrameCodec<Rx, Tx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Rx: DeserializeOwned, Tx> Decoder for FrameCodec<Rx, Tx> {
    type Item = Rx;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(frame) = self.framing.decode(src)? else {
            return Ok(None);
        };
        let item = serde_json::from_slice(&frame)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Some(item))
    }
}

impl<Rx, Tx: Serialize> Encoder<Tx> for FrameCodec<Rx, Tx> {
    type Error = io::Error;

    fn encode(&mut self, item: Tx, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = serde_json::to_vec(&item)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.framing.encode(Bytes::from(payload), dst)
    }
}
